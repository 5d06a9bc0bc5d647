//! Outbound remote-control input events.
//!
//! Pointer coordinates travel normalised to the `[0, 1]` range of the
//! remote desktop so the viewer never needs to know the host's screen
//! geometry. Anything that does not parse into [`RemoteInput`] is
//! rejected before it reaches the signaling channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HuddleError;

/// Event name used in error reports for rejected input.
const INPUT_EVENT: &str = "remote-input";

// ── RemoteInput ──────────────────────────────────────────────────

/// A single input event forwarded to the controlled host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RemoteInput {
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerDown {
        x: f64,
        y: f64,
        #[serde(default)]
        button: PointerButton,
    },
    PointerUp {
        x: f64,
        y: f64,
        #[serde(default)]
        button: PointerButton,
    },
    #[serde(rename_all = "camelCase")]
    Wheel {
        x: f64,
        y: f64,
        #[serde(default)]
        delta_x: f64,
        #[serde(default)]
        delta_y: f64,
    },
    KeyDown {
        key: String,
        #[serde(default)]
        code: String,
        #[serde(default)]
        modifiers: u8,
    },
    KeyUp {
        key: String,
        #[serde(default)]
        code: String,
        #[serde(default)]
        modifiers: u8,
    },
}

/// Pointer button identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    #[default]
    Left,
    Middle,
    Right,
}

/// Modifier key flags carried by key events.
pub mod key_modifiers {
    pub const NONE: u8 = 0x00;
    pub const SHIFT: u8 = 0x01;
    pub const CTRL: u8 = 0x02;
    pub const ALT: u8 = 0x04;
    pub const META: u8 = 0x08; // Windows key / Cmd
}

impl RemoteInput {
    /// Pointer move to normalised coordinates.
    pub fn move_to(x: f64, y: f64) -> Self {
        Self::PointerMove { x, y }
    }

    pub fn press(x: f64, y: f64, button: PointerButton) -> Self {
        Self::PointerDown { x, y, button }
    }

    pub fn release(x: f64, y: f64, button: PointerButton) -> Self {
        Self::PointerUp { x, y, button }
    }

    pub fn scroll(x: f64, y: f64, delta_y: f64) -> Self {
        Self::Wheel {
            x,
            y,
            delta_x: 0.0,
            delta_y,
        }
    }

    pub fn key_down(key: impl Into<String>, modifiers: u8) -> Self {
        Self::KeyDown {
            key: key.into(),
            code: String::new(),
            modifiers,
        }
    }

    pub fn key_up(key: impl Into<String>, modifiers: u8) -> Self {
        Self::KeyUp {
            key: key.into(),
            code: String::new(),
            modifiers,
        }
    }

    /// Check if a modifier is set. Always `false` for pointer events.
    pub fn has_modifier(&self, modifier: u8) -> bool {
        match self {
            Self::KeyDown { modifiers, .. } | Self::KeyUp { modifiers, .. } => {
                modifiers & modifier != 0
            }
            _ => false,
        }
    }

    /// Parse an untyped event and normalise it.
    pub fn from_value(raw: Value) -> Result<Self, HuddleError> {
        let event: RemoteInput =
            serde_json::from_value(raw).map_err(|e| HuddleError::malformed(INPUT_EVENT, e))?;
        event.normalize()
    }

    /// Clamp pointer coordinates into `[0, 1]` and reject values that
    /// cannot be clamped (NaN, infinities, empty keys).
    pub fn normalize(self) -> Result<Self, HuddleError> {
        match self {
            Self::PointerMove { x, y } => Ok(Self::PointerMove {
                x: unit(x)?,
                y: unit(y)?,
            }),
            Self::PointerDown { x, y, button } => Ok(Self::PointerDown {
                x: unit(x)?,
                y: unit(y)?,
                button,
            }),
            Self::PointerUp { x, y, button } => Ok(Self::PointerUp {
                x: unit(x)?,
                y: unit(y)?,
                button,
            }),
            Self::Wheel {
                x,
                y,
                delta_x,
                delta_y,
            } => {
                if !delta_x.is_finite() || !delta_y.is_finite() {
                    return Err(HuddleError::malformed(INPUT_EVENT, "non-finite wheel delta"));
                }
                Ok(Self::Wheel {
                    x: unit(x)?,
                    y: unit(y)?,
                    delta_x,
                    delta_y,
                })
            }
            Self::KeyDown { ref key, .. } | Self::KeyUp { ref key, .. } if key.is_empty() => {
                Err(HuddleError::malformed(INPUT_EVENT, "empty key"))
            }
            key @ (Self::KeyDown { .. } | Self::KeyUp { .. }) => Ok(key),
        }
    }
}

fn unit(v: f64) -> Result<f64, HuddleError> {
    if !v.is_finite() {
        return Err(HuddleError::malformed(INPUT_EVENT, "non-finite coordinate"));
    }
    Ok(v.clamp(0.0, 1.0))
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pointer_coordinates_are_clamped() {
        let event = RemoteInput::move_to(1.7, -0.25).normalize().unwrap();
        assert_eq!(event, RemoteInput::PointerMove { x: 1.0, y: 0.0 });

        let event = RemoteInput::scroll(0.5, 3.0, -120.0).normalize().unwrap();
        assert_eq!(
            event,
            RemoteInput::Wheel {
                x: 0.5,
                y: 1.0,
                delta_x: 0.0,
                delta_y: -120.0
            }
        );
    }

    #[test]
    fn non_finite_coordinates_rejected() {
        assert!(RemoteInput::move_to(f64::NAN, 0.5).normalize().is_err());
        assert!(
            RemoteInput::press(0.5, f64::INFINITY, PointerButton::Left)
                .normalize()
                .is_err()
        );
    }

    #[test]
    fn parses_wire_shape() {
        let event = RemoteInput::from_value(json!({
            "type": "pointer-down",
            "x": 0.25,
            "y": 2.0,
            "button": "right"
        }))
        .unwrap();
        assert_eq!(event, RemoteInput::press(0.25, 1.0, PointerButton::Right));

        let event = RemoteInput::from_value(json!({"type": "wheel", "x": 0.1, "y": 0.1, "deltaY": 3.0}))
            .unwrap();
        assert!(matches!(event, RemoteInput::Wheel { delta_y, .. } if delta_y == 3.0));
    }

    #[test]
    fn unknown_shapes_rejected() {
        assert!(RemoteInput::from_value(json!({"type": "teleport", "x": 0.1})).is_err());
        assert!(RemoteInput::from_value(json!({"x": 0.1, "y": 0.2})).is_err());
        assert!(RemoteInput::from_value(json!({"type": "pointer-move", "x": "left"})).is_err());
        assert!(RemoteInput::from_value(json!("click")).is_err());
    }

    #[test]
    fn key_events_keep_modifiers() {
        let event = RemoteInput::key_down("a", key_modifiers::SHIFT | key_modifiers::CTRL)
            .normalize()
            .unwrap();
        assert!(event.has_modifier(key_modifiers::SHIFT));
        assert!(event.has_modifier(key_modifiers::CTRL));
        assert!(!event.has_modifier(key_modifiers::ALT));

        assert!(RemoteInput::key_up("", key_modifiers::NONE).normalize().is_err());
    }

    #[test]
    fn serializes_with_type_tag() {
        let value = serde_json::to_value(RemoteInput::scroll(0.5, 0.5, 1.0)).unwrap();
        assert_eq!(value["type"], "wheel");
        assert_eq!(value["deltaY"], 1.0);
    }
}
