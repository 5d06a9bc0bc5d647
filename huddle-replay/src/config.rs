//! Configuration for the replay tool.

use std::path::Path;
use std::time::Duration;

use huddle_core::RoomConfig;
use huddle_core::quality::{ConstraintProfile, QualityConfig};
use huddle_core::remote::RemoteDesktopConfig;
use huddle_core::state::ReconnectBackoff;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Local participant identity.
    pub identity: IdentityConfig,
    /// Adaptive video quality.
    pub quality: QualitySection,
    /// Remote desktop settings.
    pub remote: RemoteSection,
    /// Media transport reconnect pacing.
    pub reconnect: ReconnectSection,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity requested from the media broker.
    pub id: String,
}

/// Sampling interval and the capture caps for each degraded mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySection {
    /// Milliseconds between periodic samples.
    pub interval_ms: u64,
    pub weak: ConstraintProfile,
    pub very_poor: ConstraintProfile,
    /// Restored on recovery when the track reported no constraints.
    pub fallback: ConstraintProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Where the host install prompt points.
    pub host_app_download_url: String,
    /// Session error codes that mean "the host is not running".
    pub host_unreachable_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub base_ms: u64,
    pub cap_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            id: "replay".into(),
        }
    }
}

impl Default for QualitySection {
    fn default() -> Self {
        let core = QualityConfig::default();
        Self {
            interval_ms: core.interval.as_millis() as u64,
            weak: core.weak,
            very_poor: core.very_poor,
            fallback: core.fallback,
        }
    }
}

impl Default for RemoteSection {
    fn default() -> Self {
        let core = RemoteDesktopConfig::default();
        let mut codes: Vec<String> = core.host_unreachable_codes.into_iter().collect();
        codes.sort();
        Self {
            host_app_download_url: core.host_app_download_url,
            host_unreachable_codes: codes,
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_ms: huddle_core::state::link::DEFAULT_BACKOFF_BASE.as_millis() as u64,
            cap_ms: huddle_core::state::link::DEFAULT_BACKOFF_CAP.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ReplayConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert into the room's configuration, clamping nonsense values.
    pub fn to_room_config(&self) -> RoomConfig {
        let quality = QualityConfig {
            interval: Duration::from_millis(self.quality.interval_ms.clamp(250, 60_000)),
            weak: clamp_profile(self.quality.weak),
            very_poor: clamp_profile(self.quality.very_poor),
            fallback: clamp_profile(self.quality.fallback),
        };

        let mut remote = RemoteDesktopConfig::default();
        if !self.remote.host_app_download_url.is_empty() {
            remote.host_app_download_url = self.remote.host_app_download_url.clone();
        }
        let codes: Vec<String> = self
            .remote
            .host_unreachable_codes
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if !codes.is_empty() {
            remote.host_unreachable_codes = codes.into_iter().collect();
        }

        let base = Duration::from_millis(self.reconnect.base_ms.max(10));
        let cap = Duration::from_millis(self.reconnect.cap_ms);

        RoomConfig {
            quality,
            remote,
            reconnect: ReconnectBackoff::new(base, cap),
        }
    }
}

fn clamp_profile(p: ConstraintProfile) -> ConstraintProfile {
    ConstraintProfile::new(
        p.width.clamp(16, 7680),
        p.height.clamp(16, 4320),
        if p.frame_rate.is_finite() {
            p.frame_rate.clamp(1.0, 120.0)
        } else {
            30.0
        },
    )
}

// ── Tests ────────────────────────────────────────────────────────
