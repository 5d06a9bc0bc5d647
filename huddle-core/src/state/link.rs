//! Signaling link lifecycle and the shared reconnect policy.
//!
//! [`LinkPhase`] tracks what the room believes about its signaling
//! connection, with validated transitions that return `Result` instead
//! of panicking. [`ReconnectBackoff`] paces media transport reconnects.

use std::time::{Duration, Instant};

use crate::error::HuddleError;

// ── LinkPhase ────────────────────────────────────────────────────

/// The current phase of the signaling link.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲               │              │
///       │               ▼              ▼
///       └────────── Reconnecting { attempt } ◄─┐
///                       │                      │
///                       └──────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// Never connected, or shut down.
    #[default]
    Disconnected,

    /// First connection attempt in flight.
    Connecting,

    Connected {
        since: Instant,
    },

    /// The link dropped; the channel is retrying on its own.
    Reconnecting {
        attempt: u32,
    },
}

impl std::fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected { .. } => write!(f, "Connected"),
            Self::Reconnecting { attempt } => write!(f, "Reconnecting({attempt})"),
        }
    }
}

impl LinkPhase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::Reconnecting { .. })
    }

    /// How long the link has been up. `None` unless connected.
    pub fn connected_duration(&self) -> Option<Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), HuddleError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            other => Err(HuddleError::Signal(format!(
                "cannot connect: link is {other}"
            ))),
        }
    }

    /// Valid from: `Connecting`, `Reconnecting`.
    ///
    /// Returns `true` when this was a reconnect.
    pub fn connected(&mut self) -> Result<bool, HuddleError> {
        let reconnect = match self {
            Self::Connecting => false,
            Self::Reconnecting { .. } => true,
            other => {
                return Err(HuddleError::Signal(format!(
                    "cannot complete connect: link is {other}"
                )));
            }
        };
        *self = Self::Connected {
            since: Instant::now(),
        };
        Ok(reconnect)
    }

    /// The link dropped. Valid from: `Connected`, `Reconnecting`,
    /// `Connecting`. Returns the attempt number now in progress.
    pub fn lost(&mut self) -> Result<u32, HuddleError> {
        let attempt = match self {
            Self::Connected { .. } | Self::Connecting => 1,
            Self::Reconnecting { attempt } => attempt.saturating_add(1),
            Self::Disconnected => {
                return Err(HuddleError::Signal(
                    "cannot lose a link that was never up".into(),
                ));
            }
        };
        *self = Self::Reconnecting { attempt };
        Ok(attempt)
    }

    /// Force-reset to `Disconnected` regardless of current state.
    pub fn shutdown(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── ReconnectBackoff ─────────────────────────────────────────────

pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Exponential backoff: `base * 2^n`, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            attempts: 0,
        }
    }

    /// Delay before the next attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempts.min(16);
        self.attempts = self.attempts.saturating_add(1);
        self.base
            .checked_mul(1u32 << shift)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

// ── Tests ────────────────────────────────────────────────────────
