//! Domain-specific error types for huddle.
//!
//! `HuddleError` is used at capability seams and parsing boundaries.
//! The public operations of the call manager, the remote desktop
//! controller and the quality loop never surface it across a component
//! boundary: they log it and degrade to a `bool` or a no-op.

use thiserror::Error;

/// The canonical error type for huddle.
#[derive(Debug, Error)]
pub enum HuddleError {
    // ── Signaling Errors ─────────────────────────────────────────
    /// A signaling payload did not match its schema.
    #[error("malformed {event} payload: {reason}")]
    MalformedPayload { event: String, reason: String },

    /// The signaling channel delivered an event name we do not handle.
    #[error("unknown signaling event: {0}")]
    UnknownEvent(String),

    /// Emitting on the signaling channel failed.
    #[error("signal emit failed: {0}")]
    Signal(String),

    // ── Call Errors ──────────────────────────────────────────────
    /// The local media transport is not open, lacks an identity, or
    /// there is no local stream.
    #[error("local transport is not call-ready")]
    NotCallReady,

    /// A peer identity was empty or otherwise unusable.
    #[error("invalid peer id: {0:?}")]
    InvalidPeer(String),

    /// The peer-to-peer transport reported an error.
    #[error("transport error: {0}")]
    Transport(String),

    // ── Media Errors ─────────────────────────────────────────────
    /// Applying capture constraints to a track failed.
    #[error("constraint application failed: {0}")]
    Constraint(String),

    /// Reading transport statistics failed.
    #[error("stats unavailable: {0}")]
    Stats(String),

    // ── Plumbing Errors ──────────────────────────────────────────
    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The I/O layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl HuddleError {
    /// Shorthand for a schema violation on a named event.
    pub fn malformed(event: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        HuddleError::MalformedPayload {
            event: event.into(),
            reason: reason.to_string(),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for HuddleError {
    fn from(s: String) -> Self {
        HuddleError::Other(s)
    }
}

impl From<&str> for HuddleError {
    fn from(s: &str) -> Self {
        HuddleError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for HuddleError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        HuddleError::ChannelClosed
    }
}
