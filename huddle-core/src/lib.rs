//! # huddle-core
//!
//! Multi-party call sessions, remote desktop control and adaptive media
//! quality over one reconnect-prone signaling channel.
//!
//! This crate contains:
//! - **Capabilities**: the traits the core consumes (`SignalSink`, `MediaTransport`, `CallHandle`, ...)
//! - **Signal**: ingress-validated event schemas and outbound events
//! - **Call**: `CallSessionManager`, the peer id → call store with a pending queue
//! - **Remote**: `RemoteDesktopController`, host registry, frame relay, input
//! - **Quality**: tier classification, hysteresis and the sampling loop
//! - **Room**: `RoomSession`, which wires the three together
//! - **State**: signaling link phase and reconnect backoff
//! - **Sim**: in-memory capability implementations
//! - **Error**: `HuddleError`, a `thiserror`-based error hierarchy

pub mod call;
pub mod capability;
pub mod error;
pub mod quality;
pub mod remote;
pub mod room;
pub mod signal;
pub mod sim;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use call::{CallHealth, CallManagerEvent, CallSessionManager, CallSnapshot};
pub use capability::{
    CallEvent, CallEventKind, CallHandle, ConnectionStats, EffectiveType, LocalStream,
    MediaTransport, NetworkHint, NetworkHintSource, PeerConnection, SignalSink, TransportFactory,
    VideoConstraints, VideoTrack,
};
pub use error::HuddleError;
pub use quality::{QualityConfig, QualityHandle, QualityLoop, QualityMode, QualityTier};
pub use remote::{
    FrameSubscription, HostOwnership, HostRecord, RemoteDesktopConfig, RemoteDesktopController,
    RemoteDesktopSnapshot, RemoteInput,
};
pub use room::{RoomConfig, RoomHandle, RoomInput, RoomSession, RoomSnapshot, TransportEvent};
pub use signal::{OutboundSignal, RemoteEvent, SignalEvent};
pub use state::{LinkPhase, ReconnectBackoff};
