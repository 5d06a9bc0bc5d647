//! Capability interfaces consumed by the core.
//!
//! The signaling socket, the peer-to-peer media transport, the local
//! capture tracks and the browser-style network hint are external
//! collaborators. The core only talks to them through these traits, so
//! a real transport binding and the in-memory [`crate::sim`] types are
//! interchangeable.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::HuddleError;
use crate::signal::OutboundSignal;

// ── Signaling ────────────────────────────────────────────────────

/// Outbound half of the named-event signaling channel.
///
/// Reconnection with backoff is the channel's own business; the core
/// only observes `connect` / `disconnect` events and the boolean state.
pub trait SignalSink: Send + Sync {
    /// Emit a typed signal. Errors are reported, never panicked on.
    fn emit(&self, signal: &OutboundSignal) -> Result<(), HuddleError>;

    /// Whether the underlying socket currently reports connected.
    fn is_connected(&self) -> bool;
}

// ── Local media ──────────────────────────────────────────────────

/// Requested capture characteristics for a video track.
///
/// `None` fields leave that characteristic unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

impl VideoConstraints {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            frame_rate: Some(frame_rate),
        }
    }

    /// No characteristic is constrained.
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.frame_rate.is_none()
    }
}

/// What the capture device is actually producing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
}

/// An outgoing video track whose capture constraints can be changed
/// while it is live.
#[async_trait]
pub trait VideoTrack: Send + Sync {
    fn id(&self) -> &str;

    /// The track has ended and will never produce frames again.
    fn is_ended(&self) -> bool;

    /// Constraints currently requested on the track.
    fn constraints(&self) -> VideoConstraints;

    /// Settings the device is currently delivering.
    fn settings(&self) -> VideoSettings;

    async fn apply_constraints(&self, constraints: &VideoConstraints) -> Result<(), HuddleError>;
}

/// The local outbound media stream.
#[derive(Clone)]
pub struct LocalStream {
    pub id: String,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub video: Option<Arc<dyn VideoTrack>>,
}

impl LocalStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            audio_enabled: true,
            video_enabled: true,
            video: None,
        }
    }

    pub fn with_video(mut self, track: Arc<dyn VideoTrack>) -> Self {
        self.video = Some(track);
        self
    }
}

impl fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalStream")
            .field("id", &self.id)
            .field("audio_enabled", &self.audio_enabled)
            .field("video_enabled", &self.video_enabled)
            .field("video", &self.video.as_ref().map(|t| t.id().to_string()))
            .finish()
    }
}

/// A media stream received from a remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
}

// ── Peer connections ─────────────────────────────────────────────

/// Aggregate state of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE agent state of the underlying peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// The subset of transport statistics the quality loop reads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectionStats {
    /// Current round-trip time of the selected candidate pair.
    pub rtt_ms: Option<f64>,
    /// Cumulative inbound packets lost.
    pub packets_lost: u64,
    /// Cumulative inbound packets received.
    pub packets_received: u64,
}

impl ConnectionStats {
    /// Fraction of packets lost, or `None` when nothing was counted.
    pub fn loss_ratio(&self) -> Option<f64> {
        let total = self.packets_lost + self.packets_received;
        if total == 0 {
            return None;
        }
        Some(self.packets_lost as f64 / total as f64)
    }
}

/// Read-only view of a transport-level connection, used for statistics
/// sampling only.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn connection_state(&self) -> PeerConnectionState;

    fn ice_connection_state(&self) -> IceConnectionState;

    async fn stats(&self) -> Result<ConnectionStats, HuddleError>;
}

// ── Calls ────────────────────────────────────────────────────────

/// What happened on a call handle.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEventKind {
    /// The remote side's media arrived.
    Stream(RemoteStream),
    /// The call was closed by either side.
    Close,
    /// The transport reported an error on this call.
    Error(String),
}

/// An event raised by a specific call handle.
#[derive(Debug, Clone, PartialEq)]
pub struct CallEvent {
    pub peer_id: String,
    pub call_id: String,
    pub kind: CallEventKind,
}

pub type CallEventSender = mpsc::UnboundedSender<CallEvent>;
pub type CallEventReceiver = mpsc::UnboundedReceiver<CallEvent>;

/// A single media call to one remote peer.
pub trait CallHandle: Send + Sync {
    /// Unique per call attempt, distinct from the peer id.
    fn call_id(&self) -> &str;

    fn peer_id(&self) -> &str;

    /// Whether the transport still considers the call open.
    fn is_open(&self) -> bool;

    /// Answer an inbound call, receive-only when `stream` is `None`.
    fn answer(&self, stream: Option<&LocalStream>) -> Result<(), HuddleError>;

    fn close(&self);

    /// Route this call's stream/close/error events into `events`.
    fn subscribe(&self, events: CallEventSender);

    /// The inspectable underlying connection, once negotiated.
    fn peer_connection(&self) -> Option<Arc<dyn PeerConnection>>;
}

// ── Media transport ──────────────────────────────────────────────

/// The local peer-to-peer transport client.
pub trait MediaTransport: Send + Sync {
    /// Identity assigned by the broker, if any.
    fn identity(&self) -> Option<String>;

    fn is_open(&self) -> bool;

    fn is_destroyed(&self) -> bool;

    fn is_disconnected(&self) -> bool;

    /// Dial `peer_id` with the local stream.
    fn call(&self, peer_id: &str, stream: &LocalStream) -> Result<Arc<dyn CallHandle>, HuddleError>;

    /// Re-establish the broker connection after a disconnect.
    fn reconnect(&self) -> Result<(), HuddleError>;

    fn destroy(&self);
}

/// Builds transport clients; used to rebuild after an identity rotation.
pub trait TransportFactory: Send + Sync {
    fn create(&self, identity: &str) -> Result<Arc<dyn MediaTransport>, HuddleError>;
}

// ── Network hint ─────────────────────────────────────────────────

/// Coarse connection class reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

/// Platform-reported network information.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkHint {
    pub online: bool,
    pub effective_type: Option<EffectiveType>,
    /// Estimated downlink in Mbit/s.
    pub downlink_mbps: Option<f64>,
    /// Estimated round-trip time in milliseconds.
    pub rtt_ms: Option<f64>,
    pub save_data: bool,
}

impl Default for NetworkHint {
    fn default() -> Self {
        Self {
            online: true,
            effective_type: None,
            downlink_mbps: None,
            rtt_ms: None,
            save_data: false,
        }
    }
}

impl NetworkHint {
    pub fn offline() -> Self {
        Self {
            online: false,
            ..Self::default()
        }
    }
}

/// Source of the current [`NetworkHint`].
pub trait NetworkHintSource: Send + Sync {
    fn current(&self) -> NetworkHint;
}
