//! In-memory implementations of the capability traits.
//!
//! Nothing here touches a network or a camera. The types record what
//! the core asked of them and let a driver (the replay tool, or a test)
//! flip their state by hand.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::capability::{
    CallEvent, CallEventKind, CallEventSender, CallHandle, ConnectionStats, IceConnectionState,
    LocalStream, MediaTransport, NetworkHint, NetworkHintSource, PeerConnection,
    PeerConnectionState, RemoteStream, SignalSink, TransportFactory, VideoConstraints,
    VideoSettings, VideoTrack,
};
use crate::error::HuddleError;
use crate::signal::OutboundSignal;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── RecordingSignal ──────────────────────────────────────────────

/// A signaling sink that records every emitted event.
#[derive(Debug)]
pub struct RecordingSignal {
    sent: Mutex<Vec<OutboundSignal>>,
    connected: AtomicBool,
    failing: AtomicBool,
}

impl RecordingSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        })
    }

    /// Everything emitted so far.
    pub fn sent(&self) -> Vec<OutboundSignal> {
        lock(&self.sent).clone()
    }

    /// Drain the record.
    pub fn take(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut *lock(&self.sent))
    }

    /// Event names emitted so far, in order.
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.sent).iter().map(OutboundSignal::name).collect()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every subsequent emit fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl SignalSink for RecordingSignal {
    fn emit(&self, signal: &OutboundSignal) -> Result<(), HuddleError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HuddleError::Signal(format!("{} rejected", signal.name())));
        }
        lock(&self.sent).push(signal.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ── SimPeerConnection ────────────────────────────────────────────

#[derive(Debug)]
pub struct SimPeerConnection {
    states: Mutex<(PeerConnectionState, IceConnectionState)>,
    stats: Mutex<Result<ConnectionStats, String>>,
}

impl SimPeerConnection {
    pub fn connected() -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new((PeerConnectionState::Connected, IceConnectionState::Connected)),
            stats: Mutex::new(Ok(ConnectionStats::default())),
        })
    }

    pub fn set_connection_state(&self, state: PeerConnectionState) {
        lock(&self.states).0 = state;
    }

    pub fn set_ice_state(&self, state: IceConnectionState) {
        lock(&self.states).1 = state;
    }

    pub fn set_stats(&self, stats: ConnectionStats) {
        *lock(&self.stats) = Ok(stats);
    }

    pub fn fail_stats(&self, reason: impl Into<String>) {
        *lock(&self.stats) = Err(reason.into());
    }
}

#[async_trait]
impl PeerConnection for SimPeerConnection {
    fn connection_state(&self) -> PeerConnectionState {
        lock(&self.states).0
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        lock(&self.states).1
    }

    async fn stats(&self) -> Result<ConnectionStats, HuddleError> {
        lock(&self.stats).clone().map_err(HuddleError::Stats)
    }
}

// ── SimCall ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimCall {
    call_id: String,
    peer_id: String,
    open: AtomicBool,
    answered: AtomicBool,
    closed: AtomicBool,
    fail_answer: AtomicBool,
    events: Mutex<Option<CallEventSender>>,
    connection: Mutex<Option<Arc<SimPeerConnection>>>,
}

impl SimCall {
    /// A call the local side placed.
    pub fn outbound(call_id: impl Into<String>, peer_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            call_id: call_id.into(),
            peer_id: peer_id.into(),
            open: AtomicBool::new(true),
            answered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_answer: AtomicBool::new(false),
            events: Mutex::new(None),
            connection: Mutex::new(None),
        })
    }

    /// A call offered by a remote peer.
    pub fn inbound(call_id: impl Into<String>, peer_id: impl Into<String>) -> Arc<Self> {
        Self::outbound(call_id, peer_id)
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn set_fail_answer(&self, fail: bool) {
        self.fail_answer.store(fail, Ordering::SeqCst);
    }

    pub fn attach_connection(&self, pc: Arc<SimPeerConnection>) {
        *lock(&self.connection) = Some(pc);
    }

    pub fn connection(&self) -> Option<Arc<SimPeerConnection>> {
        lock(&self.connection).clone()
    }

    pub fn was_answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.events).is_some()
    }

    /// Raise an event as the transport would.
    pub fn raise(&self, kind: CallEventKind) -> bool {
        let Some(tx) = lock(&self.events).clone() else {
            return false;
        };
        tx.send(CallEvent {
            peer_id: self.peer_id.clone(),
            call_id: self.call_id.clone(),
            kind,
        })
        .is_ok()
    }

    /// Remote media arrived; also negotiates a connection if none yet.
    pub fn deliver_stream(&self, stream_id: impl Into<String>) -> bool {
        if self.connection().is_none() {
            self.attach_connection(SimPeerConnection::connected());
        }
        self.raise(CallEventKind::Stream(RemoteStream {
            id: stream_id.into(),
        }))
    }
}

impl CallHandle for SimCall {
    fn call_id(&self) -> &str {
        &self.call_id
    }

    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn answer(&self, _stream: Option<&LocalStream>) -> Result<(), HuddleError> {
        if self.fail_answer.load(Ordering::SeqCst) {
            return Err(HuddleError::Transport(format!("answer to {} failed", self.peer_id)));
        }
        self.answered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        let already = self.closed.swap(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        if let Some(pc) = self.connection() {
            pc.set_connection_state(PeerConnectionState::Closed);
        }
        if !already {
            self.raise(CallEventKind::Close);
        }
    }

    fn subscribe(&self, events: CallEventSender) {
        *lock(&self.events) = Some(events);
    }

    fn peer_connection(&self) -> Option<Arc<dyn PeerConnection>> {
        self.connection().map(|pc| pc as Arc<dyn PeerConnection>)
    }
}

// ── SimTransport ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimTransport {
    identity: String,
    open: AtomicBool,
    destroyed: AtomicBool,
    disconnected: AtomicBool,
    fail_calls: AtomicBool,
    reconnects: AtomicU32,
    next_call: AtomicU64,
    calls: Mutex<Vec<Arc<SimCall>>>,
}

impl SimTransport {
    /// An open transport with the given broker identity.
    pub fn new(identity: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            identity: identity.into(),
            open: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            fail_calls: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            next_call: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub fn set_fail_calls(&self, fail: bool) {
        self.fail_calls.store(fail, Ordering::SeqCst);
    }

    pub fn destroy_now(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }

    /// Peer ids dialed so far, in order.
    pub fn dialed(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .map(|c| c.peer_id().to_string())
            .collect()
    }

    /// Most recent call placed to `peer_id`.
    pub fn last_call(&self, peer_id: &str) -> Option<Arc<SimCall>> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|c| c.peer_id() == peer_id)
            .cloned()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl MediaTransport for SimTransport {
    fn identity(&self) -> Option<String> {
        Some(self.identity.clone()).filter(|id| !id.is_empty())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn call(&self, peer_id: &str, _stream: &LocalStream) -> Result<Arc<dyn CallHandle>, HuddleError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(HuddleError::Transport(format!("dial {peer_id} failed")));
        }
        let n = self.next_call.fetch_add(1, Ordering::SeqCst);
        let call = SimCall::outbound(format!("{}->{}#{}", self.identity, peer_id, n), peer_id);
        lock(&self.calls).push(Arc::clone(&call));
        Ok(call)
    }

    fn reconnect(&self) -> Result<(), HuddleError> {
        if self.is_destroyed() {
            return Err(HuddleError::Transport("transport destroyed".into()));
        }
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.disconnected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.destroy_now();
    }
}

/// Builds [`SimTransport`]s and keeps every one it built.
#[derive(Debug, Default)]
pub struct SimTransportFactory {
    created: Mutex<Vec<Arc<SimTransport>>>,
}

impl SimTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<Arc<SimTransport>> {
        lock(&self.created).clone()
    }
}

impl TransportFactory for SimTransportFactory {
    fn create(&self, identity: &str) -> Result<Arc<dyn MediaTransport>, HuddleError> {
        let transport = SimTransport::new(identity);
        lock(&self.created).push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ── SimVideoTrack ────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimVideoTrack {
    id: String,
    ended: AtomicBool,
    failing: AtomicBool,
    constraints: Mutex<VideoConstraints>,
    applied: Mutex<Vec<VideoConstraints>>,
}

impl SimVideoTrack {
    pub fn new(id: impl Into<String>, initial: VideoConstraints) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            ended: AtomicBool::new(false),
            failing: AtomicBool::new(false),
            constraints: Mutex::new(initial),
            applied: Mutex::new(Vec::new()),
        })
    }

    /// Every successfully applied constraint set, in order.
    pub fn applied(&self) -> Vec<VideoConstraints> {
        lock(&self.applied).clone()
    }

    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoTrack for SimVideoTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn constraints(&self) -> VideoConstraints {
        *lock(&self.constraints)
    }

    fn settings(&self) -> VideoSettings {
        let c = *lock(&self.constraints);
        VideoSettings {
            width: c.width,
            height: c.height,
            frame_rate: c.frame_rate,
        }
    }

    async fn apply_constraints(&self, constraints: &VideoConstraints) -> Result<(), HuddleError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HuddleError::Constraint(format!("{} rejected constraints", self.id)));
        }
        *lock(&self.constraints) = *constraints;
        lock(&self.applied).push(*constraints);
        Ok(())
    }
}

// ── SimNetwork ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimNetwork {
    hint: Mutex<NetworkHint>,
}

impl SimNetwork {
    pub fn new(hint: NetworkHint) -> Arc<Self> {
        Arc::new(Self {
            hint: Mutex::new(hint),
        })
    }

    pub fn set(&self, hint: NetworkHint) {
        *lock(&self.hint) = hint;
    }
}

impl NetworkHintSource for SimNetwork {
    fn current(&self) -> NetworkHint {
        *lock(&self.hint)
    }
}
