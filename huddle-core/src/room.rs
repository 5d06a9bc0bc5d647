//! Room session: wires the call manager, the remote desktop controller
//! and the quality loop to one signaling channel and one media
//! transport.
//!
//! Everything here is driven by typed inputs. Signaling events go to
//! [`RoomSession::handle_signal`], transport events to
//! [`RoomSession::handle_transport`], call handle events to
//! [`RoomSession::pump_call_events`]. [`RoomSession::run`] does all of
//! that from a single task.
//!
//! ```text
//!   signaling ──► SignalEvent ──┬─► CallSessionManager (roster)
//!                               └─► RemoteDesktopController (remote-*)
//!   transport ──► TransportEvent ──► CallSessionManager / identity
//!   local media ──► set_local_stream ──► drain + QualityLoop
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::call::{CallSessionManager, CallSnapshot};
use crate::capability::{
    CallEvent, CallEventReceiver, CallHandle, LocalStream, MediaTransport, NetworkHintSource,
    SignalSink, TransportFactory,
};
use crate::error::HuddleError;
use crate::quality::{QualityConfig, QualityHandle, QualityLoop, QualityMode, QualitySignal};
use crate::remote::{RemoteDesktopConfig, RemoteDesktopController, RemoteDesktopSnapshot};
use crate::signal::SignalEvent;
use crate::state::{LinkPhase, ReconnectBackoff};

/// Hex characters appended to the base identity on rotation.
const IDENTITY_SUFFIX_LEN: usize = 8;

// ── Config / inputs ──────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RoomConfig {
    pub quality: QualityConfig,
    pub remote: RemoteDesktopConfig,
    pub reconnect: ReconnectBackoff,
}

/// Lifecycle events of the local media transport.
#[derive(Clone)]
pub enum TransportEvent {
    /// The broker accepted our identity.
    Open,
    IncomingCall(Arc<dyn CallHandle>),
    /// Lost the broker, the client can reconnect.
    Disconnected,
    /// The client is gone for good.
    Closed,
    /// Another client already holds our identity.
    IdTaken,
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "Open"),
            Self::IncomingCall(call) => write!(f, "IncomingCall({})", call.call_id()),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Closed => write!(f, "Closed"),
            Self::IdTaken => write!(f, "IdTaken"),
        }
    }
}

/// Everything [`RoomSession::run`] reacts to.
#[derive(Debug)]
pub enum RoomInput {
    Signal(SignalEvent),
    /// An untyped event straight off the signaling channel.
    RawSignal { event: String, payload: Value },
    Transport(TransportEvent),
    LocalStream(Option<LocalStream>),
    Network(QualitySignal),
    Shutdown,
}

/// Sending half of a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomInput>,
}

impl RoomHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RoomInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, input: RoomInput) -> Result<(), HuddleError> {
        self.tx.send(input)?;
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), HuddleError> {
        self.send(RoomInput::Shutdown)
    }
}

/// Everything a UI would render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub identity: Option<String>,
    pub link: String,
    pub roster: Vec<String>,
    pub calls: CallSnapshot,
    pub remote: RemoteDesktopSnapshot,
    pub quality: Option<QualityMode>,
}

// ── RoomSession ──────────────────────────────────────────────────

pub struct RoomSession {
    base_identity: String,
    config: RoomConfig,
    factory: Arc<dyn TransportFactory>,
    network: Arc<dyn NetworkHintSource>,

    calls: CallSessionManager,
    call_events: CallEventReceiver,
    remote: RemoteDesktopController,
    quality: Option<QualityHandle>,

    link: LinkPhase,
    backoff: ReconnectBackoff,
    reconnect_due: Option<Duration>,
    roster: Vec<String>,
}

impl RoomSession {
    /// Build the transport for `identity` and wire up the subsystems.
    pub fn new(
        identity: &str,
        signal: Arc<dyn SignalSink>,
        factory: Arc<dyn TransportFactory>,
        network: Arc<dyn NetworkHintSource>,
        config: RoomConfig,
    ) -> Result<Self, HuddleError> {
        if identity.is_empty() {
            return Err(HuddleError::InvalidPeer(identity.to_string()));
        }
        let transport = factory.create(identity)?;
        let (calls, call_events) = CallSessionManager::new(transport);

        let mut remote = RemoteDesktopController::new(signal, config.remote.clone());
        remote.set_identity(calls.identity().map(str::to_string));

        let mut link = LinkPhase::default();
        link.begin_connect()?;

        Ok(Self {
            base_identity: identity.to_string(),
            backoff: config.reconnect.clone(),
            config,
            factory,
            network,
            calls,
            call_events,
            remote,
            quality: None,
            link,
            reconnect_due: None,
            roster: Vec::new(),
        })
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn identity(&self) -> Option<&str> {
        self.calls.identity()
    }

    pub fn calls(&self) -> &CallSessionManager {
        &self.calls
    }

    pub fn remote(&self) -> &RemoteDesktopController {
        &self.remote
    }

    /// User operations on the remote desktop controller go through here.
    pub fn remote_mut(&mut self) -> &mut RemoteDesktopController {
        &mut self.remote
    }

    pub fn link(&self) -> &LinkPhase {
        &self.link
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn quality_mode(&self) -> Option<QualityMode> {
        self.quality.as_ref().map(QualityHandle::mode)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            identity: self.identity().map(str::to_string),
            link: self.link.to_string(),
            roster: self.roster.clone(),
            calls: self.calls.snapshot(),
            remote: self.remote.snapshot(),
            quality: self.quality_mode(),
        }
    }

    // ── Signaling ─────────────────────────────────────────────────

    /// Validate and dispatch a raw signaling event. Malformed or
    /// unknown events are logged and dropped.
    pub fn handle_raw_signal(&mut self, event: &str, payload: Value) -> bool {
        match SignalEvent::parse(event, payload) {
            Ok(parsed) => {
                self.handle_signal(parsed);
                true
            }
            Err(e) => {
                warn!("dropping signal: {e}");
                false
            }
        }
    }

    pub fn handle_signal(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::Connected => self.on_signal_connected(),
            SignalEvent::Disconnected { reason } => self.on_signal_disconnected(reason),
            SignalEvent::UserJoined { user_id } => {
                if !self.roster.contains(&user_id) {
                    self.roster.push(user_id.clone());
                }
                self.call_or_queue(&user_id);
            }
            SignalEvent::UserLeft { user_id } => {
                self.roster.retain(|id| *id != user_id);
                self.calls.remove_participant(&user_id);
            }
            SignalEvent::Roster(ids) => {
                self.calls.fetch_participant_list(&ids);
                self.roster = ids;
            }
            SignalEvent::Remote(event) => self.remote.dispatch(event),
        }
    }

    fn on_signal_connected(&mut self) {
        match self.link.connected() {
            Ok(true) => info!("signaling reconnected"),
            Ok(false) => info!("signaling connected"),
            Err(e) => debug!("{e}"),
        }
        if !self.link.is_connected() {
            self.link = LinkPhase::Connected {
                since: std::time::Instant::now(),
            };
        }
        self.remote.handle_reconnect();
        self.calls.drain_pending_participants(None, None);
    }

    fn on_signal_disconnected(&mut self, reason: Option<String>) {
        let attempt = self.link.lost().unwrap_or(1);
        warn!(?reason, attempt, "signaling disconnected, resetting room state");
        self.calls.clear_all_peer_connections();
        self.remote.handle_disconnect();
        self.roster.clear();
    }

    // ── Transport ─────────────────────────────────────────────────

    pub fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                info!(identity = ?self.identity(), "transport open");
                self.backoff.reset();
                self.reconnect_due = None;
                self.sync_identity();
                self.calls.drain_pending_participants(None, None);
            }
            TransportEvent::IncomingCall(call) => {
                self.calls.accept_incoming_call(call);
            }
            TransportEvent::Disconnected => {
                let delay = self.backoff.next_delay();
                info!(?delay, attempt = self.backoff.attempts(), "transport disconnected");
                self.reconnect_due = Some(delay);
            }
            TransportEvent::Closed => {
                warn!("transport closed, rebuilding");
                let identity = self
                    .identity()
                    .map(str::to_string)
                    .unwrap_or_else(|| self.base_identity.clone());
                self.rebuild_transport(&identity);
            }
            TransportEvent::IdTaken => self.rotate_identity(),
        }
    }

    /// Delay before [`reconnect_transport`](Self::reconnect_transport)
    /// should run, if a reconnect is owed.
    pub fn take_reconnect_delay(&mut self) -> Option<Duration> {
        self.reconnect_due.take()
    }

    /// Reconnect a disconnected transport, or rebuild a destroyed one.
    pub fn reconnect_transport(&mut self) {
        let transport = Arc::clone(self.calls.transport());
        if transport.is_destroyed() {
            let identity = self
                .identity()
                .map(str::to_string)
                .unwrap_or_else(|| self.base_identity.clone());
            self.rebuild_transport(&identity);
            return;
        }
        if let Err(e) = transport.reconnect() {
            let delay = self.backoff.next_delay();
            warn!(?delay, "transport reconnect failed: {e}");
            self.reconnect_due = Some(delay);
        }
    }

    /// Pick a fresh identity after a collision and start over with it.
    fn rotate_identity(&mut self) {
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(IDENTITY_SUFFIX_LEN)
            .collect();
        let next = format!("{}-{}", self.base_identity, suffix);
        warn!(old = ?self.identity(), new = %next, "identity taken, rotating");
        self.rebuild_transport(&next);
    }

    fn rebuild_transport(&mut self, identity: &str) {
        let replacement = match self.factory.create(identity) {
            Ok(t) => t,
            Err(e) => {
                warn!(identity, "transport rebuild failed: {e}");
                self.reconnect_due = Some(self.backoff.next_delay());
                return;
            }
        };

        let previous = self.identity().map(str::to_string);
        self.calls.clear_all_peer_connections();
        self.calls.transport().destroy();
        self.install_transport(replacement);

        // Everyone we knew about is redialed once the new client opens.
        let roster: Vec<String> = self
            .roster
            .iter()
            .filter(|id| Some(id.as_str()) != previous.as_deref())
            .cloned()
            .collect();
        self.calls.add_pending_participants(roster);
    }

    fn install_transport(&mut self, transport: Arc<dyn MediaTransport>) {
        self.calls.set_transport(transport);
        self.sync_identity();
    }

    fn sync_identity(&mut self) {
        let identity = self.calls.transport().identity();
        self.calls.set_identity(identity.clone());
        self.remote.set_identity(identity);
    }

    // ── Calls ─────────────────────────────────────────────────────

    /// Dial `peer_id` now if possible, queue it otherwise.
    pub fn call_or_queue(&mut self, peer_id: &str) -> bool {
        let placed = match self.try_call(peer_id) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = peer_id, "queueing: {e}");
                false
            }
        };
        if !placed {
            self.calls.add_pending_participants([peer_id]);
        }
        placed
    }

    fn try_call(&mut self, peer_id: &str) -> Result<(), HuddleError> {
        if peer_id.is_empty() {
            return Err(HuddleError::InvalidPeer(peer_id.to_string()));
        }
        if !self.calls.is_call_ready() {
            return Err(HuddleError::NotCallReady);
        }
        let identity = self
            .calls
            .identity()
            .map(str::to_string)
            .ok_or(HuddleError::NotCallReady)?;
        let stream = self.calls.local_stream().cloned();
        if self
            .calls
            .start_call_to_participant(&identity, stream.as_ref(), peer_id)
        {
            Ok(())
        } else {
            Err(HuddleError::Transport(format!("dial {peer_id} failed")))
        }
    }

    /// Feed every queued call handle event to the manager.
    pub fn pump_call_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.call_events.try_recv() {
            self.calls.handle_call_event(event);
            handled += 1;
        }
        handled
    }

    pub fn handle_call_event(&mut self, event: CallEvent) {
        self.calls.handle_call_event(event);
    }

    // ── Local media ───────────────────────────────────────────────

    /// Swap the local stream: drain queued peers and restart the
    /// quality loop for the new video track. Must run inside a Tokio
    /// runtime when the stream carries video.
    pub fn set_local_stream(&mut self, stream: Option<LocalStream>) {
        if let Some(handle) = self.quality.take() {
            handle.stop();
        }

        let track = stream.as_ref().and_then(|s| s.video.clone());
        self.calls.set_local_stream(stream);

        if let Some(track) = track {
            let quality = QualityLoop::new(
                self.config.quality.clone(),
                track,
                Arc::clone(&self.network),
                self.calls.watch_peer_connections(),
            );
            self.quality = Some(quality.spawn());
        }

        self.calls.drain_pending_participants(None, None);
    }

    /// Forward a platform network event to the quality loop.
    pub fn notify_network(&self, signal: QualitySignal) {
        if let Some(handle) = &self.quality {
            handle.notify(signal);
        }
    }

    // ── Teardown ──────────────────────────────────────────────────

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.quality.take() {
            handle.stop();
        }
        self.calls.clear_all_peer_connections();
        self.calls.transport().destroy();
        self.link.shutdown();
        info!("room shut down");
    }

    // ── Actor loop ────────────────────────────────────────────────

    /// Drive the room from `inbox` until `Shutdown` or the channel
    /// closes. Returns the final state.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<RoomInput>) -> RoomSnapshot {
        let (_, idle) = mpsc::unbounded_channel();
        let mut call_events = std::mem::replace(&mut self.call_events, idle);
        let mut reconnect_at: Option<Instant> = None;

        loop {
            tokio::select! {
                input = inbox.recv() => match input {
                    Some(RoomInput::Shutdown) | None => break,
                    Some(input) => self.handle_input(input),
                },
                Some(event) = call_events.recv() => self.calls.handle_call_event(event),
                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    reconnect_at = None;
                    self.reconnect_transport();
                }
            }

            if let Some(delay) = self.take_reconnect_delay() {
                reconnect_at = Some(Instant::now() + delay);
            }
        }

        self.call_events = call_events;
        self.pump_call_events();
        self.shutdown();
        self.snapshot()
    }

    fn handle_input(&mut self, input: RoomInput) {
        match input {
            RoomInput::Signal(event) => self.handle_signal(event),
            RoomInput::RawSignal { event, payload } => {
                self.handle_raw_signal(&event, payload);
            }
            RoomInput::Transport(event) => self.handle_transport(event),
            RoomInput::LocalStream(stream) => self.set_local_stream(stream),
            RoomInput::Network(signal) => self.notify_network(signal),
            RoomInput::Shutdown => {}
        }
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("base_identity", &self.base_identity)
            .field("link", &self.link)
            .field("calls", &self.calls)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────
