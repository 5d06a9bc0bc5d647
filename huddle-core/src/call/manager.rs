//! Call session manager: peer id → active call.
//!
//! Owns the call records and the pending-participant queue. Nothing
//! outside this type mutates either; the quality loop reads the live
//! peer connections through a `watch` snapshot.
//!
//! ```text
//!   roster / user-joined
//!          │
//!          ▼
//!   start_call_to_participant ──(not call-ready)──► pending queue
//!          │                                           │
//!          ▼                                           │ drain on
//!   setup_call_handlers ◄──────────────────────────────┘ readiness
//!          │
//!          ▼
//!   CallEvent {stream | close | error} ──► handle_call_event
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::call::utils::{CallHealth, call_health, is_transport_ready, should_initiate};
use crate::capability::{
    CallEvent, CallEventKind, CallEventReceiver, CallEventSender, CallHandle, LocalStream,
    MediaTransport, PeerConnection, RemoteStream,
};

/// Live peer connections, as published to readers.
pub type PeerConnections = Vec<Arc<dyn PeerConnection>>;

// ── CallRecord ───────────────────────────────────────────────────

/// The authoritative call for one peer.
pub struct CallRecord {
    pub call: Arc<dyn CallHandle>,
    pub remote_stream: Option<RemoteStream>,
}

impl CallRecord {
    pub fn health(&self) -> CallHealth {
        call_health(self.call.as_ref())
    }

    pub fn call_id(&self) -> &str {
        self.call.call_id()
    }
}

impl std::fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRecord")
            .field("call_id", &self.call.call_id())
            .field("peer_id", &self.call.peer_id())
            .field("remote_stream", &self.remote_stream)
            .finish()
    }
}

// ── Notifications / snapshots ────────────────────────────────────

/// Changes the UI layer cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum CallManagerEvent {
    StreamAdded { peer_id: String, stream: RemoteStream },
    CallRemoved { peer_id: String, call_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub peer_id: String,
    pub call_id: String,
    pub health: CallHealth,
    pub has_stream: bool,
}

/// Immutable view of the manager's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub calls: Vec<CallSummary>,
    pub pending: Vec<String>,
}

impl CallSnapshot {
    /// Peers with a healthy call, sorted.
    pub fn healthy_peers(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter(|c| c.health.is_healthy())
            .map(|c| c.peer_id.clone())
            .collect()
    }
}

// ── CallSessionManager ───────────────────────────────────────────

pub struct CallSessionManager {
    transport: Arc<dyn MediaTransport>,
    identity: Option<String>,
    local_stream: Option<LocalStream>,

    calls: HashMap<String, CallRecord>,
    pending: HashSet<String>,

    call_events_tx: CallEventSender,
    notify_tx: Option<mpsc::UnboundedSender<CallManagerEvent>>,
    connections_tx: watch::Sender<PeerConnections>,
}

impl CallSessionManager {
    /// Create a manager dialing through `transport`.
    ///
    /// The returned receiver carries every call handle's events; feed
    /// them back through [`handle_call_event`](Self::handle_call_event).
    pub fn new(transport: Arc<dyn MediaTransport>) -> (Self, CallEventReceiver) {
        let (call_events_tx, call_events_rx) = mpsc::unbounded_channel();
        let (connections_tx, _) = watch::channel(Vec::new());
        let identity = transport.identity();
        let manager = Self {
            transport,
            identity,
            local_stream: None,
            calls: HashMap::new(),
            pending: HashSet::new(),
            call_events_tx,
            notify_tx: None,
            connections_tx,
        };
        (manager, call_events_rx)
    }

    /// Route stream/removal notifications to `tx`.
    pub fn set_notifier(&mut self, tx: mpsc::UnboundedSender<CallManagerEvent>) {
        self.notify_tx = Some(tx);
    }

    // ── Local context ─────────────────────────────────────────────

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity.filter(|id| !id.is_empty());
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn set_local_stream(&mut self, stream: Option<LocalStream>) {
        self.local_stream = stream;
    }

    pub fn transport(&self) -> &Arc<dyn MediaTransport> {
        &self.transport
    }

    /// Swap the transport client, e.g. after an identity rotation. The
    /// caller is expected to have cleared calls made on the old one.
    pub fn set_transport(&mut self, transport: Arc<dyn MediaTransport>) {
        self.identity = transport.identity();
        self.transport = transport;
    }

    /// Transport ready, identity known, local stream present.
    pub fn is_call_ready(&self) -> bool {
        self.identity.is_some()
            && self.local_stream.is_some()
            && is_transport_ready(self.transport.as_ref())
    }

    // ── Call registration ─────────────────────────────────────────

    /// Make `call` the authoritative call for `peer_id`.
    ///
    /// Registering the same call twice is a no-op; registering a
    /// different call closes the previous one first.
    pub fn setup_call_handlers(&mut self, call: Arc<dyn CallHandle>, peer_id: &str) {
        if let Some(existing) = self.calls.get(peer_id) {
            if existing.call_id() == call.call_id() {
                return;
            }
            debug!(peer = peer_id, old = existing.call_id(), new = call.call_id(), "replacing call");
            self.teardown(peer_id);
        }

        call.subscribe(self.call_events_tx.clone());
        self.pending.remove(peer_id);
        self.calls.insert(
            peer_id.to_string(),
            CallRecord {
                call,
                remote_stream: None,
            },
        );
        self.publish_connections();
    }

    /// Dispatch a call handle event. Events from a call that is no
    /// longer the record for its peer are ignored.
    pub fn handle_call_event(&mut self, event: CallEvent) {
        let Some(record) = self.calls.get_mut(&event.peer_id) else {
            debug!(peer = %event.peer_id, call = %event.call_id, "event for unknown call ignored");
            return;
        };
        if record.call_id() != event.call_id {
            debug!(peer = %event.peer_id, call = %event.call_id, "event for replaced call ignored");
            return;
        }

        match event.kind {
            CallEventKind::Stream(stream) => {
                record.remote_stream = Some(stream.clone());
                self.notify(CallManagerEvent::StreamAdded {
                    peer_id: event.peer_id,
                    stream,
                });
                // The peer connection is usually negotiated by now.
                self.publish_connections();
            }
            CallEventKind::Close => {
                info!(peer = %event.peer_id, "call closed");
                self.teardown(&event.peer_id);
            }
            CallEventKind::Error(reason) => {
                warn!(peer = %event.peer_id, %reason, "call error");
                self.teardown(&event.peer_id);
            }
        }
    }

    /// Answer an inbound call and register it.
    pub fn accept_incoming_call(&mut self, call: Arc<dyn CallHandle>) -> bool {
        let peer_id = call.peer_id().to_string();
        if peer_id.is_empty() || self.identity.as_deref() == Some(peer_id.as_str()) {
            warn!(peer = %peer_id, "rejecting inbound call from invalid peer");
            call.close();
            return false;
        }
        if let Err(e) = call.answer(self.local_stream.as_ref()) {
            warn!(peer = %peer_id, "answer failed: {e}");
            call.close();
            return false;
        }
        self.setup_call_handlers(call, &peer_id);
        true
    }

    // ── Dialing ───────────────────────────────────────────────────

    /// Dial `peer_id` if this side is the initiator.
    ///
    /// Returns `false` only when the call could not be placed and the
    /// peer should be queued. Self-calls, peers the other side will
    /// dial, and peers with a healthy call are successes.
    pub fn start_call_to_participant(
        &mut self,
        local_identity: &str,
        local_stream: Option<&LocalStream>,
        peer_id: &str,
    ) -> bool {
        if peer_id.is_empty() || peer_id == local_identity {
            return true;
        }
        if local_identity.is_empty() {
            return false;
        }
        if !should_initiate(local_identity, peer_id) {
            debug!(peer = peer_id, "waiting for peer to dial");
            return true;
        }

        if let Some(record) = self.calls.get(peer_id) {
            if record.health().is_healthy() {
                return true;
            }
            debug!(peer = peer_id, "tearing down unhealthy call before redial");
            self.teardown(peer_id);
        }

        let Some(stream) = local_stream else {
            return false;
        };
        if !is_transport_ready(self.transport.as_ref()) {
            return false;
        }

        match self.transport.call(peer_id, stream) {
            Ok(call) => {
                info!(peer = peer_id, call = call.call_id(), "dialing");
                self.setup_call_handlers(call, peer_id);
                true
            }
            Err(e) => {
                warn!(peer = peer_id, "dial failed: {e}");
                false
            }
        }
    }

    // ── Pending queue ─────────────────────────────────────────────

    /// Queue peers for a later call attempt. Duplicates, empty ids, the
    /// local identity, and peers with a healthy call are skipped.
    pub fn add_pending_participants<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if id.is_empty() || self.identity.as_deref() == Some(id.as_str()) {
                continue;
            }
            match self.calls.get(&id).map(CallRecord::health) {
                Some(CallHealth::Healthy) => continue,
                Some(CallHealth::Closing) => self.teardown(&id),
                None => {}
            }
            self.pending.insert(id);
        }
    }

    /// Retry every queued peer. Returns `true` when nothing remains.
    ///
    /// The queue is swapped out before iterating, so entries queued
    /// while draining survive and are not processed twice.
    pub fn drain_pending_participants(
        &mut self,
        identity_override: Option<&str>,
        stream_override: Option<&LocalStream>,
    ) -> bool {
        let queued = std::mem::take(&mut self.pending);
        if queued.is_empty() {
            return true;
        }

        let identity = identity_override
            .map(str::to_string)
            .or_else(|| self.identity.clone());
        let stream = stream_override.cloned().or_else(|| self.local_stream.clone());

        let mut queued: Vec<String> = queued.into_iter().collect();
        queued.sort();

        let mut failed = Vec::new();
        for peer in queued {
            let placed = match identity.as_deref() {
                Some(identity) => self.start_call_to_participant(identity, stream.as_ref(), &peer),
                None => false,
            };
            if !placed {
                failed.push(peer);
            }
        }

        let drained = failed.is_empty();
        if !drained {
            debug!(remaining = failed.len(), "pending participants requeued");
        }
        self.pending.extend(failed);
        drained
    }

    pub fn pending_participants(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.iter().cloned().collect();
        ids.sort();
        ids
    }

    // ── Roster reconciliation ─────────────────────────────────────

    /// Reconcile local calls against the full authoritative roster.
    pub fn fetch_participant_list(&mut self, roster: &[String]) {
        let identity = self.identity.clone();
        let wanted: HashSet<&str> = roster
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty() && Some(*id) != identity.as_deref())
            .collect();

        let stale: Vec<String> = self
            .calls
            .iter()
            .filter(|(peer, record)| {
                !wanted.contains(peer.as_str()) || !record.health().is_healthy()
            })
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in &stale {
            self.teardown(peer);
        }
        self.pending.retain(|id| wanted.contains(id.as_str()));

        let mut missing: Vec<&str> = wanted
            .iter()
            .copied()
            .filter(|id| !self.calls.contains_key(*id))
            .collect();
        missing.sort_unstable();

        let ready = self.is_call_ready();
        let stream = self.local_stream.clone();
        for peer in missing {
            let placed = match (ready, identity.as_deref()) {
                (true, Some(identity)) => {
                    self.start_call_to_participant(identity, stream.as_ref(), peer)
                }
                _ => false,
            };
            if !placed {
                self.pending.insert(peer.to_string());
            }
        }

        info!(
            roster = wanted.len(),
            calls = self.calls.len(),
            pending = self.pending.len(),
            "roster reconciled"
        );
    }

    /// Forget a participant who left the room.
    pub fn remove_participant(&mut self, peer_id: &str) {
        self.pending.remove(peer_id);
        self.teardown(peer_id);
    }

    // ── Read access ───────────────────────────────────────────────

    /// Live transport connections, for statistics only.
    pub fn get_peer_connections(&self) -> PeerConnections {
        self.calls
            .values()
            .filter_map(|r| r.call.peer_connection())
            .collect()
    }

    /// Subscribe to the live connection set.
    pub fn watch_peer_connections(&self) -> watch::Receiver<PeerConnections> {
        self.connections_tx.subscribe()
    }

    pub fn has_call(&self, peer_id: &str) -> bool {
        self.calls.contains_key(peer_id)
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let mut calls: Vec<CallSummary> = self
            .calls
            .iter()
            .map(|(peer, r)| CallSummary {
                peer_id: peer.clone(),
                call_id: r.call_id().to_string(),
                health: r.health(),
                has_stream: r.remote_stream.is_some(),
            })
            .collect();
        calls.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        CallSnapshot {
            calls,
            pending: self.pending_participants(),
        }
    }

    // ── Teardown ──────────────────────────────────────────────────

    /// Close every call and forget all derived state.
    pub fn clear_all_peer_connections(&mut self) {
        let peers: Vec<String> = self.calls.keys().cloned().collect();
        for peer in &peers {
            self.teardown(peer);
        }
        self.pending.clear();
        self.publish_connections();
        if !peers.is_empty() {
            info!(closed = peers.len(), "all calls cleared");
        }
    }

    fn teardown(&mut self, peer_id: &str) {
        let Some(record) = self.calls.remove(peer_id) else {
            return;
        };
        record.call.close();
        self.notify(CallManagerEvent::CallRemoved {
            peer_id: peer_id.to_string(),
            call_id: record.call_id().to_string(),
        });
        self.publish_connections();
    }

    fn notify(&self, event: CallManagerEvent) {
        if let Some(tx) = &self.notify_tx {
            let _ = tx.send(event);
        }
    }

    fn publish_connections(&self) {
        self.connections_tx.send_replace(self.get_peer_connections());
    }
}

impl std::fmt::Debug for CallSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSessionManager")
            .field("identity", &self.identity)
            .field("calls", &self.calls)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────
