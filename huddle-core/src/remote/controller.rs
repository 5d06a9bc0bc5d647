//! Remote desktop session controller.
//!
//! One controller per local participant. It owns every piece of remote
//! desktop state (session, outbound request, incoming approvals, host
//! registry, deferred auto-claim / auto-request targets) and is driven
//! by two things only: user operations, and [`RemoteEvent`]s passed to
//! [`RemoteDesktopController::dispatch`].
//!
//! ```text
//!   Idle ──request──► (emit) ──pending──► Pending ──started──► Active
//!    ▲                                      │                    │
//!    └───────────── error / stop ───────────┘◄── ended / stop ───┘
//! ```
//!
//! Overlays: `IncomingApproval`, `Error`, and the `SetupPending`
//! host-bootstrap sub-flow.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::SignalSink;
use crate::remote::frames::{FrameRelay, FrameSubscription};
use crate::remote::hosts::{HostAnnouncement, HostRecord, HostRegistry};
use crate::remote::input::RemoteInput;
use crate::remote::types::{
    HostClaimed, HostInstallPrompt, HostSetupPendingRequest, HostSetupRequest, HostSetupResult,
    IncomingApprovalRequest, PendingRequest, RemoteDesktopSession, RemoteFrame, SessionEnded,
    SessionErrorEvent, SessionErrorInfo, SessionStarted,
};
use crate::signal::{OutboundSignal, RemoteEvent};

/// Where users fetch the host agent when none is reachable.
pub const DEFAULT_HOST_APP_DOWNLOAD_URL: &str = "/downloads/huddle-host";

/// Error codes that mean "there is no host agent to talk to".
pub const DEFAULT_HOST_UNREACHABLE_CODES: &[&str] = &[
    "host-offline",
    "host-unavailable",
    "host-not-found",
    "host-not-connected",
    "host-app-required",
];

/// Error code recorded when a participant declines to start a host.
pub const SETUP_DECLINED: &str = "setup-declined";

/// How many cancelled request ids are remembered for stale-event checks.
const CANCELLED_REQUESTS_KEPT: usize = 8;

// ── Configuration ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDesktopConfig {
    pub host_app_download_url: String,
    pub host_unreachable_codes: HashSet<String>,
}

impl Default for RemoteDesktopConfig {
    fn default() -> Self {
        Self {
            host_app_download_url: DEFAULT_HOST_APP_DOWNLOAD_URL.to_string(),
            host_unreachable_codes: DEFAULT_HOST_UNREACHABLE_CODES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

impl RemoteDesktopConfig {
    pub fn is_host_unreachable(&self, code: &str) -> bool {
        self.host_unreachable_codes.contains(code)
    }
}

// ── Reconnect intent / snapshot ──────────────────────────────────

/// What the user was doing when the signaling link dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectIntent {
    pub host_id: String,
    /// A session was active, so it should be re-requested too.
    pub resume_session: bool,
}

/// Immutable copy of the controller's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDesktopSnapshot {
    pub session: Option<RemoteDesktopSession>,
    pub pending: Option<PendingRequest>,
    pub incoming_approval: Option<IncomingApprovalRequest>,
    pub incoming_setup: Option<HostSetupRequest>,
    pub setup_pending: Option<HostSetupPendingRequest>,
    pub error: Option<SessionErrorInfo>,
    pub install_prompt: Option<HostInstallPrompt>,
    pub claimed_host_id: Option<String>,
    pub hosts: Vec<HostRecord>,
    pub auto_claim_target: Option<String>,
    pub auto_request_target: Option<String>,
    pub first_frame_received: bool,
    pub setup_download_url: Option<String>,
}

// ── RemoteDesktopController ──────────────────────────────────────

pub struct RemoteDesktopController {
    signal: Arc<dyn SignalSink>,
    config: RemoteDesktopConfig,
    identity: Option<String>,

    session: Option<RemoteDesktopSession>,
    pending: Option<PendingRequest>,
    incoming_approval: Option<IncomingApprovalRequest>,
    incoming_setup: Option<HostSetupRequest>,
    setup_pending: Option<HostSetupPendingRequest>,
    error: Option<SessionErrorInfo>,
    install_prompt: Option<HostInstallPrompt>,

    claimed_host_id: Option<String>,
    hosts: HostRegistry,
    auto_claim_target: Option<String>,
    auto_request_target: Option<String>,
    setup_download_url: Option<String>,

    first_frame_received: bool,
    /// Request ids the user cancelled, newest last.
    cancelled_requests: VecDeque<String>,
    frames: FrameRelay,
}

impl RemoteDesktopController {
    pub fn new(signal: Arc<dyn SignalSink>, config: RemoteDesktopConfig) -> Self {
        Self {
            signal,
            config,
            identity: None,
            session: None,
            pending: None,
            incoming_approval: None,
            incoming_setup: None,
            setup_pending: None,
            error: None,
            install_prompt: None,
            claimed_host_id: None,
            hosts: HostRegistry::new(),
            auto_claim_target: None,
            auto_request_target: None,
            setup_download_url: None,
            first_frame_received: false,
            cancelled_requests: VecDeque::new(),
            frames: FrameRelay::new(),
        }
    }

    /// The local participant id, used for ownership and self checks.
    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity.filter(|id| !id.is_empty());
        self.reconcile_hosts();
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn session(&self) -> Option<&RemoteDesktopSession> {
        self.session.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn incoming_approval(&self) -> Option<&IncomingApprovalRequest> {
        self.incoming_approval.as_ref()
    }

    pub fn incoming_setup(&self) -> Option<&HostSetupRequest> {
        self.incoming_setup.as_ref()
    }

    pub fn error(&self) -> Option<&SessionErrorInfo> {
        self.error.as_ref()
    }

    pub fn install_prompt(&self) -> Option<&HostInstallPrompt> {
        self.install_prompt.as_ref()
    }

    pub fn claimed_host_id(&self) -> Option<&str> {
        self.claimed_host_id.as_deref()
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }

    pub fn auto_claim_target(&self) -> Option<&str> {
        self.auto_claim_target.as_deref()
    }

    pub fn auto_request_target(&self) -> Option<&str> {
        self.auto_request_target.as_deref()
    }

    pub fn first_frame_received(&self) -> bool {
        self.first_frame_received
    }

    pub fn snapshot(&self) -> RemoteDesktopSnapshot {
        RemoteDesktopSnapshot {
            session: self.session.clone(),
            pending: self.pending.clone(),
            incoming_approval: self.incoming_approval.clone(),
            incoming_setup: self.incoming_setup.clone(),
            setup_pending: self.setup_pending.clone(),
            error: self.error.clone(),
            install_prompt: self.install_prompt.clone(),
            claimed_host_id: self.claimed_host_id.clone(),
            hosts: self.hosts.hosts().to_vec(),
            auto_claim_target: self.auto_claim_target.clone(),
            auto_request_target: self.auto_request_target.clone(),
            first_frame_received: self.first_frame_received,
            setup_download_url: self.setup_download_url.clone(),
        }
    }

    // ── User operations ───────────────────────────────────────────

    /// Ask `host_id` for a session. Nothing is recorded locally until
    /// the server answers with `remote-session-pending`.
    pub fn request_remote_desktop_session(&mut self, host_id: &str) -> bool {
        if host_id.is_empty() {
            return false;
        }
        self.error = None;
        self.install_prompt = None;
        self.emit(OutboundSignal::SessionRequest {
            host_id: host_id.to_string(),
        })
    }

    /// Stop the active session, or cancel the pending request.
    pub fn stop_remote_desktop_session(&mut self) -> bool {
        // An explicit stop cancels any automatic resume as well.
        self.auto_request_target = None;

        if let Some(session) = self.session.take() {
            self.first_frame_received = false;
            info!(session = %session.session_id, "stopping remote session");
            return self.emit(OutboundSignal::SessionStop {
                session_id: Some(session.session_id),
                request_id: None,
            });
        }
        if let Some(pending) = self.pending.take() {
            info!(request = %pending.request_id, "cancelling remote session request");
            self.remember_cancelled(pending.request_id.clone());
            return self.emit(OutboundSignal::SessionStop {
                session_id: None,
                request_id: Some(pending.request_id),
            });
        }
        false
    }

    /// Decide on another participant's session request.
    pub fn respond_to_remote_desktop_request(&mut self, accepted: bool) -> bool {
        let Some(request) = self.incoming_approval.take() else {
            return false;
        };
        self.emit(OutboundSignal::SessionDecision {
            request_id: request.request_id,
            accepted,
        })
    }

    /// Fire-and-forget. The claim is recorded when the server echoes
    /// `remote-host-claimed`.
    pub fn claim_remote_host(&mut self, host_id: &str) -> bool {
        if host_id.is_empty() {
            return false;
        }
        self.emit(OutboundSignal::HostClaim {
            host_id: host_id.to_string(),
        })
    }

    /// Ask `target_id` to start a host agent on their machine.
    pub fn request_remote_host_setup(&mut self, target_id: &str) -> bool {
        if target_id.is_empty() || self.identity.as_deref() == Some(target_id) {
            return false;
        }
        self.error = None;
        self.emit(OutboundSignal::HostSetupRequest {
            target_id: target_id.to_string(),
        })
    }

    /// Decide on another participant's host-setup request. Accepting
    /// arms an automatic session request for the suggested host.
    pub fn respond_to_host_setup_request(&mut self, accepted: bool) -> bool {
        let Some(request) = self.incoming_setup.take() else {
            return false;
        };
        if accepted {
            if let Some(host_id) = request.suggested_host_id.clone() {
                debug!(host = %host_id, "auto-request armed");
                self.auto_request_target = Some(host_id);
            }
        }
        self.emit(OutboundSignal::HostSetupDecision {
            request_id: request.request_id,
            accepted,
            host_id: request.suggested_host_id,
        })
    }

    pub fn request_hosts(&self) -> bool {
        self.emit(OutboundSignal::HostsRequest)
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
        self.install_prompt = None;
    }

    // ── Frames / input ────────────────────────────────────────────

    #[must_use = "dropping the subscription unsubscribes the listener"]
    pub fn subscribe_frames<F>(&self, listener: F) -> FrameSubscription
    where
        F: Fn(&RemoteFrame) + Send + Sync + 'static,
    {
        self.frames.subscribe(listener)
    }

    /// Forward an input event to the active session. Without a session
    /// the event is dropped; invalid events are rejected.
    pub fn send_input(&self, input: RemoteInput) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let input = match input.normalize() {
            Ok(input) => input,
            Err(e) => {
                debug!("input rejected: {e}");
                return false;
            }
        };
        self.emit(OutboundSignal::Input {
            session_id: session.session_id.clone(),
            event: input,
        })
    }

    /// [`send_input`](Self::send_input) for an untyped event.
    pub fn send_input_value(&self, raw: Value) -> bool {
        if self.session.is_none() {
            return false;
        }
        match RemoteInput::from_value(raw) {
            Ok(input) => self.send_input(input),
            Err(e) => {
                debug!("input rejected: {e}");
                false
            }
        }
    }

    // ── Inbound events ────────────────────────────────────────────

    pub fn dispatch(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::SessionRequested(request) => {
                info!(request = %request.request_id, from = %request.requester_id, "session approval requested");
                self.incoming_approval = Some(request);
            }
            RemoteEvent::SessionPending(pending) => {
                if self.was_cancelled(Some(&pending.request_id)) {
                    debug!(request = %pending.request_id, "ignoring pending for cancelled request");
                    return;
                }
                debug!(request = %pending.request_id, host = %pending.host_id, "session pending");
                self.pending = Some(pending);
            }
            RemoteEvent::SessionStarted(started) => self.on_session_started(started),
            RemoteEvent::SessionEnded(ended) => self.on_session_ended(ended),
            RemoteEvent::SessionError(error) => self.on_session_error(error),
            RemoteEvent::HostsList(hosts) => self.on_hosts_list(hosts),
            RemoteEvent::HostClaimed(claimed) => self.on_host_claimed(claimed),
            RemoteEvent::HostSetupPending(pending) => {
                self.setup_pending = Some(pending);
            }
            RemoteEvent::HostSetupRequested(request) => {
                info!(request = %request.request_id, from = %request.requester_id, "host setup requested");
                self.incoming_setup = Some(request);
            }
            RemoteEvent::HostSetupResult(result) => self.on_setup_result(result),
            RemoteEvent::Frame(frame) => self.on_frame(frame),
        }
    }

    fn on_session_started(&mut self, started: SessionStarted) {
        if self.was_cancelled(started.request_id.as_deref()) {
            // The server started it before our stop arrived; stop it again.
            info!(session = %started.session_id, "stopping session for cancelled request");
            self.emit(OutboundSignal::SessionStop {
                session_id: Some(started.session_id),
                request_id: None,
            });
            return;
        }
        info!(session = %started.session_id, host = %started.host_id, "remote session started");
        self.pending = None;
        self.error = None;
        self.install_prompt = None;
        if self.auto_request_target.as_deref() == Some(started.host_id.as_str()) {
            self.auto_request_target = None;
        }
        self.session = Some(RemoteDesktopSession {
            session_id: started.session_id,
            host_id: started.host_id,
        });
        self.first_frame_received = false;
    }

    fn on_session_ended(&mut self, ended: SessionEnded) {
        let current = self.session.as_ref().map(|s| s.session_id.as_str());
        if current != Some(ended.session_id.as_str()) {
            debug!(session = %ended.session_id, "ignoring end of stale session");
            return;
        }
        info!(session = %ended.session_id, reason = ?ended.reason, "remote session ended");
        self.session = None;
        self.first_frame_received = false;
    }

    fn on_session_error(&mut self, error: SessionErrorEvent) {
        warn!(code = %error.code, message = ?error.message, "remote session error");

        let pending_host = self.pending.take().map(|p| p.host_id);
        self.incoming_approval = None;
        self.setup_pending = None;

        if let (Some(session_id), Some(session)) = (&error.session_id, &self.session) {
            if *session_id == session.session_id {
                self.session = None;
                self.first_frame_received = false;
            }
        }

        if self.config.is_host_unreachable(&error.code) {
            self.install_prompt = Some(HostInstallPrompt {
                host_id: error.host_id.or(pending_host),
                download_url: self.config.host_app_download_url.clone(),
            });
            self.error = None;
        } else {
            let message = error
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("remote desktop request failed ({})", error.code));
            self.error = Some(SessionErrorInfo {
                code: error.code,
                message,
            });
        }
    }

    fn on_hosts_list(&mut self, hosts: Vec<HostAnnouncement>) {
        self.hosts.replace(
            hosts,
            self.identity.as_deref(),
            self.claimed_host_id.as_deref(),
        );
        debug!(hosts = self.hosts.len(), "hosts list replaced");

        if let Some(target) = self.auto_claim_target.take() {
            if self.hosts.contains(&target) {
                info!(host = %target, "auto-claiming host");
                let claim = OutboundSignal::HostClaim {
                    host_id: target.clone(),
                };
                if !self.emit(claim) {
                    self.auto_claim_target = Some(target);
                }
            } else {
                self.auto_claim_target = Some(target);
            }
        }

        let can_request = self.session.is_none() && self.pending.is_none();
        if let Some(target) = self.auto_request_target.take() {
            if can_request && self.hosts.contains(&target) {
                info!(host = %target, "auto-requesting session");
                if !self.request_remote_desktop_session(&target) {
                    self.auto_request_target = Some(target);
                }
            } else {
                self.auto_request_target = Some(target);
            }
        }
    }

    fn on_host_claimed(&mut self, claimed: HostClaimed) {
        info!(host = %claimed.host_id, "host claimed");
        if self.auto_claim_target.as_deref() == Some(claimed.host_id.as_str()) {
            self.auto_claim_target = None;
        }
        self.claimed_host_id = Some(claimed.host_id);
        self.reconcile_hosts();
    }

    fn on_setup_result(&mut self, result: HostSetupResult) {
        if let Some(pending) = &self.setup_pending {
            if pending.request_id != result.request_id {
                debug!(request = %result.request_id, "ignoring stale setup result");
                return;
            }
        }
        self.setup_pending = None;

        if result.accepted {
            info!(request = %result.request_id, host = ?result.host_id, "host setup accepted");
            if let Some(host_id) = result.host_id {
                self.auto_claim_target = Some(host_id);
            }
            self.setup_download_url = result.download_url;
        } else {
            info!(request = %result.request_id, "host setup declined");
            self.error = Some(SessionErrorInfo {
                code: SETUP_DECLINED.to_string(),
                message: "the participant declined to start a host".to_string(),
            });
        }
    }

    fn on_frame(&mut self, frame: RemoteFrame) {
        let current = self.session.as_ref().map(|s| s.session_id.as_str());
        if current != Some(frame.session_id.as_str()) {
            debug!(session = %frame.session_id, "dropping frame for inactive session");
            return;
        }
        if !self.first_frame_received {
            self.first_frame_received = true;
            info!(session = %frame.session_id, "first frame received");
        }
        self.frames.publish(&frame);
    }

    // ── Link lifecycle ────────────────────────────────────────────

    /// Reset after a full signaling disconnect, keeping the host the
    /// user meant to be on as a deferred reclaim target.
    pub fn handle_disconnect(&mut self) -> Option<ReconnectIntent> {
        let intent = match (&self.session, &self.pending) {
            (Some(session), _) => Some(ReconnectIntent {
                host_id: session.host_id.clone(),
                resume_session: true,
            }),
            (None, Some(pending)) => Some(ReconnectIntent {
                host_id: pending.host_id.clone(),
                resume_session: false,
            }),
            (None, None) => self.claimed_host_id.as_ref().map(|host_id| ReconnectIntent {
                host_id: host_id.clone(),
                resume_session: false,
            }),
        };

        if let Some(intent) = &intent {
            info!(host = %intent.host_id, resume = intent.resume_session, "preserving remote intent");
            self.auto_claim_target = Some(intent.host_id.clone());
            if intent.resume_session {
                self.auto_request_target = Some(intent.host_id.clone());
            }
        }

        self.session = None;
        self.pending = None;
        self.incoming_approval = None;
        self.incoming_setup = None;
        self.setup_pending = None;
        self.error = None;
        self.install_prompt = None;
        self.claimed_host_id = None;
        self.first_frame_received = false;
        self.hosts.clear();
        intent
    }

    /// The link is back; fetch hosts so deferred targets can fire.
    pub fn handle_reconnect(&mut self) -> bool {
        self.request_hosts()
    }

    // ── Helpers ───────────────────────────────────────────────────

    fn remember_cancelled(&mut self, request_id: String) {
        if self.cancelled_requests.len() == CANCELLED_REQUESTS_KEPT {
            self.cancelled_requests.pop_front();
        }
        self.cancelled_requests.push_back(request_id);
    }

    /// Events without a request id are never treated as stale.
    fn was_cancelled(&self, request_id: Option<&str>) -> bool {
        request_id.is_some_and(|id| self.cancelled_requests.iter().any(|c| c == id))
    }

    fn reconcile_hosts(&mut self) {
        self.hosts
            .reconcile(self.identity.as_deref(), self.claimed_host_id.as_deref());
    }

    fn emit(&self, signal: OutboundSignal) -> bool {
        match self.signal.emit(&signal) {
            Ok(()) => true,
            Err(e) => {
                warn!(event = signal.name(), "emit failed: {e}");
                false
            }
        }
    }
}

impl std::fmt::Debug for RemoteDesktopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDesktopController")
            .field("identity", &self.identity)
            .field("session", &self.session)
            .field("pending", &self.pending)
            .field("claimed_host_id", &self.claimed_host_id)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────
