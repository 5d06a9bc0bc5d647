//! Signaling event surface.
//!
//! Inbound events are parsed once, at ingress, into [`SignalEvent`];
//! nothing past this module touches untyped JSON. Outbound events are
//! the closed [`OutboundSignal`] enum.
//!
//! # Session request
//! ```text
//! Viewer ──[remote-session-request {hostId}]────────────► Server
//! Server ──[remote-session-pending {requestId, hostId}]─► Viewer
//! Server ──[remote-session-request {requestId, ...}]────► Approver
//! Approver ─[remote-session-ui-decision {requestId, accepted}]► Server
//! Server ──[remote-session-started {sessionId, hostId}]─► Viewer
//! Server ──[remote-frame {sessionId, image}]────────────► Viewer (repeated)
//! Viewer ──[remote-input {sessionId, event}]────────────► Server (repeated)
//! ```
//!
//! # Host setup
//! ```text
//! Requester ─[remote-host-setup-request {targetId}]─────► Server
//! Server ───[remote-host-setup-pending {requestId, ...}]► Requester
//! Server ───[remote-host-setup-requested {...}]─────────► Target
//! Target ───[remote-host-setup-decision {...}]──────────► Server
//! Server ───[remote-host-setup-result {...}]────────────► Requester
//! ```

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::HuddleError;
use crate::remote::hosts::{HostAnnouncement, HostsList};
use crate::remote::input::RemoteInput;
use crate::remote::types::{
    HostClaimed, HostSetupPendingRequest, HostSetupRequest, HostSetupResult,
    IncomingApprovalRequest, PendingRequest, RemoteFrame, SessionEnded, SessionErrorEvent,
    SessionStarted,
};

/// Wire names of every event the core consumes or produces.
pub mod names {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const USER_JOINED: &str = "user-joined";
    pub const USER_LEFT: &str = "user-left";
    pub const GET_USERS: &str = "get-users";

    pub const SESSION_REQUEST: &str = "remote-session-request";
    pub const SESSION_PENDING: &str = "remote-session-pending";
    pub const SESSION_STARTED: &str = "remote-session-started";
    pub const SESSION_ENDED: &str = "remote-session-ended";
    pub const SESSION_ERROR: &str = "remote-session-error";
    pub const SESSION_STOP: &str = "remote-session-stop";
    pub const SESSION_UI_DECISION: &str = "remote-session-ui-decision";

    pub const HOSTS_REQUEST: &str = "remote-hosts-request";
    pub const HOSTS_LIST: &str = "remote-hosts-list";
    pub const HOST_CLAIM: &str = "remote-host-claim";
    pub const HOST_CLAIMED: &str = "remote-host-claimed";

    pub const HOST_SETUP_REQUEST: &str = "remote-host-setup-request";
    pub const HOST_SETUP_PENDING: &str = "remote-host-setup-pending";
    pub const HOST_SETUP_REQUESTED: &str = "remote-host-setup-requested";
    pub const HOST_SETUP_DECISION: &str = "remote-host-setup-decision";
    pub const HOST_SETUP_RESULT: &str = "remote-host-setup-result";

    pub const FRAME: &str = "remote-frame";
    pub const INPUT: &str = "remote-input";
}

// ── Roster payloads ──────────────────────────────────────────────

/// One roster member: a bare id or an object carrying one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RosterEntry {
    Id(String),
    User {
        #[serde(alias = "userId", alias = "peerId")]
        id: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl RosterEntry {
    pub fn id(&self) -> &str {
        match self {
            RosterEntry::Id(id) | RosterEntry::User { id, .. } => id,
        }
    }
}

/// `get-users`: the full authoritative roster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Roster {
    Wrapped { users: Vec<RosterEntry> },
    Bare(Vec<RosterEntry>),
}

impl Roster {
    /// Non-empty member ids in delivery order.
    pub fn ids(&self) -> Vec<String> {
        let entries = match self {
            Roster::Wrapped { users } | Roster::Bare(users) => users,
        };
        entries
            .iter()
            .map(|e| e.id().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

// ── Inbound ──────────────────────────────────────────────────────

/// Remote desktop events, consumed by the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Someone asks the local participant to approve a session.
    SessionRequested(IncomingApprovalRequest),
    SessionPending(PendingRequest),
    SessionStarted(SessionStarted),
    SessionEnded(SessionEnded),
    SessionError(SessionErrorEvent),
    HostsList(Vec<HostAnnouncement>),
    HostClaimed(HostClaimed),
    HostSetupPending(HostSetupPendingRequest),
    /// Someone asks the local participant to start a host agent.
    HostSetupRequested(HostSetupRequest),
    HostSetupResult(HostSetupResult),
    Frame(RemoteFrame),
}

/// Every inbound signaling event the core understands.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalEvent {
    Connected,
    Disconnected { reason: Option<String> },
    UserJoined { user_id: String },
    UserLeft { user_id: String },
    Roster(Vec<String>),
    Remote(RemoteEvent),
}

impl SignalEvent {
    /// Validate an untyped `(event, payload)` pair from the channel.
    pub fn parse(event: &str, payload: Value) -> Result<Self, HuddleError> {
        use names::*;

        let parsed = match event {
            CONNECT => SignalEvent::Connected,
            DISCONNECT => SignalEvent::Disconnected {
                reason: payload.as_str().map(str::to_string),
            },
            USER_JOINED => SignalEvent::UserJoined {
                user_id: user_id(event, payload)?,
            },
            USER_LEFT => SignalEvent::UserLeft {
                user_id: user_id(event, payload)?,
            },
            GET_USERS => SignalEvent::Roster(decode::<Roster>(event, payload)?.ids()),

            SESSION_REQUEST => remote(RemoteEvent::SessionRequested(decode(event, payload)?)),
            SESSION_PENDING => remote(RemoteEvent::SessionPending(decode(event, payload)?)),
            SESSION_STARTED => remote(RemoteEvent::SessionStarted(decode(event, payload)?)),
            SESSION_ENDED => remote(RemoteEvent::SessionEnded(decode(event, payload)?)),
            SESSION_ERROR => remote(RemoteEvent::SessionError(decode(event, payload)?)),
            HOSTS_LIST => remote(RemoteEvent::HostsList(
                decode::<HostsList>(event, payload)?.into_hosts(),
            )),
            HOST_CLAIMED => remote(RemoteEvent::HostClaimed(decode(event, payload)?)),
            HOST_SETUP_PENDING => remote(RemoteEvent::HostSetupPending(decode(event, payload)?)),
            HOST_SETUP_REQUESTED => {
                remote(RemoteEvent::HostSetupRequested(decode(event, payload)?))
            }
            HOST_SETUP_RESULT => remote(RemoteEvent::HostSetupResult(decode(event, payload)?)),
            FRAME => remote(RemoteEvent::Frame(decode(event, payload)?)),

            other => return Err(HuddleError::UnknownEvent(other.to_string())),
        };
        Ok(parsed)
    }
}

fn remote(event: RemoteEvent) -> SignalEvent {
    SignalEvent::Remote(event)
}

fn decode<T: DeserializeOwned>(event: &str, payload: Value) -> Result<T, HuddleError> {
    serde_json::from_value(payload).map_err(|e| HuddleError::malformed(event, e))
}

/// `user-joined` / `user-left` carry either a bare id or a user object.
fn user_id(event: &str, payload: Value) -> Result<String, HuddleError> {
    let entry: RosterEntry = decode(event, payload)?;
    let id = entry.id().to_string();
    if id.is_empty() {
        return Err(HuddleError::malformed(event, "empty user id"));
    }
    Ok(id)
}

// ── Outbound ─────────────────────────────────────────────────────

/// Every event the core emits on the signaling channel.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundSignal {
    SessionRequest {
        host_id: String,
    },
    /// Stop an active session (`session_id`) or cancel a pending
    /// request (`request_id`).
    SessionStop {
        session_id: Option<String>,
        request_id: Option<String>,
    },
    SessionDecision {
        request_id: String,
        accepted: bool,
    },
    HostsRequest,
    HostClaim {
        host_id: String,
    },
    HostSetupRequest {
        target_id: String,
    },
    HostSetupDecision {
        request_id: String,
        accepted: bool,
        host_id: Option<String>,
    },
    Input {
        session_id: String,
        event: RemoteInput,
    },
}

impl OutboundSignal {
    /// Wire event name.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundSignal::SessionRequest { .. } => names::SESSION_REQUEST,
            OutboundSignal::SessionStop { .. } => names::SESSION_STOP,
            OutboundSignal::SessionDecision { .. } => names::SESSION_UI_DECISION,
            OutboundSignal::HostsRequest => names::HOSTS_REQUEST,
            OutboundSignal::HostClaim { .. } => names::HOST_CLAIM,
            OutboundSignal::HostSetupRequest { .. } => names::HOST_SETUP_REQUEST,
            OutboundSignal::HostSetupDecision { .. } => names::HOST_SETUP_DECISION,
            OutboundSignal::Input { .. } => names::INPUT,
        }
    }

    /// Wire payload.
    pub fn payload(&self) -> Result<Value, HuddleError> {
        let value = match self {
            OutboundSignal::SessionRequest { host_id } => json!({ "hostId": host_id }),
            OutboundSignal::SessionStop {
                session_id,
                request_id,
            } => json!({ "sessionId": session_id, "requestId": request_id }),
            OutboundSignal::SessionDecision {
                request_id,
                accepted,
            } => json!({ "requestId": request_id, "accepted": accepted }),
            OutboundSignal::HostsRequest => json!({}),
            OutboundSignal::HostClaim { host_id } => json!({ "hostId": host_id }),
            OutboundSignal::HostSetupRequest { target_id } => json!({ "targetId": target_id }),
            OutboundSignal::HostSetupDecision {
                request_id,
                accepted,
                host_id,
            } => json!({ "requestId": request_id, "accepted": accepted, "hostId": host_id }),
            OutboundSignal::Input { session_id, event } => {
                json!({ "sessionId": session_id, "event": serde_json::to_value(event)? })
            }
        };
        Ok(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roster_shapes() {
        let bare = SignalEvent::parse(names::GET_USERS, json!(["alice", "bob", ""])).unwrap();
        assert_eq!(bare, SignalEvent::Roster(vec!["alice".into(), "bob".into()]));

        let wrapped = SignalEvent::parse(
            names::GET_USERS,
            json!({"users": [{"userId": "alice", "name": "A"}, {"id": "bob"}]}),
        )
        .unwrap();
        assert_eq!(wrapped, SignalEvent::Roster(vec!["alice".into(), "bob".into()]));
    }

    #[test]
    fn parses_user_joined() {
        let event = SignalEvent::parse(names::USER_JOINED, json!({"peerId": "carol"})).unwrap();
        assert_eq!(
            event,
            SignalEvent::UserJoined {
                user_id: "carol".into()
            }
        );
        assert!(SignalEvent::parse(names::USER_LEFT, json!({"id": ""})).is_err());
    }

    #[test]
    fn parses_session_pending() {
        let event = SignalEvent::parse(
            names::SESSION_PENDING,
            json!({"requestId": "r1", "hostId": "host-1"}),
        )
        .unwrap();
        assert_eq!(
            event,
            SignalEvent::Remote(RemoteEvent::SessionPending(PendingRequest {
                request_id: "r1".into(),
                host_id: "host-1".into(),
            }))
        );
    }

    #[test]
    fn malformed_payload_names_event() {
        let err = SignalEvent::parse(names::SESSION_STARTED, json!({"hostId": "h"})).unwrap_err();
        assert!(matches!(err, HuddleError::MalformedPayload { ref event, .. } if event == names::SESSION_STARTED));
    }

    #[test]
    fn unknown_event_rejected() {
        let err = SignalEvent::parse("remote-teleport", json!({})).unwrap_err();
        assert!(matches!(err, HuddleError::UnknownEvent(_)));
    }

    #[test]
    fn disconnect_reason_is_optional() {
        assert_eq!(
            SignalEvent::parse(names::DISCONNECT, Value::Null).unwrap(),
            SignalEvent::Disconnected { reason: None }
        );
        assert_eq!(
            SignalEvent::parse(names::DISCONNECT, json!("transport close")).unwrap(),
            SignalEvent::Disconnected {
                reason: Some("transport close".into())
            }
        );
    }

    #[test]
    fn outbound_stop_distinguishes_session_and_request() {
        let stop = OutboundSignal::SessionStop {
            session_id: None,
            request_id: Some("r1".into()),
        };
        assert_eq!(stop.name(), "remote-session-stop");
        let payload = stop.payload().unwrap();
        assert!(payload["sessionId"].is_null());
        assert_eq!(payload["requestId"], "r1");
    }

    #[test]
    fn outbound_input_embeds_event() {
        let signal = OutboundSignal::Input {
            session_id: "s1".into(),
            event: RemoteInput::move_to(0.5, 0.5),
        };
        let payload = signal.payload().unwrap();
        assert_eq!(payload["sessionId"], "s1");
        assert_eq!(payload["event"]["type"], "pointer-move");
    }
}
