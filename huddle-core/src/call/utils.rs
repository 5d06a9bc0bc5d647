//! Stateless helpers shared by the call manager and the room session.

use serde::Serialize;

use crate::capability::{CallHandle, IceConnectionState, MediaTransport, PeerConnectionState};

/// Derived health of a call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallHealth {
    Healthy,
    /// The call is closed, failed, or on its way there.
    Closing,
}

impl CallHealth {
    pub fn is_healthy(self) -> bool {
        matches!(self, CallHealth::Healthy)
    }
}

/// Classify a call from its open flag and underlying connection states.
///
/// `disconnected` is transient in ICE and is left healthy; only closed
/// or failed states mark a call for replacement. A call whose peer
/// connection has not been negotiated yet is healthy while it is open.
pub fn call_health(call: &dyn CallHandle) -> CallHealth {
    if !call.is_open() {
        return CallHealth::Closing;
    }
    let Some(pc) = call.peer_connection() else {
        return CallHealth::Healthy;
    };
    let conn_dead = matches!(
        pc.connection_state(),
        PeerConnectionState::Failed | PeerConnectionState::Closed
    );
    let ice_dead = matches!(
        pc.ice_connection_state(),
        IceConnectionState::Failed | IceConnectionState::Closed
    );
    if conn_dead || ice_dead {
        CallHealth::Closing
    } else {
        CallHealth::Healthy
    }
}

/// Deterministic initiator tie-break: only the lexicographically
/// smaller identity dials.
pub fn should_initiate(local_identity: &str, peer_id: &str) -> bool {
    local_identity < peer_id
}

/// Open, not destroyed, not disconnected, and with an identity.
pub fn is_transport_ready(transport: &dyn MediaTransport) -> bool {
    transport.is_open()
        && !transport.is_destroyed()
        && !transport.is_disconnected()
        && transport.identity().is_some_and(|id| !id.is_empty())
}

// ── Tests ────────────────────────────────────────────────────────
