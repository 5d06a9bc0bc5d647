//! Peer-to-peer call sessions.
//!
//! - [`utils`]: stateless health, tie-break and readiness checks
//! - [`manager`]: the per-room [`CallSessionManager`]

pub mod manager;
pub mod utils;

pub use manager::{
    CallManagerEvent, CallRecord, CallSessionManager, CallSnapshot, CallSummary, PeerConnections,
};
pub use utils::{CallHealth, call_health, is_transport_ready, should_initiate};
