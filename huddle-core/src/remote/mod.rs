//! Remote desktop control over the signaling channel.
//!
//! - [`types`]: session, request and frame records
//! - [`hosts`]: the host-agent registry and ownership reconciliation
//! - [`input`]: normalized pointer / keyboard events
//! - [`frames`]: frame fan-out to subscribers
//! - [`controller`]: the session state machine

pub mod controller;
pub mod frames;
pub mod hosts;
pub mod input;
pub mod types;

pub use controller::{
    DEFAULT_HOST_APP_DOWNLOAD_URL, DEFAULT_HOST_UNREACHABLE_CODES, ReconnectIntent,
    RemoteDesktopConfig, RemoteDesktopController, RemoteDesktopSnapshot, SETUP_DECLINED,
};
pub use frames::{FrameRelay, FrameSubscription};
pub use hosts::{HostAnnouncement, HostOwnership, HostRecord, HostRegistry, HostsList};
pub use input::{PointerButton, RemoteInput, key_modifiers};
pub use types::*;
