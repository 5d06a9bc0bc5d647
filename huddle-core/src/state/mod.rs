pub mod link;

pub use link::{DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, LinkPhase, ReconnectBackoff};
