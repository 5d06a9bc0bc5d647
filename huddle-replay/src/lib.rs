//! # huddle-replay
//!
//! Developer tool that replays a JSON-lines script of signaling and
//! local events through a [`huddle_core::RoomSession`] backed by the
//! in-memory capabilities, then reports the room's final state.
//!
//! - **config**: `ReplayConfig`, loaded from TOML
//! - **replay**: script format and the `Replayer` driver

pub mod config;
pub mod replay;

pub use config::ReplayConfig;
pub use replay::{ReplayReport, Replayer, ScriptLine, Step, parse_script};
