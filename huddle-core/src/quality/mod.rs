//! Adaptive outgoing video quality.
//!
//! - [`classify`]: pure tier classification of network hints and stats
//! - [`controller`]: hysteresis and the sampling loop

pub mod classify;
pub mod controller;

pub use classify::{
    QualityTier, classify_network_hint, classify_transport_stats, classify_worst_stats,
};
pub use controller::{
    ConstraintProfile, DEFAULT_SAMPLE_INTERVAL, QualityConfig, QualityController, QualityHandle,
    QualityLoop, QualityMode, QualitySignal, RECOVERY_SAMPLES,
};
