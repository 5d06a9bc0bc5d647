//! Adaptive quality: hysteresis state machine and sampling loop.
//!
//! The loop samples the network hint and the worst transport statistics
//! of every live call, feeds the combined tier into
//! [`QualityController`], and applies capture constraints to the
//! outgoing video track whenever the mode changes.
//!
//! Degrading is immediate. Recovering to [`QualityMode::Normal`] takes
//! two consecutive good samples.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::PeerConnections;
use crate::capability::{NetworkHintSource, VideoConstraints, VideoTrack};
use crate::quality::classify::{QualityTier, classify_network_hint, classify_worst_stats};

/// Good samples in a row needed before restoring normal quality.
pub const RECOVERY_SAMPLES: u32 = 2;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(3500);

// ── QualityMode / QualityController ──────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityMode {
    #[default]
    Normal,
    Weak,
    VeryPoor,
}

impl From<QualityTier> for QualityMode {
    fn from(tier: QualityTier) -> Self {
        match tier {
            QualityTier::Good => QualityMode::Normal,
            QualityTier::Weak => QualityMode::Weak,
            QualityTier::VeryPoor => QualityMode::VeryPoor,
        }
    }
}

/// Hysteresis over a stream of sampled tiers.
#[derive(Debug, Clone, Default)]
pub struct QualityController {
    mode: QualityMode,
    good_streak: u32,
}

impl QualityController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> QualityMode {
        self.mode
    }

    /// Feed one sample. Returns the new mode when it changed.
    pub fn observe(&mut self, tier: QualityTier) -> Option<QualityMode> {
        let target = if tier.is_good() {
            self.good_streak = self.good_streak.saturating_add(1);
            if self.good_streak < RECOVERY_SAMPLES {
                return None;
            }
            QualityMode::Normal
        } else {
            self.good_streak = 0;
            QualityMode::from(tier)
        };

        if target == self.mode {
            return None;
        }
        self.mode = target;
        Some(target)
    }
}

// ── Configuration ────────────────────────────────────────────────

/// A resolution / frame-rate cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl ConstraintProfile {
    pub const fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }

    pub fn to_constraints(self) -> VideoConstraints {
        VideoConstraints::new(self.width, self.height, self.frame_rate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityConfig {
    /// Time between periodic samples.
    pub interval: Duration,
    pub weak: ConstraintProfile,
    pub very_poor: ConstraintProfile,
    /// Restored on recovery when the track had no constraints recorded.
    pub fallback: ConstraintProfile,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLE_INTERVAL,
            weak: ConstraintProfile::new(640, 360, 15.0),
            very_poor: ConstraintProfile::new(320, 180, 8.0),
            fallback: ConstraintProfile::new(1280, 720, 30.0),
        }
    }
}

// ── Loop ─────────────────────────────────────────────────────────

/// Out-of-band triggers for the sampling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualitySignal {
    Online,
    Offline,
    ConnectionChanged,
    TrackEnded,
}

/// The sampling loop for one outgoing video track.
pub struct QualityLoop {
    config: QualityConfig,
    track: Arc<dyn VideoTrack>,
    network: Arc<dyn NetworkHintSource>,
    connections: watch::Receiver<PeerConnections>,
    original: VideoConstraints,
    controller: QualityController,
    mode_tx: watch::Sender<QualityMode>,
}

impl QualityLoop {
    /// Record the track's current constraints as the ones to restore.
    pub fn new(
        config: QualityConfig,
        track: Arc<dyn VideoTrack>,
        network: Arc<dyn NetworkHintSource>,
        connections: watch::Receiver<PeerConnections>,
    ) -> Self {
        let recorded = track.constraints();
        let original = if recorded.is_empty() {
            config.fallback.to_constraints()
        } else {
            recorded
        };
        let (mode_tx, _) = watch::channel(QualityMode::Normal);
        Self {
            config,
            track,
            network,
            connections,
            original,
            controller: QualityController::new(),
            mode_tx,
        }
    }

    /// Constraints restored when quality recovers.
    pub fn original_constraints(&self) -> VideoConstraints {
        self.original
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> QualityHandle {
        let cancel = CancellationToken::new();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let mode = self.mode_tx.subscribe();
        let task = tokio::spawn(self.run(cancel.clone(), signals_rx));
        QualityHandle {
            cancel,
            signals: signals_tx,
            mode,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        cancel: CancellationToken,
        mut signals: mpsc::UnboundedReceiver<QualitySignal>,
    ) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(track = self.track.id(), "quality loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                signal = signals.recv() => match signal {
                    Some(QualitySignal::TrackEnded) | None => break,
                    Some(other) => debug!(?other, "sampling early"),
                },
            }

            if self.track.is_ended() {
                break;
            }
            if !self.sample(&cancel).await {
                break;
            }
        }

        info!(track = self.track.id(), mode = ?self.controller.mode(), "quality loop stopped");
    }

    /// Take one sample. Returns `false` when the loop should stop.
    async fn sample(&mut self, cancel: &CancellationToken) -> bool {
        let hint_tier = classify_network_hint(&self.network.current());

        let connections = self.connections.borrow().clone();
        let results = join_all(connections.iter().map(|pc| pc.stats())).await;

        // The world may have moved on while stats were in flight.
        if cancel.is_cancelled() || self.track.is_ended() {
            return false;
        }

        let stats: Vec<_> = results
            .into_iter()
            .filter_map(|r| match r {
                Ok(stats) => Some(stats),
                Err(e) => {
                    debug!("stats unavailable: {e}");
                    None
                }
            })
            .collect();
        let tier = hint_tier.worst(classify_worst_stats(&stats));

        if let Some(mode) = self.controller.observe(tier) {
            info!(?mode, ?tier, "quality mode changed");
            self.apply(mode).await;
            self.mode_tx.send_replace(mode);
        }
        true
    }

    async fn apply(&self, mode: QualityMode) {
        let constraints = match mode {
            QualityMode::Normal => self.original,
            QualityMode::Weak => self.config.weak.to_constraints(),
            QualityMode::VeryPoor => self.config.very_poor.to_constraints(),
        };
        if let Err(e) = self.track.apply_constraints(&constraints).await {
            warn!(?mode, "applying constraints failed: {e}");
        }
    }
}

// ── QualityHandle ────────────────────────────────────────────────

/// Control handle for a running [`QualityLoop`]. Dropping it stops
/// the loop.
pub struct QualityHandle {
    cancel: CancellationToken,
    signals: mpsc::UnboundedSender<QualitySignal>,
    mode: watch::Receiver<QualityMode>,
    task: Option<JoinHandle<()>>,
}

impl QualityHandle {
    /// Stop sampling. Calling it again is a no-op.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Forward a platform event. Returns `false` once the loop is gone.
    pub fn notify(&self, signal: QualitySignal) -> bool {
        self.signals.send(signal).is_ok()
    }

    pub fn mode(&self) -> QualityMode {
        *self.mode.borrow()
    }

    pub fn watch_mode(&self) -> watch::Receiver<QualityMode> {
        self.mode.clone()
    }

    /// Wait for the loop task to finish.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("quality loop task failed: {e}");
            }
        }
    }
}

impl Drop for QualityHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for QualityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityHandle")
            .field("mode", &self.mode())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{ConnectionStats, EffectiveType, NetworkHint, PeerConnection};
    use crate::sim::{SimNetwork, SimPeerConnection, SimVideoTrack};

    const TICK: Duration = DEFAULT_SAMPLE_INTERVAL;

    fn two_g() -> NetworkHint {
        NetworkHint {
            effective_type: Some(EffectiveType::TwoG),
            ..NetworkHint::default()
        }
    }

    fn three_g() -> NetworkHint {
        NetworkHint {
            effective_type: Some(EffectiveType::ThreeG),
            ..NetworkHint::default()
        }
    }

    fn hd() -> VideoConstraints {
        VideoConstraints::new(1920, 1080, 30.0)
    }

    fn no_connections() -> watch::Receiver<PeerConnections> {
        watch::channel(Vec::new()).1
    }

    fn start(
        track: &Arc<SimVideoTrack>,
        network: &Arc<SimNetwork>,
        connections: watch::Receiver<PeerConnections>,
    ) -> QualityHandle {
        QualityLoop::new(
            QualityConfig::default(),
            track.clone(),
            network.clone(),
            connections,
        )
        .spawn()
    }

    #[test]
    fn degrades_immediately() {
        let mut c = QualityController::new();
        assert_eq!(c.observe(QualityTier::Weak), Some(QualityMode::Weak));
        assert_eq!(c.observe(QualityTier::VeryPoor), Some(QualityMode::VeryPoor));
        assert_eq!(c.observe(QualityTier::VeryPoor), None);
    }

    #[test]
    fn recovers_after_two_good_samples() {
        let mut c = QualityController::new();
        c.observe(QualityTier::VeryPoor);
        assert_eq!(c.observe(QualityTier::Good), None);
        assert_eq!(c.mode(), QualityMode::VeryPoor);
        assert_eq!(c.observe(QualityTier::Good), Some(QualityMode::Normal));
    }

    #[test]
    fn interrupted_recovery_stays_degraded() {
        let mut c = QualityController::new();
        for tier in [QualityTier::VeryPoor, QualityTier::Good, QualityTier::Weak] {
            c.observe(tier);
            assert_ne!(c.mode(), QualityMode::Normal, "after {tier:?}");
        }
        // The streak restarted at the weak sample.
        assert_eq!(c.observe(QualityTier::Good), None);
        assert_eq!(c.observe(QualityTier::Good), Some(QualityMode::Normal));
    }

    #[test]
    fn good_samples_while_normal_change_nothing() {
        let mut c = QualityController::new();
        for _ in 0..5 {
            assert_eq!(c.observe(QualityTier::Good), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_degrades_and_restores_original() {
        let track = SimVideoTrack::new("cam", hd());
        let network = SimNetwork::new(two_g());
        let handle = start(&track, &network, no_connections());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.mode(), QualityMode::VeryPoor);
        assert_eq!(track.applied(), vec![VideoConstraints::new(320, 180, 8.0)]);

        network.set(NetworkHint::default());
        tokio::time::sleep(TICK).await;
        assert_eq!(handle.mode(), QualityMode::VeryPoor);

        tokio::time::sleep(TICK).await;
        assert_eq!(handle.mode(), QualityMode::Normal);
        assert_eq!(track.applied().last(), Some(&hd()));

        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_sequence_never_restores_early() {
        let track = SimVideoTrack::new("cam", hd());
        let network = SimNetwork::new(two_g());
        let handle = start(&track, &network, no_connections());
        tokio::time::sleep(Duration::from_millis(1)).await;

        network.set(NetworkHint::default());
        tokio::time::sleep(TICK).await;
        assert_ne!(handle.mode(), QualityMode::Normal);

        network.set(three_g());
        tokio::time::sleep(TICK).await;
        assert_eq!(handle.mode(), QualityMode::Weak);
        assert!(!track.applied().contains(&hd()));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_falls_back_to_default_profile() {
        let track = SimVideoTrack::new("cam", VideoConstraints::default());
        let network = SimNetwork::new(three_g());
        let handle = start(&track, &network, no_connections());
        tokio::time::sleep(Duration::from_millis(1)).await;

        network.set(NetworkHint::default());
        tokio::time::sleep(TICK * 2).await;
        assert_eq!(handle.mode(), QualityMode::Normal);
        assert_eq!(
            track.applied(),
            vec![
                VideoConstraints::new(640, 360, 15.0),
                VideoConstraints::new(1280, 720, 30.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_stats_use_worst_connection() {
        let track = SimVideoTrack::new("cam", hd());
        let network = SimNetwork::new(NetworkHint::default());

        let healthy = SimPeerConnection::connected();
        healthy.set_stats(ConnectionStats {
            rtt_ms: Some(40.0),
            packets_lost: 0,
            packets_received: 1000,
        });
        let lossy = SimPeerConnection::connected();
        lossy.set_stats(ConnectionStats {
            rtt_ms: Some(60.0),
            packets_lost: 300,
            packets_received: 700,
        });
        let broken = SimPeerConnection::connected();
        broken.fail_stats("no candidate pair");

        let conns: PeerConnections = vec![
            healthy as Arc<dyn PeerConnection>,
            lossy as Arc<dyn PeerConnection>,
            broken as Arc<dyn PeerConnection>,
        ];
        let (_tx, rx) = watch::channel(conns);
        let handle = start(&track, &network, rx);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.mode(), QualityMode::VeryPoor);
    }

    #[tokio::test(start_paused = true)]
    async fn constraint_failures_do_not_stop_the_loop() {
        let track = SimVideoTrack::new("cam", hd());
        track.set_failing(true);
        let network = SimNetwork::new(two_g());
        let handle = start(&track, &network, no_connections());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.mode(), QualityMode::VeryPoor);
        assert!(track.applied().is_empty());

        track.set_failing(false);
        network.set(three_g());
        tokio::time::sleep(TICK).await;
        assert_eq!(handle.mode(), QualityMode::Weak);
        assert!(!handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_event_samples_immediately() {
        let track = SimVideoTrack::new("cam", hd());
        let network = SimNetwork::new(NetworkHint::default());
        let handle = start(&track, &network, no_connections());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.mode(), QualityMode::Normal);

        network.set(NetworkHint::offline());
        assert!(handle.notify(QualitySignal::Offline));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(handle.mode(), QualityMode::VeryPoor);
    }

    #[tokio::test(start_paused = true)]
    async fn track_end_stops_the_loop() {
        let track = SimVideoTrack::new("cam", hd());
        let network = SimNetwork::new(NetworkHint::default());
        let handle = start(&track, &network, no_connections());
        tokio::time::sleep(Duration::from_millis(1)).await;

        track.end();
        handle.notify(QualitySignal::TrackEnded);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(handle.is_stopped());
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let track = SimVideoTrack::new("cam", hd());
        let network = SimNetwork::new(two_g());
        let handle = start(&track, &network, no_connections());

        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        handle.join().await;

        let applied = track.applied().len();
        tokio::time::sleep(TICK * 3).await;
        assert_eq!(track.applied().len(), applied);
    }
}
