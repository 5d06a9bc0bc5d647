//! Network quality classification.
//!
//! Two independent sources are classified separately and combined with
//! [`QualityTier::worst`]:
//!
//! | tier      | network hint                                              | transport stats        |
//! |-----------|-----------------------------------------------------------|------------------------|
//! | very-poor | offline, slow-2g / 2g, downlink ≤ 0.35 Mbps, rtt ≥ 1200 ms | rtt ≥ 1200 ms, loss ≥ 20 % |
//! | weak      | save-data, 3g, downlink ≤ 1 Mbps, rtt ≥ 450 ms              | rtt ≥ 450 ms, loss ≥ 8 %   |
//! | good      | otherwise                                                 | otherwise              |

use serde::{Deserialize, Serialize};

use crate::capability::{ConnectionStats, EffectiveType, NetworkHint};

const VERY_POOR_DOWNLINK_MBPS: f64 = 0.35;
const WEAK_DOWNLINK_MBPS: f64 = 1.0;
const VERY_POOR_RTT_MS: f64 = 1200.0;
const WEAK_RTT_MS: f64 = 450.0;
const VERY_POOR_LOSS: f64 = 0.20;
const WEAK_LOSS: f64 = 0.08;

/// Estimated quality of one sample, ordered `Good < Weak < VeryPoor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityTier {
    Good,
    Weak,
    VeryPoor,
}

impl QualityTier {
    pub fn worst(self, other: QualityTier) -> QualityTier {
        self.max(other)
    }

    pub fn is_good(self) -> bool {
        self == QualityTier::Good
    }
}

/// Classify the platform-reported network hint.
pub fn classify_network_hint(hint: &NetworkHint) -> QualityTier {
    if !hint.online
        || matches!(
            hint.effective_type,
            Some(EffectiveType::Slow2g | EffectiveType::TwoG)
        )
        || hint.downlink_mbps.is_some_and(|d| d <= VERY_POOR_DOWNLINK_MBPS)
        || hint.rtt_ms.is_some_and(|r| r >= VERY_POOR_RTT_MS)
    {
        return QualityTier::VeryPoor;
    }

    if hint.save_data
        || hint.effective_type == Some(EffectiveType::ThreeG)
        || hint.downlink_mbps.is_some_and(|d| d <= WEAK_DOWNLINK_MBPS)
        || hint.rtt_ms.is_some_and(|r| r >= WEAK_RTT_MS)
    {
        return QualityTier::Weak;
    }

    QualityTier::Good
}

/// Classify one connection's transport statistics.
pub fn classify_transport_stats(stats: &ConnectionStats) -> QualityTier {
    let rtt = stats.rtt_ms;
    let loss = stats.loss_ratio();

    if rtt.is_some_and(|r| r >= VERY_POOR_RTT_MS) || loss.is_some_and(|l| l >= VERY_POOR_LOSS) {
        QualityTier::VeryPoor
    } else if rtt.is_some_and(|r| r >= WEAK_RTT_MS) || loss.is_some_and(|l| l >= WEAK_LOSS) {
        QualityTier::Weak
    } else {
        QualityTier::Good
    }
}

/// Worst tier across every connection's stats; `Good` when empty.
pub fn classify_worst_stats<'a, I>(stats: I) -> QualityTier
where
    I: IntoIterator<Item = &'a ConnectionStats>,
{
    stats
        .into_iter()
        .map(classify_transport_stats)
        .fold(QualityTier::Good, QualityTier::worst)
}

// ── Tests ────────────────────────────────────────────────────────
