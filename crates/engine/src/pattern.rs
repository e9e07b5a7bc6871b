//! Pattern detector: similarity to a reference explosive move

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PatternConfig;
use crate::indicators::TechnicalIndicators;
use crate::selector::{ramp, SelectedInstrument};
use crate::trace::{RejectionReason, StageEntry, StageName, StageOutcome};
use crate::types::unit;

/// Sub-scores of the similarity blend, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternBreakdown {
    pub volume: f64,
    pub momentum: f64,
    /// Inverse of the estimated downside risk
    pub risk: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub selected: SelectedInstrument,
    pub breakdown: PatternBreakdown,
    pub similarity: f64,
}

pub fn pattern_breakdown(ind: &TechnicalIndicators, config: &PatternConfig) -> PatternBreakdown {
    let reference = &config.reference;
    PatternBreakdown {
        volume: ramp(ind.volume_spike, 1.0, reference.volume_spike),
        momentum: ramp(ind.momentum_pct, 0.0, reference.momentum_pct),
        risk: unit(1.0 - ind.wolf_risk),
        volatility: ramp(ind.volatility_pct, 0.0, reference.volatility_pct),
    }
}

pub fn similarity_score(breakdown: &PatternBreakdown, config: &PatternConfig) -> f64 {
    let w = &config.weights;
    unit(
        w.volume * breakdown.volume
            + w.momentum * breakdown.momentum
            + w.risk * breakdown.risk
            + w.volatility * breakdown.volatility,
    )
}

/// First failing check; thresholds run before the overall similarity,
/// which must strictly exceed its minimum
fn pattern_rejection(ind: &TechnicalIndicators, similarity: f64, config: &PatternConfig) -> Option<RejectionReason> {
    if ind.volume_spike < config.min_volume_spike {
        Some(RejectionReason::VolumeSpikeBelowMin)
    } else if ind.wolf_risk > config.max_wolf_risk {
        Some(RejectionReason::RiskAboveMax)
    } else if ind.momentum_pct < config.min_momentum_pct {
        Some(RejectionReason::MomentumBelowMin)
    } else if ind.volatility_pct < config.min_volatility_pct {
        Some(RejectionReason::VolatilityBelowMin)
    } else if similarity <= config.min_similarity {
        Some(RejectionReason::SimilarityBelowMin)
    } else {
        None
    }
}

pub fn apply_pattern_detector(
    input: Vec<SelectedInstrument>,
    config: &PatternConfig,
) -> StageOutcome<PatternMatch> {
    let mut entry = StageEntry::new(StageName::PatternDetector, input.len());
    let mut survivors = Vec::with_capacity(input.len());

    for selected in input {
        let ind = &selected.enriched.indicators;
        let breakdown = pattern_breakdown(ind, config);
        let similarity = similarity_score(&breakdown, config);

        match pattern_rejection(ind, similarity, config) {
            Some(reason) => entry.reject(reason),
            None => survivors.push(PatternMatch {
                selected,
                breakdown,
                similarity,
            }),
        }
    }

    debug!(
        count_in = entry.count_in,
        count_out = survivors.len(),
        "Pattern detector applied"
    );
    StageOutcome::new(survivors, entry)
}
