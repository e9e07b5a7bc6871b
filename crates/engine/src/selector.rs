//! Compression/momentum selector
//!
//! Ranks enriched instruments by the explosive heuristic and keeps the top
//! slice. Ordering is score descending, then symbol ascending, so the cut is
//! deterministic under ties.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{SelectionCut, SelectorConfig};
use crate::enrichment::EnrichedInstrument;
use crate::indicators::TechnicalIndicators;
use crate::trace::{RejectionReason, StageEntry, StageName, StageOutcome};
use crate::types::unit;

/// Per-component sub-scores of the explosive heuristic, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplosiveBreakdown {
    pub volume_spike: f64,
    pub momentum: f64,
    pub range_position: f64,
    pub volatility_expansion: f64,
    pub compression: f64,
}

/// An enriched instrument that passed the selector cut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedInstrument {
    pub enriched: EnrichedInstrument,
    pub breakdown: ExplosiveBreakdown,
    pub explosive_score: f64,
}

/// Linear ramp from `floor` (0) to `saturation` (1)
pub(crate) fn ramp(value: f64, floor: f64, saturation: f64) -> f64 {
    if saturation <= floor {
        return if value >= saturation { 1.0 } else { 0.0 };
    }
    unit((value - floor) / (saturation - floor))
}

pub fn explosive_breakdown(ind: &TechnicalIndicators, config: &SelectorConfig) -> ExplosiveBreakdown {
    ExplosiveBreakdown {
        volume_spike: ramp(ind.volume_spike, 1.0, config.volume_spike_saturation),
        momentum: ramp(ind.momentum_pct, 0.0, config.momentum_saturation_pct),
        range_position: unit(ind.range_position),
        volatility_expansion: ramp(ind.volatility_expansion, 1.0, config.expansion_saturation),
        // Tighter recent range scores higher
        compression: unit(1.0 - ind.compression_percentile),
    }
}

pub fn explosive_score(breakdown: &ExplosiveBreakdown, config: &SelectorConfig) -> f64 {
    let w = &config.weights;
    unit(
        w.volume_spike * breakdown.volume_spike
            + w.momentum * breakdown.momentum
            + w.range_position * breakdown.range_position
            + w.volatility_expansion * breakdown.volatility_expansion
            + w.compression * breakdown.compression,
    )
}

/// Number of ranked instruments kept out of `n`
pub fn keep_count(n: usize, cut: &SelectionCut) -> usize {
    match cut {
        SelectionCut::TopPercentile { percentile } => {
            let kept = (n as f64 * percentile / 100.0).ceil();
            (kept.max(0.0) as usize).min(n)
        }
        SelectionCut::TopN { count } => (*count).min(n),
    }
}

/// Score, rank and cut the enriched set
pub fn apply_selector(
    input: Vec<EnrichedInstrument>,
    config: &SelectorConfig,
) -> StageOutcome<SelectedInstrument> {
    let mut entry = StageEntry::new(StageName::CompressionSelector, input.len());

    let mut scored: Vec<SelectedInstrument> = input
        .into_iter()
        .map(|enriched| {
            let breakdown = explosive_breakdown(&enriched.indicators, config);
            let explosive_score = explosive_score(&breakdown, config);
            SelectedInstrument {
                enriched,
                breakdown,
                explosive_score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.explosive_score
            .total_cmp(&a.explosive_score)
            .then_with(|| a.enriched.snapshot.symbol.cmp(&b.enriched.snapshot.symbol))
    });

    let keep = keep_count(scored.len(), &config.cut);
    for _ in keep..scored.len() {
        entry.reject(RejectionReason::InsufficientExplosiveScore);
    }
    scored.truncate(keep);

    debug!(
        count_in = entry.count_in,
        count_out = scored.len(),
        cutoff = scored.last().map(|s| s.explosive_score).unwrap_or(0.0),
        "Compression selector applied"
    );
    StageOutcome::new(scored, entry)
}
