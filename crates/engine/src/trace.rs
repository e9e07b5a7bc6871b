//! Stage trace: how many instruments entered and left each stage, and why
//!
//! Stages are pure functions returning a [`StageOutcome`]; the coordinator
//! folds their entries into a [`StageTrace`] in pipeline order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    BulkFilter,
    ClassificationFilter,
    TechnicalEnrichment,
    CompressionSelector,
    PatternDetector,
    SqueezeScorer,
}

impl StageName {
    pub fn label(&self) -> &'static str {
        match self {
            Self::BulkFilter => "bulk_filter",
            Self::ClassificationFilter => "classification_filter",
            Self::TechnicalEnrichment => "technical_enrichment",
            Self::CompressionSelector => "compression_selector",
            Self::PatternDetector => "pattern_detector",
            Self::SqueezeScorer => "squeeze_scorer",
        }
    }
}

/// Why an instrument was eliminated. Exactly one per instrument per stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    MissingQuote,
    PriceAboveCap,
    PriceBelowFloor,
    ZeroVolume,
    DollarVolumeBelowMin,
    ExcludedFund,
    ExcludedAdr,
    ExcludedReit,
    NoHistory,
    InsufficientHistory,
    InsufficientExplosiveScore,
    VolumeSpikeBelowMin,
    RiskAboveMax,
    MomentumBelowMin,
    VolatilityBelowMin,
    SimilarityBelowMin,
    SqueezeScoreBelowMin,
}

impl RejectionReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingQuote => "missing_quote",
            Self::PriceAboveCap => "price_above_cap",
            Self::PriceBelowFloor => "price_below_floor",
            Self::ZeroVolume => "zero_volume",
            Self::DollarVolumeBelowMin => "dollar_volume_below_min",
            Self::ExcludedFund => "excluded_fund",
            Self::ExcludedAdr => "excluded_adr",
            Self::ExcludedReit => "excluded_reit",
            Self::NoHistory => "no_history",
            Self::InsufficientHistory => "insufficient_history",
            Self::InsufficientExplosiveScore => "insufficient_explosive_score",
            Self::VolumeSpikeBelowMin => "volume_spike_below_min",
            Self::RiskAboveMax => "risk_above_max",
            Self::MomentumBelowMin => "momentum_below_min",
            Self::VolatilityBelowMin => "volatility_below_min",
            Self::SimilarityBelowMin => "similarity_below_min",
            Self::SqueezeScoreBelowMin => "squeeze_score_below_min",
        }
    }
}

/// Counts for a single stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: StageName,
    pub count_in: usize,
    pub count_out: usize,
    pub rejection_reasons: BTreeMap<RejectionReason, usize>,
}

impl StageEntry {
    pub fn new(stage: StageName, count_in: usize) -> Self {
        Self {
            stage,
            count_in,
            count_out: 0,
            rejection_reasons: BTreeMap::new(),
        }
    }

    pub fn reject(&mut self, reason: RejectionReason) {
        *self.rejection_reasons.entry(reason).or_default() += 1;
    }

    pub fn rejected(&self) -> usize {
        self.rejection_reasons.values().sum()
    }

    /// Every instrument that entered either survived or has one reason
    pub fn is_balanced(&self) -> bool {
        self.count_out <= self.count_in && self.count_in == self.count_out + self.rejected()
    }
}

/// Survivors of a stage plus its trace entry
#[derive(Debug, Clone)]
pub struct StageOutcome<T> {
    pub survivors: Vec<T>,
    pub entry: StageEntry,
}

impl<T> StageOutcome<T> {
    pub fn new(survivors: Vec<T>, mut entry: StageEntry) -> Self {
        entry.count_out = survivors.len();
        debug_assert!(entry.is_balanced(), "unbalanced stage entry: {entry:?}");
        Self { survivors, entry }
    }
}

/// The explain artifact for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTrace {
    pub run_id: String,
    pub config_fingerprint: String,
    pub universe_size: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageEntry>,
}

impl StageTrace {
    pub fn new(run_id: &str, config_fingerprint: &str, universe_size: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            config_fingerprint: config_fingerprint.to_string(),
            universe_size,
            started_at,
            finished_at: None,
            stages: Vec::new(),
        }
    }

    /// Append a stage entry; the trace is append-only until finalized
    pub fn record(&mut self, entry: StageEntry) {
        debug_assert!(self.finished_at.is_none(), "trace already finalized");
        self.stages.push(entry);
    }

    pub fn finalize(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
    }

    pub fn final_count(&self) -> usize {
        self.stages.last().map(|s| s.count_out).unwrap_or(self.universe_size)
    }

    /// Counts never increase and each stage starts where the previous ended
    pub fn is_consistent(&self) -> bool {
        let mut expected_in = self.universe_size;
        for stage in &self.stages {
            if stage.count_in != expected_in || !stage.is_balanced() {
                return false;
            }
            expected_in = stage.count_out;
        }
        true
    }
}
