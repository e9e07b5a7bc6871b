//! Runtime configuration for every stage of the discovery funnel
//!
//! Every threshold and weight is tunable without a code change. The defaults
//! below are one self-consistent set; none of them is authoritative.

use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::types::ConfidenceTier;

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Full discovery configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub bulk: BulkFilterConfig,
    pub classification: ClassificationConfig,
    pub enrichment: EnrichmentConfig,
    pub selector: SelectorConfig,
    pub pattern: PatternConfig,
    pub squeeze: SqueezeConfig,
    pub tiers: TierBounds,
    pub coordination: CoordinationConfig,
}

// ============================================================================
// Stage sections
// ============================================================================

/// Numeric bounds for the bulk filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkFilterConfig {
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub min_dollar_volume: Decimal,
}

impl Default for BulkFilterConfig {
    fn default() -> Self {
        Self {
            min_price: dec!(1.00),
            max_price: dec!(100.00),
            min_dollar_volume: dec!(10000000),
        }
    }
}

/// Independently toggleable class exclusions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// ETFs and ETNs
    pub exclude_funds: bool,
    pub exclude_adrs: bool,
    /// REITs and trusts
    pub exclude_reits: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            exclude_funds: true,
            exclude_adrs: true,
            exclude_reits: true,
        }
    }
}

/// History window and indicator periods for technical enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Daily bars requested per symbol
    pub lookback_bars: usize,
    /// Bars averaged for the volume-spike baseline (excludes the latest bar)
    pub volume_avg_window: usize,
    /// Rate-of-change period for short-term momentum
    pub momentum_days: usize,
    pub atr_short_period: usize,
    pub atr_long_period: usize,
    /// Daily returns in the realized-volatility window
    pub volatility_period: usize,
    /// SMA used to measure extension for downside risk
    pub sma_period: usize,
    /// Bars spanned by one rolling range ratio
    pub compression_window: usize,
    /// Trailing range ratios the latest one is ranked against
    pub compression_lookback: usize,
    /// Symbols per history request
    pub fetch_batch_size: usize,
    /// History requests in flight at once
    pub max_concurrent_batches: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            lookback_bars: 30,
            volume_avg_window: 20,
            momentum_days: 3,
            atr_short_period: 5,
            atr_long_period: 20,
            volatility_period: 10,
            sma_period: 20,
            compression_window: 5,
            compression_lookback: 20,
            fetch_batch_size: 50,
            max_concurrent_batches: 4,
        }
    }
}

impl EnrichmentConfig {
    /// Minimum number of bars every indicator needs
    pub fn required_bars(&self) -> usize {
        [
            self.volume_avg_window + 1,
            self.momentum_days + 1,
            self.atr_long_period + 1,
            self.atr_short_period + 1,
            self.volatility_period + 1,
            self.sma_period,
            self.compression_window + self.compression_lookback - 1,
            3,
        ]
        .into_iter()
        .max()
        .unwrap_or(3)
    }
}

/// Weights of the explosive heuristic; must sum to 1.0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplosiveWeights {
    pub volume_spike: f64,
    pub momentum: f64,
    pub range_position: f64,
    pub volatility_expansion: f64,
    pub compression: f64,
}

impl Default for ExplosiveWeights {
    fn default() -> Self {
        Self {
            volume_spike: 0.40,
            momentum: 0.25,
            range_position: 0.15,
            volatility_expansion: 0.20,
            compression: 0.0,
        }
    }
}

impl ExplosiveWeights {
    fn values(&self) -> [f64; 5] {
        [
            self.volume_spike,
            self.momentum,
            self.range_position,
            self.volatility_expansion,
            self.compression,
        ]
    }
}

/// How many ranked instruments the selector keeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SelectionCut {
    /// Keep `ceil(n * percentile / 100)`
    TopPercentile { percentile: f64 },
    TopN { count: usize },
}

/// Compression/momentum selector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub weights: ExplosiveWeights,
    /// Volume spike that earns a full sub-score
    pub volume_spike_saturation: f64,
    pub momentum_saturation_pct: f64,
    pub expansion_saturation: f64,
    pub cut: SelectionCut,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            weights: ExplosiveWeights::default(),
            volume_spike_saturation: 5.0,
            momentum_saturation_pct: 20.0,
            expansion_saturation: 3.0,
            cut: SelectionCut::TopPercentile { percentile: 25.0 },
        }
    }
}

/// The reference explosive move similarity is measured against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePattern {
    pub volume_spike: f64,
    pub momentum_pct: f64,
    pub volatility_pct: f64,
}

impl Default for ReferencePattern {
    fn default() -> Self {
        Self {
            volume_spike: 5.0,
            momentum_pct: 15.0,
            volatility_pct: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternWeights {
    pub volume: f64,
    pub momentum: f64,
    pub risk: f64,
    pub volatility: f64,
}

impl Default for PatternWeights {
    fn default() -> Self {
        Self {
            volume: 0.35,
            momentum: 0.25,
            risk: 0.20,
            volatility: 0.20,
        }
    }
}

/// Pattern detector thresholds; every one must pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub reference: ReferencePattern,
    pub weights: PatternWeights,
    pub min_volume_spike: f64,
    pub max_wolf_risk: f64,
    pub min_momentum_pct: f64,
    pub min_volatility_pct: f64,
    pub min_similarity: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            reference: ReferencePattern::default(),
            weights: PatternWeights::default(),
            min_volume_spike: 1.5,
            max_wolf_risk: 0.65,
            min_momentum_pct: 0.0,
            min_volatility_pct: 1.0,
            min_similarity: 0.45,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqueezeWeights {
    pub volume: f64,
    pub short_interest: f64,
    pub float_tightness: f64,
    pub borrow_pressure: f64,
}

impl Default for SqueezeWeights {
    fn default() -> Self {
        Self {
            volume: 0.40,
            short_interest: 0.30,
            float_tightness: 0.20,
            borrow_pressure: 0.10,
        }
    }
}

/// Assumed inputs when the short-interest provider has no data.
/// Sub-scores built from these are flagged `estimated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqueezeDefaults {
    pub short_interest_pct: f64,
    pub float_shares: f64,
    pub borrow_rate_pct: f64,
}

impl Default for SqueezeDefaults {
    fn default() -> Self {
        Self {
            short_interest_pct: 10.0,
            float_shares: 75_000_000.0,
            borrow_rate_pct: 5.0,
        }
    }
}

/// Squeeze scorer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqueezeConfig {
    pub weights: SqueezeWeights,
    pub defaults: SqueezeDefaults,
    pub volume_spike_saturation: f64,
    pub short_interest_saturation_pct: f64,
    /// Float at or below this scores 1.0
    pub tight_float_shares: f64,
    /// Float at or above this scores 0.0
    pub loose_float_shares: f64,
    pub borrow_rate_saturation_pct: f64,
    pub min_squeeze_score: f64,
}

impl Default for SqueezeConfig {
    fn default() -> Self {
        Self {
            weights: SqueezeWeights::default(),
            defaults: SqueezeDefaults::default(),
            volume_spike_saturation: 5.0,
            short_interest_saturation_pct: 30.0,
            tight_float_shares: 10_000_000.0,
            loose_float_shares: 200_000_000.0,
            borrow_rate_saturation_pct: 50.0,
            min_squeeze_score: 0.35,
        }
    }
}

/// Ascending lower bounds of each confidence tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBounds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub extreme: f64,
}

impl Default for TierBounds {
    fn default() -> Self {
        Self {
            low: 0.35,
            medium: 0.50,
            high: 0.60,
            extreme: 0.70,
        }
    }
}

impl TierBounds {
    /// Highest tier whose lower bound the score meets
    pub fn classify(&self, score: f64) -> ConfidenceTier {
        if score >= self.extreme {
            ConfidenceTier::Extreme
        } else if score >= self.high {
            ConfidenceTier::High
        } else if score >= self.medium {
            ConfidenceTier::Medium
        } else if score >= self.low {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::None
        }
    }
}

/// Run lock and publication lifetimes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub lock_ttl_secs: u64,
    pub result_ttl_secs: u64,
    /// Interval of the built-in scheduler, if used
    pub schedule_interval_secs: Option<u64>,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 900,
            result_ttl_secs: 3000,
            schedule_interval_secs: None,
        }
    }
}

// ============================================================================
// Loading & validation
// ============================================================================

impl DiscoveryConfig {
    /// Load from a JSON file; absent fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// SHA-256 of the canonical JSON form, stored with every trace
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", Sha256::digest(json.as_bytes()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bulk = &self.bulk;
        if bulk.min_price < Decimal::ZERO || bulk.min_price > bulk.max_price {
            return Err(invalid(format!(
                "bulk price bounds must satisfy 0 <= min_price <= max_price (got {} / {})",
                bulk.min_price, bulk.max_price
            )));
        }
        if bulk.min_dollar_volume < Decimal::ZERO {
            return Err(invalid("bulk.min_dollar_volume must be non-negative"));
        }

        let enrichment = &self.enrichment;
        if [
            enrichment.volume_avg_window,
            enrichment.momentum_days,
            enrichment.atr_short_period,
            enrichment.atr_long_period,
            enrichment.volatility_period,
            enrichment.sma_period,
            enrichment.compression_window,
            enrichment.compression_lookback,
            enrichment.fetch_batch_size,
            enrichment.max_concurrent_batches,
        ]
        .contains(&0)
        {
            return Err(invalid("enrichment periods and batch sizes must be positive"));
        }
        if enrichment.lookback_bars < enrichment.required_bars() {
            return Err(invalid(format!(
                "enrichment.lookback_bars ({}) is shorter than the {} bars the indicators need",
                enrichment.lookback_bars,
                enrichment.required_bars()
            )));
        }

        check_weights("selector.weights", &self.selector.weights.values())?;
        let selector = &self.selector;
        if selector.volume_spike_saturation <= 1.0 || selector.expansion_saturation <= 1.0 {
            return Err(invalid("selector ratio saturations must be greater than 1.0"));
        }
        if selector.momentum_saturation_pct <= 0.0 {
            return Err(invalid("selector.momentum_saturation_pct must be positive"));
        }
        match selector.cut {
            SelectionCut::TopPercentile { percentile } if !(percentile > 0.0 && percentile <= 100.0) => {
                return Err(invalid(format!(
                    "selector percentile must be in (0, 100] (got {percentile})"
                )));
            }
            SelectionCut::TopN { count: 0 } => {
                return Err(invalid("selector top-N count must be positive"));
            }
            _ => {}
        }

        let pattern = &self.pattern;
        let w = &pattern.weights;
        check_weights("pattern.weights", &[w.volume, w.momentum, w.risk, w.volatility])?;
        if pattern.reference.volume_spike <= 1.0
            || pattern.reference.momentum_pct <= 0.0
            || pattern.reference.volatility_pct <= 0.0
        {
            return Err(invalid("pattern.reference values must be positive (volume spike > 1.0)"));
        }
        check_unit("pattern.max_wolf_risk", pattern.max_wolf_risk)?;
        check_unit("pattern.min_similarity", pattern.min_similarity)?;

        let squeeze = &self.squeeze;
        let w = &squeeze.weights;
        check_weights(
            "squeeze.weights",
            &[w.volume, w.short_interest, w.float_tightness, w.borrow_pressure],
        )?;
        if squeeze.volume_spike_saturation <= 1.0 {
            return Err(invalid("squeeze.volume_spike_saturation must be greater than 1.0"));
        }
        if squeeze.short_interest_saturation_pct <= 0.0 || squeeze.borrow_rate_saturation_pct <= 0.0 {
            return Err(invalid("squeeze saturation percentages must be positive"));
        }
        if squeeze.tight_float_shares < 0.0 || squeeze.loose_float_shares <= squeeze.tight_float_shares {
            return Err(invalid("squeeze float bounds must satisfy 0 <= tight < loose"));
        }
        let d = &squeeze.defaults;
        if d.short_interest_pct < 0.0 || d.float_shares < 0.0 || d.borrow_rate_pct < 0.0 {
            return Err(invalid("squeeze.defaults must be non-negative"));
        }
        check_unit("squeeze.min_squeeze_score", squeeze.min_squeeze_score)?;

        let t = &self.tiers;
        for (name, bound) in [("low", t.low), ("medium", t.medium), ("high", t.high), ("extreme", t.extreme)] {
            check_unit(&format!("tiers.{name}"), bound)?;
        }
        if !(t.low <= t.medium && t.medium <= t.high && t.high <= t.extreme) {
            return Err(invalid("tier bounds must be ascending: low <= medium <= high <= extreme"));
        }

        let c = &self.coordination;
        if c.lock_ttl_secs == 0 || c.result_ttl_secs == 0 {
            return Err(invalid("lock and result TTLs must be positive"));
        }
        if let Some(interval) = c.schedule_interval_secs {
            if c.result_ttl_secs >= interval {
                return Err(invalid(format!(
                    "result TTL ({}s) must be shorter than the schedule interval ({}s)",
                    c.result_ttl_secs, interval
                )));
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within [0, 1] (got {value})")))
    }
}

fn check_weights(name: &str, weights: &[f64]) -> Result<(), ConfigError> {
    if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
        return Err(invalid(format!("{name} must be finite and non-negative")));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(invalid(format!("{name} must sum to 1.0 (got {sum:.6})")));
    }
    Ok(())
}
