//! Squeeze scorer: composite squeeze score, confidence tier and thesis
//!
//! Volume always comes from observed history. Short interest, float and borrow
//! rate come from the short-interest provider when it has them and from the
//! configured defaults otherwise; every factor records which.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::ShortInterestProvider;
use crate::config::{SqueezeConfig, SqueezeWeights, TierBounds};
use crate::pattern::PatternMatch;
use crate::selector::ramp;
use crate::trace::{RejectionReason, StageEntry, StageName, StageOutcome};
use crate::types::{unit, Candidate, Factor, Provenance, ShortInterestData};

/// Sub-scores of the squeeze composite, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SqueezeBreakdown {
    pub volume: f64,
    pub short_interest: f64,
    pub float_tightness: f64,
    pub borrow_pressure: f64,
}

pub fn squeeze_score(breakdown: &SqueezeBreakdown, weights: &SqueezeWeights) -> f64 {
    unit(
        weights.volume * breakdown.volume
            + weights.short_interest * breakdown.short_interest
            + weights.float_tightness * breakdown.float_tightness
            + weights.borrow_pressure * breakdown.borrow_pressure,
    )
}

/// 1.0 at or below the tight float, 0.0 at or above the loose float
fn float_tightness(float_shares: f64, config: &SqueezeConfig) -> f64 {
    1.0 - ramp(float_shares, config.tight_float_shares, config.loose_float_shares)
}

/// Observed value if the provider returned a usable one, else the default
fn resolve(observed: Option<f64>, default: f64) -> Factor {
    match observed.filter(|v| v.is_finite() && *v >= 0.0) {
        Some(value) => Factor::observed(value),
        None => Factor::estimated(default),
    }
}

fn provenance_label(factor: &Factor) -> &'static str {
    match factor.provenance {
        Provenance::Observed => "observed",
        Provenance::Estimated => "estimated",
    }
}

fn score_match(
    matched: PatternMatch,
    data: Option<&ShortInterestData>,
    config: &SqueezeConfig,
    tiers: &TierBounds,
) -> (f64, Candidate) {
    let defaults = &config.defaults;
    let short_interest = resolve(data.and_then(|d| d.short_interest_pct), defaults.short_interest_pct);
    let float_shares = resolve(data.and_then(|d| d.float_shares), defaults.float_shares);
    let borrow_rate = resolve(data.and_then(|d| d.borrow_rate_pct), defaults.borrow_rate_pct);

    let ind = &matched.selected.enriched.indicators;
    let breakdown = SqueezeBreakdown {
        volume: ramp(ind.volume_spike, 1.0, config.volume_spike_saturation),
        short_interest: ramp(short_interest.value, 0.0, config.short_interest_saturation_pct),
        float_tightness: float_tightness(float_shares.value, config),
        borrow_pressure: ramp(borrow_rate.value, 0.0, config.borrow_rate_saturation_pct),
    };
    let score = squeeze_score(&breakdown, &config.weights);
    let confidence = tiers.classify(score);

    let snapshot = &matched.selected.enriched.snapshot;
    let thesis = format!(
        "{}: volume {:.1}x average, momentum {:+.1}%; short interest {:.1}% ({}), float {:.1}M ({}), borrow {:.1}% ({}); squeeze {:.2} {}",
        snapshot.symbol,
        ind.volume_spike,
        ind.momentum_pct,
        short_interest.value,
        provenance_label(&short_interest),
        float_shares.value / 1_000_000.0,
        provenance_label(&float_shares),
        borrow_rate.value,
        provenance_label(&borrow_rate),
        score,
        confidence,
    );

    let mut factors = BTreeMap::new();
    for (name, value) in [
        ("volume_spike", ind.volume_spike),
        ("momentum_pct", ind.momentum_pct),
        ("range_position", ind.range_position),
        ("volatility_expansion", ind.volatility_expansion),
        ("volatility_pct", ind.volatility_pct),
        ("compression_percentile", ind.compression_percentile),
        ("wolf_risk", ind.wolf_risk),
        ("volume_score", breakdown.volume),
    ] {
        factors.insert(name.to_string(), Factor::observed(value));
    }
    factors.insert("short_interest_pct".into(), short_interest);
    factors.insert("float_shares".into(), float_shares);
    factors.insert("borrow_rate_pct".into(), borrow_rate);
    factors.insert(
        "short_interest_score".into(),
        Factor {
            value: breakdown.short_interest,
            provenance: short_interest.provenance,
        },
    );
    factors.insert(
        "float_tightness_score".into(),
        Factor {
            value: breakdown.float_tightness,
            provenance: float_shares.provenance,
        },
    );
    factors.insert(
        "borrow_pressure_score".into(),
        Factor {
            value: breakdown.borrow_pressure,
            provenance: borrow_rate.provenance,
        },
    );

    let candidate = Candidate {
        rank: 0,
        symbol: snapshot.symbol.clone(),
        price: snapshot.price,
        volume_spike: ind.volume_spike,
        momentum_pct: ind.momentum_pct,
        explosive_score: matched.selected.explosive_score,
        pattern_similarity_score: matched.similarity,
        squeeze_score: score,
        confidence,
        thesis,
        factors,
    };
    (score, candidate)
}

/// Score every pattern match against already-fetched short-interest data
pub fn apply_squeeze_scorer(
    input: Vec<PatternMatch>,
    short_interest: &HashMap<String, ShortInterestData>,
    config: &SqueezeConfig,
    tiers: &TierBounds,
) -> StageOutcome<Candidate> {
    let mut entry = StageEntry::new(StageName::SqueezeScorer, input.len());
    let mut survivors = Vec::with_capacity(input.len());

    for matched in input {
        let data = short_interest.get(&matched.selected.enriched.snapshot.symbol);
        let (score, candidate) = score_match(matched, data, config, tiers);
        if score >= config.min_squeeze_score {
            survivors.push(candidate);
        } else {
            entry.reject(RejectionReason::SqueezeScoreBelowMin);
        }
    }

    debug!(
        count_in = entry.count_in,
        count_out = survivors.len(),
        "Squeeze scorer applied"
    );
    StageOutcome::new(survivors, entry)
}

/// Look up short interest, then score. A provider failure degrades to defaults.
pub async fn score_squeeze(
    input: Vec<PatternMatch>,
    provider: &dyn ShortInterestProvider,
    config: &SqueezeConfig,
    tiers: &TierBounds,
) -> StageOutcome<Candidate> {
    let symbols: Vec<String> = input
        .iter()
        .map(|m| m.selected.enriched.snapshot.symbol.clone())
        .collect();

    let short_interest = if symbols.is_empty() {
        HashMap::new()
    } else {
        match provider.fetch_short_interest(&symbols).await {
            Ok(data) => {
                debug!(requested = symbols.len(), returned = data.len(), "Fetched short interest");
                data
            }
            Err(e) => {
                warn!(error = %e, symbols = symbols.len(), "Short interest unavailable, using defaults");
                HashMap::new()
            }
        }
    };

    apply_squeeze_scorer(input, &short_interest, config, tiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::NoShortInterest;
    use crate::enrichment::EnrichedInstrument;
    use crate::indicators::TechnicalIndicators;
    use crate::pattern::PatternBreakdown;
    use crate::selector::{ExplosiveBreakdown, SelectedInstrument};
    use crate::types::{ConfidenceTier, InstrumentClass, InstrumentSnapshot};
    use anyhow::Result;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn matched(symbol: &str, volume_spike: f64) -> PatternMatch {
        PatternMatch {
            selected: SelectedInstrument {
                enriched: EnrichedInstrument {
                    snapshot: InstrumentSnapshot {
                        symbol: symbol.to_string(),
                        price: dec!(6.40),
                        volume: dec!(9000000),
                        instrument_class: InstrumentClass::CommonStock,
                    },
                    indicators: TechnicalIndicators {
                        volume_spike,
                        momentum_pct: 12.0,
                        range_position: 0.85,
                        volatility_expansion: 1.8,
                        volatility_pct: 6.0,
                        range_ratio: 0.1,
                        compression_percentile: 0.7,
                        wolf_risk: 0.2,
                    },
                },
                breakdown: ExplosiveBreakdown {
                    volume_spike: 0.9,
                    momentum: 0.6,
                    range_position: 0.85,
                    volatility_expansion: 0.4,
                    compression: 0.3,
                },
                explosive_score: 0.72,
            },
            breakdown: PatternBreakdown {
                volume: 0.9,
                momentum: 0.8,
                risk: 0.8,
                volatility: 0.75,
            },
            similarity: 0.83,
        }
    }

    struct FailingShortInterest;

    #[async_trait]
    impl ShortInterestProvider for FailingShortInterest {
        async fn fetch_short_interest(&self, _symbols: &[String]) -> Result<HashMap<String, ShortInterestData>> {
            anyhow::bail!("provider down")
        }
    }

    #[test]
    fn test_weighted_composite_and_tier() {
        let weights = SqueezeWeights {
            volume: 0.5,
            short_interest: 0.2,
            float_tightness: 0.2,
            borrow_pressure: 0.1,
        };
        let breakdown = SqueezeBreakdown {
            volume: 1.0,
            short_interest: 0.5,
            float_tightness: 0.5,
            borrow_pressure: 0.5,
        };
        let score = squeeze_score(&breakdown, &weights);
        assert!((score - 0.75).abs() < 1e-9);
        assert_eq!(TierBounds::default().classify(score), ConfidenceTier::Extreme);
    }

    #[test]
    fn test_observed_data_is_flagged_observed() {
        let mut data = HashMap::new();
        data.insert(
            "SQZ".to_string(),
            ShortInterestData {
                short_interest_pct: Some(30.0),
                float_shares: Some(8_000_000.0),
                borrow_rate_pct: None,
            },
        );
        let outcome = apply_squeeze_scorer(
            vec![matched("SQZ", 5.0)],
            &data,
            &SqueezeConfig::default(),
            &TierBounds::default(),
        );
        let candidate = &outcome.survivors[0];

        assert_eq!(candidate.factors["short_interest_pct"].provenance, Provenance::Observed);
        assert_eq!(candidate.factors["float_tightness_score"].provenance, Provenance::Observed);
        assert_eq!(candidate.factors["float_tightness_score"].value, 1.0);
        assert_eq!(candidate.factors["borrow_rate_pct"].provenance, Provenance::Estimated);
        assert_eq!(candidate.factors["borrow_rate_pct"].value, 5.0);
        assert_eq!(candidate.factors["volume_score"].provenance, Provenance::Observed);

        // 0.40 * 1 + 0.30 * 1 + 0.20 * 1 + 0.10 * 0.1
        assert!((candidate.squeeze_score - 0.91).abs() < 1e-9);
        assert_eq!(candidate.confidence, ConfidenceTier::Extreme);
        assert!(candidate.thesis.contains("borrow 5.0% (estimated)"));
        assert!(candidate.thesis.contains("short interest 30.0% (observed)"));
    }

    #[tokio::test]
    async fn test_provider_failure_uses_defaults() {
        let config = SqueezeConfig::default();
        let tiers = TierBounds::default();

        let failed = score_squeeze(vec![matched("AAA", 4.0)], &FailingShortInterest, &config, &tiers).await;
        let empty = score_squeeze(vec![matched("AAA", 4.0)], &NoShortInterest, &config, &tiers).await;

        assert_eq!(failed.survivors, empty.survivors);
        let candidate = &failed.survivors[0];
        for key in ["short_interest_score", "float_tightness_score", "borrow_pressure_score"] {
            assert_eq!(candidate.factors[key].provenance, Provenance::Estimated);
        }
        assert!(candidate.squeeze_score >= 0.0 && candidate.squeeze_score <= 1.0);
    }

    #[test]
    fn test_below_minimum_is_rejected() {
        let config = SqueezeConfig {
            min_squeeze_score: 0.95,
            ..SqueezeConfig::default()
        };
        let outcome = apply_squeeze_scorer(vec![matched("MEH", 2.0)], &HashMap::new(), &config, &TierBounds::default());
        assert!(outcome.survivors.is_empty());
        assert_eq!(outcome.entry.rejection_reasons[&RejectionReason::SqueezeScoreBelowMin], 1);
    }

    #[test]
    fn test_float_curve() {
        let config = SqueezeConfig::default();
        assert_eq!(float_tightness(5_000_000.0, &config), 1.0);
        assert_eq!(float_tightness(250_000_000.0, &config), 0.0);
        assert!((float_tightness(105_000_000.0, &config) - 0.5).abs() < 1e-9);
    }
}
