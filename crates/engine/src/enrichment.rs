//! Technical enrichment: fetch short-horizon history and derive indicators
//!
//! History is requested in batches with bounded concurrency. A symbol without
//! usable history is rejected, never fatal for the run.

use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::UniverseProvider;
use crate::config::EnrichmentConfig;
use crate::indicators::{compute_indicators, TechnicalIndicators};
use crate::trace::{RejectionReason, StageEntry, StageName, StageOutcome};
use crate::types::{Bar, InstrumentSnapshot};

/// A bulk/classification survivor with its derived indicators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedInstrument {
    pub snapshot: InstrumentSnapshot,
    pub indicators: TechnicalIndicators,
}

/// Fetch every symbol's history, merging batches as they complete.
/// Symbols in a failed batch are simply absent from the result.
async fn fetch_histories(
    symbols: Vec<String>,
    provider: &dyn UniverseProvider,
    config: &EnrichmentConfig,
) -> HashMap<String, Vec<Bar>> {
    let batches: Vec<Vec<String>> = symbols
        .chunks(config.fetch_batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();
    let total_batches = batches.len();
    let lookback = config.lookback_bars;

    let results: Vec<_> = stream::iter(batches.into_iter().map(|batch| async move {
        let result = provider.fetch_history(&batch, lookback).await;
        (batch, result)
    }))
    .buffer_unordered(config.max_concurrent_batches.max(1))
    .collect()
    .await;

    let mut histories = HashMap::with_capacity(symbols.len());
    let mut failed_batches = 0;
    for (batch, result) in results {
        match result {
            Ok(fetched) => histories.extend(fetched),
            Err(e) => {
                failed_batches += 1;
                warn!(
                    symbols = batch.len(),
                    first = batch.first().map(String::as_str).unwrap_or(""),
                    error = %e,
                    "History batch failed, symbols dropped"
                );
            }
        }
    }

    debug!(
        batches = total_batches,
        failed = failed_batches,
        symbols_with_history = histories.len(),
        "History fetch complete"
    );
    histories
}

/// Attach indicators to each instrument from already-fetched history.
/// Survivors keep their input order.
pub fn enrich_with_history(
    input: Vec<InstrumentSnapshot>,
    mut histories: HashMap<String, Vec<Bar>>,
    config: &EnrichmentConfig,
) -> StageOutcome<EnrichedInstrument> {
    let mut entry = StageEntry::new(StageName::TechnicalEnrichment, input.len());
    let mut survivors = Vec::with_capacity(input.len());

    for snapshot in input {
        let mut bars = match histories.remove(&snapshot.symbol) {
            Some(bars) if !bars.is_empty() => bars,
            _ => {
                entry.reject(RejectionReason::NoHistory);
                continue;
            }
        };

        bars.sort_by_key(|b| b.open_time);
        bars.dedup_by_key(|b| b.open_time);
        let window = &bars[bars.len().saturating_sub(config.lookback_bars)..];

        match compute_indicators(window, config) {
            Some(indicators) => survivors.push(EnrichedInstrument { snapshot, indicators }),
            None => {
                debug!(symbol = %snapshot.symbol, bars = window.len(), "Insufficient history");
                entry.reject(RejectionReason::InsufficientHistory);
            }
        }
    }

    StageOutcome::new(survivors, entry)
}

/// Run the enrichment stage against a history provider
pub async fn enrich(
    input: Vec<InstrumentSnapshot>,
    provider: &dyn UniverseProvider,
    config: &EnrichmentConfig,
) -> StageOutcome<EnrichedInstrument> {
    let symbols: Vec<String> = input.iter().map(|s| s.symbol.clone()).collect();
    let histories = fetch_histories(symbols, provider, config).await;
    let outcome = enrich_with_history(input, histories, config);

    debug!(
        count_in = outcome.entry.count_in,
        count_out = outcome.entry.count_out,
        "Technical enrichment applied"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstrumentClass, UniverseRow};
    use anyhow::Result;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snap(symbol: &str) -> InstrumentSnapshot {
        InstrumentSnapshot {
            symbol: symbol.to_string(),
            price: dec!(10),
            volume: dec!(2000000),
            instrument_class: InstrumentClass::CommonStock,
        }
    }

    fn flat_history(len: usize) -> Vec<Bar> {
        (0..len)
            .map(|i| Bar {
                open_time: i as i64 * 86_400_000,
                open: dec!(10),
                high: dec!(10.2),
                low: dec!(9.8),
                close: dec!(10) + Decimal::from(i as i64 % 2) / dec!(10),
                volume: dec!(1000000),
            })
            .collect()
    }

    /// Serves 30 flat bars for every symbol except `FAIL*` batches, which error
    struct FakeHistory {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UniverseProvider for FakeHistory {
        async fn fetch_universe(&self) -> Result<Vec<UniverseRow>> {
            Ok(Vec::new())
        }

        async fn fetch_history(&self, symbols: &[String], bars: usize) -> Result<HashMap<String, Vec<Bar>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbols.iter().any(|s| s.starts_with("FAIL")) {
                anyhow::bail!("rate limited");
            }
            Ok(symbols.iter().map(|s| (s.clone(), flat_history(bars))).collect())
        }
    }

    #[test]
    fn test_missing_and_short_history() {
        let config = EnrichmentConfig::default();
        let mut histories = HashMap::new();
        histories.insert("FULL".to_string(), flat_history(30));
        histories.insert("SHORT".to_string(), flat_history(5));
        histories.insert("EMPTY".to_string(), Vec::new());

        let input = vec![snap("FULL"), snap("SHORT"), snap("EMPTY"), snap("NONE")];
        let outcome = enrich_with_history(input, histories, &config);

        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].snapshot.symbol, "FULL");
        assert_eq!(outcome.entry.rejection_reasons[&RejectionReason::NoHistory], 2);
        assert_eq!(outcome.entry.rejection_reasons[&RejectionReason::InsufficientHistory], 1);
        assert!(outcome.entry.is_balanced());
    }

    #[test]
    fn test_zero_close_rejected_as_insufficient_history() {
        let config = EnrichmentConfig::default();
        let mut bars = flat_history(30);
        bars[26].close = Decimal::ZERO;

        let mut histories = HashMap::new();
        histories.insert("ZERO".to_string(), bars);
        histories.insert("FULL".to_string(), flat_history(30));
        let outcome = enrich_with_history(vec![snap("ZERO"), snap("FULL")], histories, &config);

        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].snapshot.symbol, "FULL");
        assert!(outcome.survivors[0].indicators.is_finite());
        assert_eq!(outcome.entry.rejection_reasons[&RejectionReason::InsufficientHistory], 1);
    }

    #[test]
    fn test_unsorted_history_is_ordered() {
        let config = EnrichmentConfig::default();
        let mut bars = flat_history(30);
        let expected = compute_indicators(&bars, &config).unwrap();
        bars.reverse();

        let mut histories = HashMap::new();
        histories.insert("REV".to_string(), bars);
        let outcome = enrich_with_history(vec![snap("REV")], histories, &config);
        assert_eq!(outcome.survivors[0].indicators, expected);
    }

    #[tokio::test]
    async fn test_failed_batch_is_partial_failure() {
        let provider = FakeHistory {
            calls: AtomicUsize::new(0),
        };
        let config = EnrichmentConfig {
            fetch_batch_size: 2,
            max_concurrent_batches: 2,
            ..EnrichmentConfig::default()
        };
        let input = vec![snap("AAA"), snap("BBB"), snap("FAIL1"), snap("CCC"), snap("DDD")];

        let outcome = enrich(input, &provider, &config).await;

        // Batches: [AAA, BBB], [FAIL1, CCC], [DDD]
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let symbols: Vec<&str> = outcome.survivors.iter().map(|e| e.snapshot.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAA", "BBB", "DDD"]);
        assert_eq!(outcome.entry.rejection_reasons[&RejectionReason::NoHistory], 2);
    }
}
