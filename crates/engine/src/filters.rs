//! Bulk and classification filters: cheap, field-only predicates
//!
//! Both are pure functions of (input, config). Each eliminated instrument is
//! attributed to the first check it fails.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{BulkFilterConfig, ClassificationConfig};
use crate::trace::{RejectionReason, StageEntry, StageName, StageOutcome};
use crate::types::{InstrumentSnapshot, UniverseRow};

/// First bulk check the snapshot fails, if any
fn bulk_rejection(snapshot: &InstrumentSnapshot, config: &BulkFilterConfig) -> Option<RejectionReason> {
    if snapshot.price > config.max_price {
        Some(RejectionReason::PriceAboveCap)
    } else if snapshot.price < config.min_price {
        Some(RejectionReason::PriceBelowFloor)
    } else if snapshot.volume <= Decimal::ZERO {
        Some(RejectionReason::ZeroVolume)
    } else if snapshot.dollar_volume() < config.min_dollar_volume {
        Some(RejectionReason::DollarVolumeBelowMin)
    } else {
        None
    }
}

/// Keep instruments inside the configured price and liquidity bounds.
///
/// Rows without a usable quote are rejected first as `missing_quote`.
pub fn apply_bulk_filter(universe: Vec<UniverseRow>, config: &BulkFilterConfig) -> StageOutcome<InstrumentSnapshot> {
    let mut entry = StageEntry::new(StageName::BulkFilter, universe.len());
    let mut survivors = Vec::with_capacity(universe.len());

    for row in universe {
        let Some(snapshot) = row.into_snapshot() else {
            entry.reject(RejectionReason::MissingQuote);
            continue;
        };
        match bulk_rejection(&snapshot, config) {
            Some(reason) => entry.reject(reason),
            None => survivors.push(snapshot),
        }
    }

    debug!(
        count_in = entry.count_in,
        count_out = survivors.len(),
        "Bulk filter applied"
    );
    StageOutcome::new(survivors, entry)
}

fn classification_rejection(
    snapshot: &InstrumentSnapshot,
    config: &ClassificationConfig,
) -> Option<RejectionReason> {
    let class = snapshot.instrument_class;
    if config.exclude_funds && class.is_fund() {
        Some(RejectionReason::ExcludedFund)
    } else if config.exclude_adrs && class.is_adr() {
        Some(RejectionReason::ExcludedAdr)
    } else if config.exclude_reits && class.is_reit_or_trust() {
        Some(RejectionReason::ExcludedReit)
    } else {
        // Unknown classification fails open
        None
    }
}

/// Drop funds, ADRs and REITs/trusts according to the exclusion flags
pub fn apply_classification_filter(
    input: Vec<InstrumentSnapshot>,
    config: &ClassificationConfig,
) -> StageOutcome<InstrumentSnapshot> {
    let mut entry = StageEntry::new(StageName::ClassificationFilter, input.len());
    let mut survivors = Vec::with_capacity(input.len());

    for snapshot in input {
        match classification_rejection(&snapshot, config) {
            Some(reason) => entry.reject(reason),
            None => survivors.push(snapshot),
        }
    }

    debug!(
        count_in = entry.count_in,
        count_out = survivors.len(),
        "Classification filter applied"
    );
    StageOutcome::new(survivors, entry)
}
