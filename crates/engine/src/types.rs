//! Core data model for the discovery funnel

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single daily bar (OHLCV)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Session open, epoch milliseconds
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Instrument class as reported by the universe provider's metadata
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentClass {
    CommonStock,
    Etf,
    Etn,
    Adr,
    Reit,
    Trust,
    Preferred,
    /// Missing or unrecognised metadata
    #[default]
    #[serde(other)]
    Unknown,
}

impl InstrumentClass {
    pub fn is_fund(&self) -> bool {
        matches!(self, Self::Etf | Self::Etn)
    }

    pub fn is_adr(&self) -> bool {
        matches!(self, Self::Adr)
    }

    pub fn is_reit_or_trust(&self) -> bool {
        matches!(self, Self::Reit | Self::Trust)
    }
}

/// A universe row as the provider delivered it. The quote fields are `None`
/// when the provider sent nothing usable; the bulk filter rejects those rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseRow {
    pub symbol: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
    #[serde(default)]
    pub instrument_class: InstrumentClass,
}

impl UniverseRow {
    /// Snapshot with a complete quote, if the row has one
    pub fn into_snapshot(self) -> Option<InstrumentSnapshot> {
        Some(InstrumentSnapshot {
            price: self.price?,
            volume: self.volume?,
            symbol: self.symbol,
            instrument_class: self.instrument_class,
        })
    }
}

impl From<InstrumentSnapshot> for UniverseRow {
    fn from(snapshot: InstrumentSnapshot) -> Self {
        Self {
            symbol: snapshot.symbol,
            price: Some(snapshot.price),
            volume: Some(snapshot.volume),
            instrument_class: snapshot.instrument_class,
        }
    }
}

/// One quoted row of the daily universe snapshot. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub instrument_class: InstrumentClass,
}

impl InstrumentSnapshot {
    pub fn dollar_volume(&self) -> Decimal {
        self.price * self.volume
    }
}

/// Best-effort short-interest lookup result; any field may be missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShortInterestData {
    pub short_interest_pct: Option<f64>,
    pub float_shares: Option<f64>,
    pub borrow_rate_pct: Option<f64>,
}

/// Where a factor value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Observed,
    Estimated,
}

/// A single entry of a candidate's factor breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub value: f64,
    pub provenance: Provenance,
}

impl Factor {
    pub fn observed(value: f64) -> Self {
        Self {
            value,
            provenance: Provenance::Observed,
        }
    }

    pub fn estimated(value: f64) -> Self {
        Self {
            value,
            provenance: Provenance::Estimated,
        }
    }
}

/// Ordered confidence classification derived from the squeeze score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    None,
    Low,
    Medium,
    High,
    Extreme,
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "NONE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Extreme => "EXTREME",
        };
        f.pad(label)
    }
}

/// An instrument that survived the full funnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub rank: usize,
    pub symbol: String,
    pub price: Decimal,
    pub volume_spike: f64,
    pub momentum_pct: f64,
    pub explosive_score: f64,
    pub pattern_similarity_score: f64,
    pub squeeze_score: f64,
    pub confidence: ConfidenceTier,
    pub thesis: String,
    pub factors: BTreeMap<String, Factor>,
}

/// Clamp into [0, 1], mapping NaN to 0
pub(crate) fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub(crate) fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
