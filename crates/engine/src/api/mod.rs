//! External data providers consumed by the pipeline

pub mod http;
pub mod synthetic;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Bar, ShortInterestData, UniverseRow};

pub use http::MarketDataClient;
pub use synthetic::SyntheticMarket;

/// Source of the daily universe snapshot and per-symbol history
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    /// Full tradable universe, including rows with no usable quote.
    /// An error here is fatal for the run.
    async fn fetch_universe(&self) -> Result<Vec<UniverseRow>>;

    /// Up to `bars` daily bars per symbol, ascending by `open_time`.
    /// Symbols without data may simply be absent from the map.
    async fn fetch_history(&self, symbols: &[String], bars: usize) -> Result<HashMap<String, Vec<Bar>>>;
}

/// Best-effort short interest, float and borrow lookups
#[async_trait]
pub trait ShortInterestProvider: Send + Sync {
    async fn fetch_short_interest(&self, symbols: &[String]) -> Result<HashMap<String, ShortInterestData>>;
}

/// Provider that never has data; every squeeze input falls back to defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct NoShortInterest;

#[async_trait]
impl ShortInterestProvider for NoShortInterest {
    async fn fetch_short_interest(&self, _symbols: &[String]) -> Result<HashMap<String, ShortInterestData>> {
        Ok(HashMap::new())
    }
}
