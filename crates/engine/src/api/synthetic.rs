//! Seeded synthetic market for demos and tests
//!
//! Everything is a pure function of the seed: the same seed always yields the
//! same universe, histories and short-interest data.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::{ShortInterestProvider, UniverseProvider};
use crate::types::{to_f64, Bar, InstrumentClass, InstrumentSnapshot, ShortInterestData, UniverseRow};

/// 2024-01-02 00:00 UTC; synthetic sessions are consecutive days after it
const BASE_OPEN_TIME: i64 = 1_704_153_600_000;
const DAY_MS: i64 = 86_400_000;

/// Per-symbol behaviour drawn once from the seed
#[derive(Debug, Clone, Copy)]
struct Profile {
    daily_vol: f64,
    breakout: bool,
    /// Bars this symbol has actually traded; `None` means no history at all
    listed_bars: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct SyntheticMarket {
    seed: u64,
    universe: Vec<InstrumentSnapshot>,
    profiles: HashMap<String, Profile>,
}

fn decimal(value: f64, dp: u32) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO).round_dp(dp)
}

/// Stable per-symbol seed (FNV-1a)
fn symbol_seed(seed: u64, symbol: &str) -> u64 {
    symbol
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325 ^ seed, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

fn draw_class(rng: &mut StdRng) -> InstrumentClass {
    match rng.gen_range(0..100) {
        0..=69 => InstrumentClass::CommonStock,
        70..=77 => InstrumentClass::Etf,
        78..=79 => InstrumentClass::Etn,
        80..=85 => InstrumentClass::Adr,
        86..=90 => InstrumentClass::Reit,
        91..=92 => InstrumentClass::Trust,
        93..=95 => InstrumentClass::Preferred,
        _ => InstrumentClass::Unknown,
    }
}

impl SyntheticMarket {
    pub fn new(seed: u64, universe_size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut universe = Vec::with_capacity(universe_size);
        let mut profiles = HashMap::with_capacity(universe_size);

        for i in 0..universe_size {
            let symbol = format!("SYN{:04}", i);
            let price = rng.gen_range(0.5..150.0);
            let volume = rng.gen_range(50_000.0..20_000_000.0_f64).round();

            let listed_bars = match rng.gen_range(0..100) {
                0..=3 => None,
                4..=7 => Some(rng.gen_range(2..15)),
                _ => Some(usize::MAX),
            };
            profiles.insert(
                symbol.clone(),
                Profile {
                    daily_vol: rng.gen_range(0.01..0.05),
                    breakout: rng.gen_bool(0.2),
                    listed_bars,
                },
            );
            universe.push(InstrumentSnapshot {
                symbol,
                price: decimal(price, 2),
                volume: decimal(volume, 0),
                instrument_class: draw_class(&mut rng),
            });
        }

        Self {
            seed,
            universe,
            profiles,
        }
    }

    fn history_for(&self, snapshot: &InstrumentSnapshot, profile: Profile, bars: usize) -> Vec<Bar> {
        let count = match profile.listed_bars {
            None => return Vec::new(),
            Some(listed) => bars.min(listed),
        };
        let mut rng = StdRng::seed_from_u64(symbol_seed(self.seed, &snapshot.symbol));
        let vol = profile.daily_vol;
        let final_volume = to_f64(snapshot.volume);
        let spike = if profile.breakout { rng.gen_range(3.0..8.0) } else { 1.0 };
        let base_volume = final_volume / spike;

        // Relative path first, then scaled so the last close equals the snapshot price
        let mut rel = Vec::with_capacity(count);
        let mut close = 1.0_f64;
        for i in 0..count {
            let last = i + 1 == count;
            let ret = if last && profile.breakout {
                rng.gen_range(0.06..0.20)
            } else {
                (rng.gen::<f64>() - 0.5) * 2.0 * vol
            };
            let open = close;
            close = (open * (1.0 + ret)).max(0.01);
            let (upper_wick, lower_wick) = if last && profile.breakout {
                (rng.gen_range(0.0..0.01), rng.gen_range(0.0..vol / 2.0))
            } else {
                (rng.gen_range(0.0..vol / 2.0), rng.gen_range(0.0..vol / 2.0))
            };
            let high = open.max(close) * (1.0 + upper_wick);
            let low = open.min(close) * (1.0 - lower_wick);
            let volume = if last {
                final_volume
            } else {
                base_volume * rng.gen_range(0.7..1.3)
            };
            rel.push((open, high, low, close, volume));
        }

        let scale = to_f64(snapshot.price) / close;
        let first_day = BASE_OPEN_TIME + (bars.saturating_sub(count)) as i64 * DAY_MS;
        rel.into_iter()
            .enumerate()
            .map(|(i, (open, high, low, close, volume))| Bar {
                open_time: first_day + i as i64 * DAY_MS,
                open: decimal(open * scale, 4),
                high: decimal(high * scale, 4),
                low: decimal(low * scale, 4),
                close: decimal(close * scale, 4),
                volume: decimal(volume, 0),
            })
            .collect()
    }
}

#[async_trait]
impl UniverseProvider for SyntheticMarket {
    async fn fetch_universe(&self) -> Result<Vec<UniverseRow>> {
        Ok(self.universe.iter().cloned().map(UniverseRow::from).collect())
    }

    async fn fetch_history(&self, symbols: &[String], bars: usize) -> Result<HashMap<String, Vec<Bar>>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for snapshot in self.universe.iter().filter(|s| symbols.contains(&s.symbol)) {
            let Some(profile) = self.profiles.get(&snapshot.symbol) else {
                continue;
            };
            let history = self.history_for(snapshot, *profile, bars);
            if !history.is_empty() {
                out.insert(snapshot.symbol.clone(), history);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ShortInterestProvider for SyntheticMarket {
    async fn fetch_short_interest(&self, symbols: &[String]) -> Result<HashMap<String, ShortInterestData>> {
        let mut out = HashMap::new();
        for symbol in symbols {
            let mut rng = StdRng::seed_from_u64(symbol_seed(self.seed.rotate_left(17), symbol));
            // Roughly 40% of symbols have no coverage at all
            if rng.gen_bool(0.4) {
                continue;
            }
            out.insert(
                symbol.clone(),
                ShortInterestData {
                    short_interest_pct: rng.gen_bool(0.9).then(|| rng.gen_range(1.0..45.0)),
                    float_shares: rng.gen_bool(0.8).then(|| rng.gen_range(2.0e6..400.0e6)),
                    borrow_rate_pct: rng.gen_bool(0.5).then(|| rng.gen_range(0.5..80.0)),
                },
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_market() {
        let a = SyntheticMarket::new(7, 50);
        let b = SyntheticMarket::new(7, 50);
        assert_eq!(a.fetch_universe().await.unwrap(), b.fetch_universe().await.unwrap());

        let symbols: Vec<String> = a.universe.iter().map(|s| s.symbol.clone()).collect();
        assert_eq!(
            a.fetch_history(&symbols, 30).await.unwrap(),
            b.fetch_history(&symbols, 30).await.unwrap()
        );
        assert_eq!(
            a.fetch_short_interest(&symbols).await.unwrap(),
            b.fetch_short_interest(&symbols).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_history_ends_at_snapshot_price() {
        let market = SyntheticMarket::new(42, 40);
        let symbols: Vec<String> = market.universe.iter().map(|s| s.symbol.clone()).collect();
        let history = market.fetch_history(&symbols, 30).await.unwrap();
        assert!(!history.is_empty());

        for snapshot in &market.universe {
            if let Some(bars) = history.get(&snapshot.symbol) {
                assert!(bars.len() <= 30);
                let last = bars.last().unwrap();
                assert!((to_f64(last.close) - to_f64(snapshot.price)).abs() < 0.01);
                assert!(bars.windows(2).all(|w| w[0].open_time < w[1].open_time));
            }
        }
    }

    #[test]
    fn test_symbol_seed_is_stable() {
        assert_eq!(symbol_seed(1, "ABC"), symbol_seed(1, "ABC"));
        assert_ne!(symbol_seed(1, "ABC"), symbol_seed(2, "ABC"));
    }
}
