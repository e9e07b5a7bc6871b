//! Technical indicators computed from a symbol's daily history
//!
//! All values are derived from bars in ascending `open_time` order. The
//! rolling indicators come from the `ta` crate; the rest are simple ratios
//! over the same window.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ta::indicators::{
    AverageTrueRange, Maximum, Minimum, RateOfChange, SimpleMovingAverage, StandardDeviation,
};
use ta::{Close, DataItem, High, Low, Next};

use crate::config::EnrichmentConfig;
use crate::types::{to_f64, unit, Bar};

/// Indicators attached to every instrument that survives enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    /// Latest volume over the trailing average volume
    pub volume_spike: f64,
    /// Close-to-close change over the momentum period, in percent
    pub momentum_pct: f64,
    /// Where the latest close sits in the latest bar's range, 0 = low, 1 = high
    pub range_position: f64,
    /// Short ATR over long ATR
    pub volatility_expansion: f64,
    /// Standard deviation of daily returns, in percent
    pub volatility_pct: f64,
    /// Latest rolling (high - low) / close
    pub range_ratio: f64,
    /// Rank of the latest range ratio within the trailing window, 0 = tightest
    pub compression_percentile: f64,
    /// Downside-risk proxy in [0, 1]
    pub wolf_risk: f64,
}

impl TechnicalIndicators {
    fn values(&self) -> [f64; 8] {
        [
            self.volume_spike,
            self.momentum_pct,
            self.range_position,
            self.volatility_expansion,
            self.volatility_pct,
            self.range_ratio,
            self.compression_percentile,
            self.wolf_risk,
        ]
    }

    /// Every field is a real number (NaN or infinity cannot be published)
    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Bar as a `ta` data item. High/low are widened to cover open and close so
/// that slightly inconsistent vendor bars never fail validation.
fn data_item(bar: &Bar) -> Option<DataItem> {
    let open = to_f64(bar.open);
    let close = to_f64(bar.close);
    let high = to_f64(bar.high).max(open).max(close);
    let low = to_f64(bar.low).min(open).min(close);
    DataItem::builder()
        .open(open)
        .high(high)
        .low(low)
        .close(close)
        .volume(to_f64(bar.volume).max(0.0))
        .build()
        .ok()
}

fn last_of<I: Next<f64, Output = f64>>(mut indicator: I, values: &[f64]) -> f64 {
    values.iter().fold(0.0, |_, v| indicator.next(*v))
}

fn volume_spike(volumes: &[f64], window: usize) -> f64 {
    let n = volumes.len();
    let baseline = &volumes[n - 1 - window..n - 1];
    let avg = baseline.iter().sum::<f64>() / window as f64;
    if avg <= 0.0 {
        return 0.0;
    }
    volumes[n - 1] / avg
}

fn range_position(item: &DataItem) -> f64 {
    let range = item.high() - item.low();
    if range <= 0.0 {
        0.5
    } else {
        unit((item.close() - item.low()) / range)
    }
}

fn daily_returns_pct(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] * 100.0 } else { 0.0 })
        .collect()
}

/// Rolling (max high - min low) / close for every bar once the window is full
fn range_ratios(items: &[DataItem], window: usize) -> Option<Vec<f64>> {
    let mut max = Maximum::new(window).ok()?;
    let mut min = Minimum::new(window).ok()?;
    let mut ratios = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let hi = max.next(item);
        let lo = min.next(item);
        if i + 1 >= window {
            let close = item.close();
            ratios.push(if close > 0.0 { (hi - lo) / close } else { 0.0 });
        }
    }
    Some(ratios)
}

/// Fraction of the other trailing ratios strictly below the latest one
fn percentile_rank(ratios: &[f64]) -> f64 {
    let Some((latest, others)) = ratios.split_last() else {
        return 0.5;
    };
    if others.is_empty() {
        return 0.5;
    }
    let below = others.iter().filter(|r| **r < *latest).count();
    below as f64 / others.len() as f64
}

// ============================================================================
// Entry point
// ============================================================================

/// Compute indicators from ascending bars, or `None` if the history is too
/// short for any configured period, contains a non-positive close, or yields
/// a non-finite value.
pub fn compute_indicators(bars: &[Bar], config: &EnrichmentConfig) -> Option<TechnicalIndicators> {
    if bars.len() < config.required_bars() {
        return None;
    }
    if bars.iter().any(|b| b.close <= Decimal::ZERO) {
        return None;
    }

    let items: Vec<DataItem> = bars.iter().map(data_item).collect::<Option<_>>()?;
    let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| to_f64(b.volume).max(0.0)).collect();
    let latest = items.last()?;

    let momentum_pct = last_of(RateOfChange::new(config.momentum_days).ok()?, &closes);

    let mut atr_short = AverageTrueRange::new(config.atr_short_period).ok()?;
    let mut atr_long = AverageTrueRange::new(config.atr_long_period).ok()?;
    let (mut short, mut long) = (0.0, 0.0);
    for item in &items {
        short = atr_short.next(item);
        long = atr_long.next(item);
    }
    let volatility_expansion = if long > 0.0 { short / long } else { 1.0 };

    let returns = daily_returns_pct(&closes);
    let volatility_pct = last_of(StandardDeviation::new(config.volatility_period).ok()?, &returns);

    let ratios = range_ratios(&items, config.compression_window)?;
    let trailing = &ratios[ratios.len().saturating_sub(config.compression_lookback)..];
    let range_ratio = trailing.last().copied().unwrap_or(0.0);
    let compression_percentile = percentile_rank(trailing);

    let sma = last_of(SimpleMovingAverage::new(config.sma_period).ok()?, &closes);
    let wolf_risk = wolf_risk(latest, sma);

    let indicators = TechnicalIndicators {
        volume_spike: volume_spike(&volumes, config.volume_avg_window),
        momentum_pct,
        range_position: range_position(latest),
        volatility_expansion,
        volatility_pct,
        range_ratio,
        compression_percentile,
        wolf_risk,
    };
    indicators.is_finite().then_some(indicators)
}

/// Half upper-wick fade, half extension above the moving average
fn wolf_risk(latest: &DataItem, sma: f64) -> f64 {
    let range = latest.high() - latest.low();
    let fade = if range > 0.0 {
        (latest.high() - latest.close()) / range
    } else {
        0.0
    };
    let extension = if sma > 0.0 {
        ((latest.close() - sma) / sma).max(0.0).min(1.0)
    } else {
        0.0
    };
    unit(0.5 * fade + 0.5 * extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(i: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal, volume: Decimal) -> Bar {
        Bar {
            open_time: i * 86_400_000,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 29 quiet bars around $10 followed by one breakout bar
    fn breakout_history() -> Vec<Bar> {
        let mut bars: Vec<Bar> = (0..29)
            .map(|i| {
                let drift = Decimal::from(i % 3) / dec!(100);
                let close = dec!(10) + drift;
                bar(i, close, close + dec!(0.10), close - dec!(0.10), close, dec!(1000000))
            })
            .collect();
        bars.push(bar(29, dec!(10.0), dec!(11.6), dec!(9.9), dec!(11.5), dec!(5000000)));
        bars
    }

    #[test]
    fn test_too_short_history() {
        let config = EnrichmentConfig::default();
        let bars = breakout_history();
        assert!(compute_indicators(&bars[..config.required_bars() - 1], &config).is_none());
        assert!(compute_indicators(&bars[bars.len() - config.required_bars()..], &config).is_some());
    }

    #[test]
    fn test_breakout_indicators() {
        let ind = compute_indicators(&breakout_history(), &EnrichmentConfig::default()).unwrap();

        assert!((ind.volume_spike - 5.0).abs() < 1e-9);
        // 11.5 against a close around 10.0x three bars back
        assert!(ind.momentum_pct > 14.0 && ind.momentum_pct < 16.0);
        assert!(ind.range_position > 0.9);
        assert!(ind.volatility_expansion > 1.0);
        // Widest range of the lookback
        assert_eq!(ind.compression_percentile, 1.0);
        assert!(ind.wolf_risk >= 0.0 && ind.wolf_risk <= 1.0);
    }

    #[test]
    fn test_zero_close_is_invalid_history() {
        let config = EnrichmentConfig::default();
        let mut bars = breakout_history();
        // Momentum base bar; a zero here would divide by zero
        let base = bars.len() - 1 - config.momentum_days;
        bars[base].close = Decimal::ZERO;
        bars[base].low = Decimal::ZERO;
        assert!(compute_indicators(&bars, &config).is_none());
    }

    #[test]
    fn test_non_finite_indicators_detected() {
        let mut ind = compute_indicators(&breakout_history(), &EnrichmentConfig::default()).unwrap();
        assert!(ind.is_finite());
        ind.momentum_pct = f64::INFINITY;
        assert!(!ind.is_finite());
        ind.momentum_pct = f64::NAN;
        assert!(!ind.is_finite());
    }

    #[test]
    fn test_flat_bar_range_position() {
        let item = DataItem::builder()
            .open(5.0)
            .high(5.0)
            .low(5.0)
            .close(5.0)
            .volume(1.0)
            .build()
            .unwrap();
        assert_eq!(range_position(&item), 0.5);
    }

    #[test]
    fn test_percentile_rank() {
        assert_eq!(percentile_rank(&[0.3, 0.2, 0.1]), 0.0);
        assert_eq!(percentile_rank(&[0.1, 0.2, 0.3]), 1.0);
        assert_eq!(percentile_rank(&[0.1, 0.3, 0.2]), 0.5);
        assert_eq!(percentile_rank(&[0.4]), 0.5);
    }

    #[test]
    fn test_zero_baseline_volume() {
        assert_eq!(volume_spike(&[0.0, 0.0, 10.0], 2), 0.0);
    }

    #[test]
    fn test_inconsistent_bar_is_widened() {
        let b = bar(0, dec!(10), dec!(9), dec!(11), dec!(10.5), dec!(1));
        let item = data_item(&b).unwrap();
        assert!(item.high() >= 10.5);
        assert!(item.low() <= 10.0);
    }
}
