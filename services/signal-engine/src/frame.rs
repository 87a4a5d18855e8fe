//! Candle data and per-candle derived indicators
//!
//! A `FeatureFrame` is the immutable input snapshot for one decision cycle on
//! one timeframe: time-ordered candles plus the indicator columns every
//! downstream component reads (RSI, MACD, EMA set, Bollinger bands, ATR,
//! volume averages, VWAP). Indicators are computed once at construction so a
//! frame can be shared freely between the classifier, the voters and the
//! sizing gate.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Price candle data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Derived indicator values for a single candle
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorRow {
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub ema_9: f64,
    pub ema_20: f64,
    pub ema_50: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    /// Band width relative to the middle band
    pub bb_width: f64,
    pub atr: f64,
    pub volume_ma: f64,
    /// Current volume over its 20-period average, floored at 0.1
    pub volume_ratio: f64,
    pub vwap: f64,
}

/// Immutable, time-ordered candle snapshot for one timeframe
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    candles: Vec<Candle>,
    rows: Vec<IndicatorRow>,
}

impl FeatureFrame {
    /// Build a frame from time-ordered candles, computing all indicator
    /// columns. Returns an error only for genuinely malformed input.
    pub fn new(candles: Vec<Candle>) -> Result<Self, EngineError> {
        if candles.is_empty() {
            return Err(EngineError::MalformedFrame(
                "empty candle sequence".to_string(),
            ));
        }

        for pair in candles.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(EngineError::MalformedFrame(format!(
                    "candles out of order at {}",
                    pair[1].timestamp
                )));
            }
        }

        for candle in &candles {
            if candle.low <= Decimal::ZERO
                || candle.high < candle.low
                || candle.close <= Decimal::ZERO
            {
                return Err(EngineError::MalformedFrame(format!(
                    "invalid candle at {}",
                    candle.timestamp
                )));
            }
        }

        let rows = compute_indicators(&candles);
        Ok(Self { candles, rows })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Latest candle (frames are never empty)
    pub fn last(&self) -> &Candle {
        self.candles.last().unwrap()
    }

    pub fn row(&self, idx: usize) -> &IndicatorRow {
        &self.rows[idx]
    }

    pub fn last_row(&self) -> &IndicatorRow {
        self.rows.last().unwrap()
    }

    pub fn close_f64(&self, idx: usize) -> f64 {
        to_f64(self.candles[idx].close)
    }

    /// Percent price change over the trailing `period` candles
    pub fn momentum(&self, period: usize) -> f64 {
        let n = self.candles.len();
        if n < period + 1 {
            return 0.0;
        }
        let now = to_f64(self.candles[n - 1].close);
        let then = to_f64(self.candles[n - 1 - period].close);
        if then == 0.0 {
            0.0
        } else {
            (now - then) / then
        }
    }

    /// Highest high over the last `period` candles, skipping the most recent
    /// `skip` candles (skip = 1 excludes the live candle from its own level)
    pub fn high_over(&self, period: usize, skip: usize) -> f64 {
        let n = self.candles.len();
        let end = n.saturating_sub(skip);
        let start = end.saturating_sub(period);
        self.candles[start..end]
            .iter()
            .map(|c| to_f64(c.high))
            .fold(0.0, f64::max)
    }

    /// Lowest low over the last `period` candles, skipping the most recent
    /// `skip` candles
    pub fn low_over(&self, period: usize, skip: usize) -> f64 {
        let n = self.candles.len();
        let end = n.saturating_sub(skip);
        let start = end.saturating_sub(period);
        self.candles[start..end]
            .iter()
            .map(|c| to_f64(c.low))
            .fold(f64::MAX, f64::min)
    }
}

/// Frames for the three analysis horizons the pipeline works over
#[derive(Debug, Clone)]
pub struct FrameSet {
    /// Signal timeframe (intraday)
    pub short: FeatureFrame,
    /// Swing context
    pub medium: FeatureFrame,
    /// Trend context
    pub long: FeatureFrame,
}

pub(crate) fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub(crate) fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

fn compute_indicators(candles: &[Candle]) -> Vec<IndicatorRow> {
    let n = candles.len();
    let closes: Vec<f64> = candles.iter().map(|c| to_f64(c.close)).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| to_f64(c.volume)).collect();

    let ema_9 = ema_series(&closes, 9);
    let ema_12 = ema_series(&closes, 12);
    let ema_20 = ema_series(&closes, 20);
    let ema_26 = ema_series(&closes, 26);
    let ema_50 = ema_series(&closes, 50);

    let macd: Vec<f64> = ema_12
        .iter()
        .zip(ema_26.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();
    let macd_signal = ema_series(&macd, 9);

    let bb_middle = rolling_mean(&closes, 20);
    let bb_std = rolling_std(&closes, 20);

    let rsi = rsi_series(&closes, 14);
    let atr = atr_series(candles, 14);
    let volume_ma = rolling_mean(&volumes, 20);

    // VWAP over the full snapshot
    let mut cum_volume = 0.0;
    let mut cum_price_volume = 0.0;

    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        cum_volume += volumes[i];
        cum_price_volume += closes[i] * volumes[i];
        let vwap = if cum_volume > 0.0 {
            cum_price_volume / cum_volume
        } else {
            closes[i]
        };

        let upper = bb_middle[i] + 2.0 * bb_std[i];
        let lower = bb_middle[i] - 2.0 * bb_std[i];
        let width = if bb_middle[i] > 0.0 {
            (upper - lower) / bb_middle[i]
        } else {
            0.0
        };

        let ratio = if volume_ma[i] > 0.0 {
            (volumes[i] / volume_ma[i]).max(0.1)
        } else {
            1.0
        };

        rows.push(IndicatorRow {
            rsi: rsi[i],
            macd: macd[i],
            macd_signal: macd_signal[i],
            ema_9: ema_9[i],
            ema_20: ema_20[i],
            ema_50: ema_50[i],
            bb_upper: upper,
            bb_middle: bb_middle[i],
            bb_lower: lower,
            bb_width: width,
            atr: atr[i],
            volume_ma: volume_ma[i],
            volume_ratio: ratio,
            vwap,
        });
    }

    rows
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut ema = values[0];
    out.push(ema);
    for value in values.iter().skip(1) {
        ema = (value - ema) * k + ema;
        out.push(ema);
    }
    out
}

/// Trailing mean over up to `period` values (shorter during warmup)
fn rolling_mean(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(period);
        let window = &values[start..=i];
        out.push(window.iter().sum::<f64>() / window.len() as f64);
    }
    out
}

fn rolling_std(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(period);
        let window = &values[start..=i];
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let variance = window
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / window.len() as f64;
        out.push(variance.sqrt());
    }
    out
}

/// Rolling-average gain/loss RSI; neutral 50 during warmup
fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![50.0; closes.len()];
    for i in period..closes.len() {
        let mut gains = 0.0;
        let mut losses = 0.0;
        for j in (i + 1 - period)..=i {
            let change = closes[j] - closes[j - 1];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        out[i] = if losses == 0.0 {
            100.0
        } else {
            let rs = gains / losses;
            100.0 - 100.0 / (1.0 + rs)
        };
    }
    out
}

fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let mut true_ranges = Vec::with_capacity(candles.len());
    for i in 0..candles.len() {
        let high = to_f64(candles[i].high);
        let low = to_f64(candles[i].low);
        let tr = if i == 0 {
            high - low
        } else {
            let prev_close = to_f64(candles[i - 1].close);
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        };
        true_ranges.push(tr);
    }
    rolling_mean(&true_ranges, period)
}
