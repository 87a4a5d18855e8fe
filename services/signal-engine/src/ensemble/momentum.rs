//! MACD momentum voter
//!
//! Follows the MACD histogram: side of the signal line gives direction, a
//! growing histogram gives conviction. Magnitude is normalized by ATR so the
//! heuristic behaves the same across price scales.

use super::{Direction, Opinion, Voter};
use crate::frame::FrameSet;
use crate::regime::Regime;

#[derive(Default)]
pub struct MacdMomentumVoter;

impl Voter for MacdMomentumVoter {
    fn id(&self) -> &str {
        "momentum"
    }

    fn affinity(&self) -> Regime {
        Regime::TrendingUp
    }

    fn regime_weight(&self, regime: Regime) -> f64 {
        match regime {
            Regime::TrendingUp | Regime::TrendingDown => 1.2,
            Regime::Volatile => 1.0,
            Regime::Ranging => 0.7,
        }
    }

    fn evaluate(&self, frames: &FrameSet) -> Opinion {
        let frame = &frames.short;
        let n = frame.len();
        if n < 35 {
            return Opinion::hold(self.id());
        }

        let row = frame.last_row();
        let prev = frame.row(n - 2);
        let histogram = row.macd - row.macd_signal;
        let prev_histogram = prev.macd - prev.macd_signal;

        if row.atr <= 0.0 || histogram == 0.0 {
            return Opinion::hold(self.id());
        }

        let mut tags = Vec::new();
        let direction = if histogram > 0.0 {
            Direction::Buy
        } else {
            Direction::Sell
        };

        // Histogram size against volatility, capped at half an ATR
        let mut confidence = (histogram.abs() / row.atr).min(0.5) * 1.6;

        let accelerating = histogram.abs() > prev_histogram.abs();
        if accelerating {
            tags.push("momentum_accelerating".to_string());
            confidence *= 1.2;
        } else {
            tags.push("momentum_fading".to_string());
            confidence *= 0.8;
        }

        Opinion::new(self.id(), direction, confidence.min(1.0), tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{to_decimal, Candle, FeatureFrame};
    use chrono::{Duration, TimeZone, Utc};

    fn frame_from_closes(closes: &[f64]) -> FrameSet {
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let ts =
                    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
                Candle {
                    timestamp: ts,
                    open: to_decimal(*close),
                    high: to_decimal(close + 0.5),
                    low: to_decimal(close - 0.5),
                    close: to_decimal(*close),
                    volume: to_decimal(100.0),
                }
            })
            .collect();
        let frame = FeatureFrame::new(candles).unwrap();
        FrameSet {
            short: frame.clone(),
            medium: frame.clone(),
            long: frame,
        }
    }

    #[test]
    fn accelerating_rally_votes_buy() {
        // Quadratic rise keeps the histogram growing
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64).powi(2) * 0.05).collect();
        let opinion = MacdMomentumVoter.evaluate(&frame_from_closes(&closes));
        assert_eq!(opinion.direction, Direction::Buy);
        assert!(opinion.tags.iter().any(|t| t == "momentum_accelerating"));
    }

    #[test]
    fn selloff_votes_sell() {
        let closes: Vec<f64> = (0..60).map(|i| 300.0 - (i as f64).powi(2) * 0.05).collect();
        let opinion = MacdMomentumVoter.evaluate(&frame_from_closes(&closes));
        assert_eq!(opinion.direction, Direction::Sell);
    }

    #[test]
    fn short_frame_holds() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let opinion = MacdMomentumVoter.evaluate(&frame_from_closes(&closes));
        assert_eq!(opinion.direction, Direction::Hold);
    }
}
