//! Oscillator-extremes voter
//!
//! Mean-reversion heuristic: RSI stretched past its bands, with a Bollinger
//! touch adding conviction. Strongest in ranging markets.

use super::{Direction, Opinion, Voter};
use crate::frame::{to_f64, FrameSet};
use crate::regime::Regime;

pub struct OscillatorVoter {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for OscillatorVoter {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

impl Voter for OscillatorVoter {
    fn id(&self) -> &str {
        "oscillator"
    }

    fn affinity(&self) -> Regime {
        Regime::Ranging
    }

    fn regime_weight(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Ranging => 1.3,
            Regime::Volatile => 0.8,
            Regime::TrendingUp | Regime::TrendingDown => 0.6,
        }
    }

    fn evaluate(&self, frames: &FrameSet) -> Opinion {
        let frame = &frames.short;
        if frame.len() < 20 {
            return Opinion::hold(self.id());
        }

        let row = frame.last_row();
        let close = to_f64(frame.last().close);
        let mut tags = Vec::new();

        let (direction, mut confidence) = if row.rsi < self.rsi_oversold {
            tags.push("rsi_oversold".to_string());
            (
                Direction::Buy,
                (self.rsi_oversold - row.rsi) / self.rsi_oversold,
            )
        } else if row.rsi > self.rsi_overbought {
            tags.push("rsi_overbought".to_string());
            (
                Direction::Sell,
                (row.rsi - self.rsi_overbought) / (100.0 - self.rsi_overbought),
            )
        } else {
            return Opinion::hold(self.id());
        };

        // Band touch in the same direction adds conviction
        if direction == Direction::Buy && close <= row.bb_lower {
            tags.push("bb_lower_touch".to_string());
            confidence = (confidence + 0.15).min(1.0);
        } else if direction == Direction::Sell && close >= row.bb_upper {
            tags.push("bb_upper_touch".to_string());
            confidence = (confidence + 0.15).min(1.0);
        }

        Opinion::new(self.id(), direction, confidence, tags)
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
    fn sustained_selloff_votes_buy() {
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64 * 2.0).collect();
        let opinion = OscillatorVoter::default().evaluate(&frame_from_closes(&closes));
        assert_eq!(opinion.direction, Direction::Buy);
        assert!(opinion.confidence > 0.5);
        assert!(opinion.tags.iter().any(|t| t == "rsi_oversold"));
    }

    #[test]
    fn sustained_rally_votes_sell() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 2.0).collect();
        let opinion = OscillatorVoter::default().evaluate(&frame_from_closes(&closes));
        assert_eq!(opinion.direction, Direction::Sell);
        assert!(opinion.confidence > 0.5);
    }

    #[test]
    fn neutral_rsi_holds() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let opinion = OscillatorVoter::default().evaluate(&frame_from_closes(&closes));
        assert_eq!(opinion.direction, Direction::Hold);
        assert_eq!(opinion.confidence, 0.0);
    }
}
