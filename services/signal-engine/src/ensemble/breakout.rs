//! Breakout voter
//!
//! Fires when the close escapes the prior range, with volume expansion as the
//! confirmation that the move is real.

use super::{Direction, Opinion, Voter};
use crate::frame::{to_f64, FrameSet};
use crate::regime::Regime;

pub struct BreakoutVoter {
    pub lookback: usize,
    /// Volume ratio needed for confirmation
    pub volume_threshold: f64,
}

impl Default for BreakoutVoter {
    fn default() -> Self {
        Self {
            lookback: 20,
            volume_threshold: 1.5,
        }
    }
}

impl Voter for BreakoutVoter {
    fn id(&self) -> &str {
        "breakout"
    }

    fn affinity(&self) -> Regime {
        Regime::Volatile
    }

    fn regime_weight(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Volatile => 1.4,
            Regime::TrendingUp | Regime::TrendingDown => 1.1,
            Regime::Ranging => 0.5,
        }
    }

    fn evaluate(&self, frames: &FrameSet) -> Opinion {
        let frame = &frames.short;
        if frame.len() < self.lookback + 1 {
            return Opinion::hold(self.id());
        }

        let prior_high = frame.high_over(self.lookback, 1);
        let prior_low = frame.low_over(self.lookback, 1);
        let range = prior_high - prior_low;
        if range <= 0.0 {
            return Opinion::hold(self.id());
        }

        let close = to_f64(frame.last().close);
        let mut tags = Vec::new();

        let (direction, strength) = if close > prior_high {
            tags.push("breakout_up".to_string());
            (Direction::Buy, (close - prior_high) / range)
        } else if close < prior_low {
            tags.push("breakdown".to_string());
            (Direction::Sell, (prior_low - close) / range)
        } else {
            return Opinion::hold(self.id());
        };

        let mut confidence = strength.min(0.5) * 2.0;

        if frame.last_row().volume_ratio >= self.volume_threshold {
            tags.push("volume_confirmed".to_string());
            confidence *= 1.15;
        }

        Opinion::new(self.id(), direction, confidence.min(1.0), tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{to_decimal, Candle, FeatureFrame};
    use chrono::{Duration, TimeZone, Utc};

    fn breakout_frames(last_close: f64, last_volume: f64) -> FrameSet {
        let mut data: Vec<(f64, f64)> = (0..30)
            .map(|i| (if i % 2 == 0 { 98.0 } else { 102.0 }, 100.0))
            .collect();
        data.push((last_close, last_volume));

        let candles: Vec<Candle> = data
            .iter()
            .enumerate()
            .map(|(i, (close, volume))| {
                let ts =
                    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
                Candle {
                    timestamp: ts,
                    open: to_decimal(*close),
                    high: to_decimal(close + 0.5),
                    low: to_decimal(close - 0.5),
                    close: to_decimal(*close),
                    volume: to_decimal(*volume),
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
    fn upside_break_with_volume_votes_buy() {
        let opinion = BreakoutVoter::default().evaluate(&breakout_frames(105.0, 300.0));
        assert_eq!(opinion.direction, Direction::Buy);
        assert!(opinion.tags.iter().any(|t| t == "volume_confirmed"));
        assert!(opinion.confidence > 0.5);
    }

    #[test]
    fn downside_break_votes_sell() {
        let opinion = BreakoutVoter::default().evaluate(&breakout_frames(95.0, 100.0));
        assert_eq!(opinion.direction, Direction::Sell);
        assert!(!opinion.tags.iter().any(|t| t == "volume_confirmed"));
    }

    #[test]
    fn inside_range_holds() {
        let opinion = BreakoutVoter::default().evaluate(&breakout_frames(100.0, 100.0));
        assert_eq!(opinion.direction, Direction::Hold);
    }
}
