//! Support/resistance proximity voter
//!
//! Fades moves into the edges of the recent range: buys near support, sells
//! near resistance, stays out mid-range.

use super::{Direction, Opinion, Voter};
use crate::frame::{to_f64, FrameSet};
use crate::regime::Regime;

pub struct RangeLevelsVoter {
    pub lookback: usize,
    /// How close to a level counts as "at" the level, as a fraction of price
    pub proximity: f64,
}

impl Default for RangeLevelsVoter {
    fn default() -> Self {
        Self {
            lookback: 20,
            proximity: 0.015,
        }
    }
}

impl Voter for RangeLevelsVoter {
    fn id(&self) -> &str {
        "levels"
    }

    fn affinity(&self) -> Regime {
        Regime::Ranging
    }

    fn regime_weight(&self, regime: Regime) -> f64 {
        match regime {
            Regime::Ranging => 1.2,
            Regime::Volatile => 0.7,
            Regime::TrendingUp | Regime::TrendingDown => 0.5,
        }
    }

    fn evaluate(&self, frames: &FrameSet) -> Opinion {
        let frame = &frames.short;
        if frame.len() < self.lookback + 1 {
            return Opinion::hold(self.id());
        }

        // Levels from the window before the live candle
        let support = frame.low_over(self.lookback, 1);
        let resistance = frame.high_over(self.lookback, 1);
        let close = to_f64(frame.last().close);

        if resistance <= support || close <= 0.0 {
            return Opinion::hold(self.id());
        }

        let dist_support = (close - support) / close;
        let dist_resistance = (resistance - close) / close;

        if dist_support >= 0.0 && dist_support <= self.proximity {
            let confidence = (self.proximity - dist_support) / self.proximity * 0.8;
            return Opinion::new(
                self.id(),
                Direction::Buy,
                confidence,
                vec!["near_support".to_string()],
            );
        }

        if dist_resistance >= 0.0 && dist_resistance <= self.proximity {
            let confidence = (self.proximity - dist_resistance) / self.proximity * 0.8;
            return Opinion::new(
                self.id(),
                Direction::Sell,
                confidence,
                vec!["near_resistance".to_string()],
            );
        }

        Opinion::hold(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{to_decimal, Candle, FeatureFrame};
    use chrono::{Duration, TimeZone, Utc};

    fn range_frames(last_close: f64) -> FrameSet {
        // 30 candles oscillating between ~95 and ~105, then one at last_close
        let mut closes: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 95.0 } else { 105.0 })
            .collect();
        closes.push(last_close);

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
    fn close_at_support_votes_buy() {
        let opinion = RangeLevelsVoter::default().evaluate(&range_frames(94.8));
        assert_eq!(opinion.direction, Direction::Buy);
        assert!(opinion.confidence > 0.0);
    }

    #[test]
    fn close_at_resistance_votes_sell() {
        let opinion = RangeLevelsVoter::default().evaluate(&range_frames(105.2));
        assert_eq!(opinion.direction, Direction::Sell);
        assert!(opinion.confidence > 0.0);
    }

    #[test]
    fn mid_range_holds() {
        let opinion = RangeLevelsVoter::default().evaluate(&range_frames(100.0));
        assert_eq!(opinion.direction, Direction::Hold);
    }
}
