//! Moving-average crossover voter
//!
//! Trend-following heuristic: EMA 9 against EMA 20 with the close on the
//! right side, MACD agreement adds conviction.

use super::{Direction, Opinion, Voter};
use crate::frame::{to_f64, FrameSet};
use crate::regime::Regime;

#[derive(Default)]
pub struct CrossoverVoter;

impl Voter for CrossoverVoter {
    fn id(&self) -> &str {
        "crossover"
    }

    fn affinity(&self) -> Regime {
        Regime::TrendingUp
    }

    fn regime_weight(&self, regime: Regime) -> f64 {
        match regime {
            Regime::TrendingUp | Regime::TrendingDown => 1.3,
            Regime::Volatile => 0.9,
            Regime::Ranging => 0.6,
        }
    }

    fn evaluate(&self, frames: &FrameSet) -> Opinion {
        let frame = &frames.short;
        if frame.len() < 30 {
            return Opinion::hold(self.id());
        }

        let row = frame.last_row();
        let close = to_f64(frame.last().close);
        if row.ema_20 <= 0.0 {
            return Opinion::hold(self.id());
        }

        // Confidence from the normalized fast/slow spread
        let spread = (row.ema_9 - row.ema_20).abs() / row.ema_20;
        let mut confidence = (spread.min(0.5)) * 2.0;
        let mut tags = Vec::new();

        let direction = if row.ema_9 > row.ema_20 && close > row.ema_20 {
            tags.push("ema_bullish".to_string());
            Direction::Buy
        } else if row.ema_9 < row.ema_20 && close < row.ema_20 {
            tags.push("ema_bearish".to_string());
            Direction::Sell
        } else {
            return Opinion::hold(self.id());
        };

        // MACD on the same side confirms the move
        let macd_agrees = match direction {
            Direction::Buy => row.macd > row.macd_signal,
            Direction::Sell => row.macd < row.macd_signal,
            Direction::Hold => false,
        };
        if macd_agrees {
            tags.push("macd_confirmed".to_string());
            confidence *= 1.15;
        }

        Opinion::new(self.id(), direction, confidence.min(1.0), tags)
    }
}
