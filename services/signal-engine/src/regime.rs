//! Market regime classification
//!
//! Accumulates evidence into four buckets (trending up/down, ranging,
//! volatile) from independent signals: volatility ratio, directional-movement
//! trend strength, EMA slope agreement across horizons, price structure, and
//! Bollinger bandwidth contraction. Pure scoring - identical frames always
//! yield the identical assessment, which backtest reproducibility depends on.

use serde::{Deserialize, Serialize};

use crate::frame::{to_f64, FeatureFrame, FrameSet};

/// Classified market behaviour mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
}

/// Accumulated evidence per regime bucket
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegimeScores {
    pub trending_up: f64,
    pub trending_down: f64,
    pub ranging: f64,
    pub volatile: f64,
}

impl RegimeScores {
    pub fn get(&self, regime: Regime) -> f64 {
        match regime {
            Regime::TrendingUp => self.trending_up,
            Regime::TrendingDown => self.trending_down,
            Regime::Ranging => self.ranging,
            Regime::Volatile => self.volatile,
        }
    }

    fn total(&self) -> f64 {
        self.trending_up + self.trending_down + self.ranging + self.volatile
    }

    fn max(&self) -> f64 {
        self.trending_up
            .max(self.trending_down)
            .max(self.ranging)
            .max(self.volatile)
    }
}

/// Output of one classification cycle; never persisted beyond the cycle
#[derive(Debug, Clone)]
pub struct RegimeAssessment {
    pub regime: Regime,
    /// Winning score over the sum of all scores
    pub confidence: f64,
    pub scores: RegimeScores,
    /// Directional-movement trend strength, 0-100
    pub trend_strength: f64,
    /// Current ATR over its rolling average
    pub atr_ratio: f64,
}

/// Thresholds for the scoring signals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub atr_ratio_high: f64,
    pub atr_ratio_low: f64,
    pub trend_strength_strong: f64,
    pub trend_strength_weak: f64,
    /// Bandwidth below this fraction of its rolling mean counts as contraction
    pub bandwidth_contraction: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            atr_ratio_high: 1.5,
            atr_ratio_low: 0.7,
            trend_strength_strong: 40.0,
            trend_strength_weak: 20.0,
            bandwidth_contraction: 0.8,
        }
    }
}

/// Classifies the market regime from multi-horizon frames
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, frames: &FrameSet) -> RegimeAssessment {
        let mut scores = RegimeScores::default();

        // 1. EMA slope agreement on the long horizon
        self.score_ema_alignment(&frames.long, &mut scores);

        // 2. Volatility ratio on the medium horizon
        let atr_ratio = atr_ratio(&frames.medium, 50);
        if atr_ratio > self.config.atr_ratio_high {
            scores.volatile += 2.0;
        } else if atr_ratio < self.config.atr_ratio_low {
            scores.ranging += 2.0;
        }

        // 3. Directional-movement trend strength on the medium horizon
        let strength = trend_strength(&frames.medium, 14);
        if strength > self.config.trend_strength_strong {
            let n = frames.medium.len();
            if n > 20 && frames.medium.close_f64(n - 1) > frames.medium.close_f64(n - 21) {
                scores.trending_up += 2.0;
            } else {
                scores.trending_down += 2.0;
            }
        } else if strength < self.config.trend_strength_weak {
            scores.ranging += 3.0;
        }

        // 4. Price structure on the medium horizon
        self.score_structure(&frames.medium, &mut scores);

        // 5. Bollinger bandwidth contraction on the medium horizon
        self.score_bandwidth(&frames.medium, &mut scores);

        let max_score = scores.max();
        let total = scores.total();

        // Ranging wins any tie for the top bucket - the conservative default
        let regime = if scores.ranging >= max_score {
            Regime::Ranging
        } else if scores.trending_up >= max_score {
            Regime::TrendingUp
        } else if scores.trending_down >= max_score {
            Regime::TrendingDown
        } else {
            Regime::Volatile
        };

        let confidence = if total > 0.0 { max_score / total } else { 0.0 };

        RegimeAssessment {
            regime,
            confidence,
            scores,
            trend_strength: strength,
            atr_ratio,
        }
    }

    fn score_ema_alignment(&self, frame: &FeatureFrame, scores: &mut RegimeScores) {
        let n = frame.len();
        if n < 51 {
            return;
        }
        let last = frame.row(n - 1);
        let back = frame.row(n - 6);

        if last.ema_20 > last.ema_50 && last.ema_20 > back.ema_20 {
            scores.trending_up += 3.0;
        } else if last.ema_20 < last.ema_50 && last.ema_20 < back.ema_20 {
            scores.trending_down += 3.0;
        }
    }

    fn score_structure(&self, frame: &FeatureFrame, scores: &mut RegimeScores) {
        if frame.len() < 20 {
            scores.ranging += 1.0;
            return;
        }
        let recent_high = frame.high_over(10, 0);
        let prior_high = frame.high_over(10, 10);
        let recent_low = frame.low_over(10, 0);
        let prior_low = frame.low_over(10, 10);

        if recent_high > prior_high && recent_low > prior_low {
            scores.trending_up += 2.0;
        } else if recent_high < prior_high && recent_low < prior_low {
            scores.trending_down += 2.0;
        } else {
            scores.ranging += 1.0;
        }
    }

    fn score_bandwidth(&self, frame: &FeatureFrame, scores: &mut RegimeScores) {
        let n = frame.len();
        if n < 20 {
            return;
        }
        let start = n.saturating_sub(50);
        let mean_width: f64 = (start..n).map(|i| frame.row(i).bb_width).sum::<f64>()
            / (n - start) as f64;
        if mean_width > 0.0
            && frame.last_row().bb_width < mean_width * self.config.bandwidth_contraction
        {
            scores.ranging += 2.0;
        }
    }
}

/// Current ATR over its trailing `period` average
fn atr_ratio(frame: &FeatureFrame, period: usize) -> f64 {
    let n = frame.len();
    let start = n.saturating_sub(period);
    let mean_atr: f64 = (start..n).map(|i| frame.row(i).atr).sum::<f64>() / (n - start) as f64;
    if mean_atr > 0.0 {
        frame.last_row().atr / mean_atr
    } else {
        1.0
    }
}

/// Simplified directional-movement index over the trailing `period` candles,
/// 0-100. Neutral 25 when the frame is too short.
fn trend_strength(frame: &FeatureFrame, period: usize) -> f64 {
    let candles = frame.candles();
    if candles.len() < period + 1 {
        return 25.0;
    }

    let mut tr_sum = 0.0;
    let mut dm_plus_sum = 0.0;
    let mut dm_minus_sum = 0.0;

    for i in 1..=period {
        let current = &candles[candles.len() - i];
        let previous = &candles[candles.len() - i - 1];

        let high = to_f64(current.high);
        let low = to_f64(current.low);
        let prev_high = to_f64(previous.high);
        let prev_low = to_f64(previous.low);
        let prev_close = to_f64(previous.close);

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr_sum += tr;

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        if up_move > down_move && up_move > 0.0 {
            dm_plus_sum += up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            dm_minus_sum += down_move;
        }
    }

    if tr_sum == 0.0 {
        return 25.0;
    }

    let di_plus = dm_plus_sum / tr_sum * 100.0;
    let di_minus = dm_minus_sum / tr_sum * 100.0;
    if di_plus + di_minus == 0.0 {
        return 0.0;
    }
    (di_plus - di_minus).abs() / (di_plus + di_minus) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{to_decimal, Candle};
    use chrono::{Duration, TimeZone, Utc};

    fn candle(hours: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(hours);
        Candle {
            timestamp: ts,
            open: to_decimal(open),
            high: to_decimal(high),
            low: to_decimal(low),
            close: to_decimal(close),
            volume: to_decimal(100.0),
        }
    }

    fn trending_up_frame(len: usize) -> crate::frame::FeatureFrame {
        let candles: Vec<Candle> = (0..len)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                candle(i as i64, base, base + 1.5, base - 0.5, base + 1.0)
            })
            .collect();
        crate::frame::FeatureFrame::new(candles).unwrap()
    }

    fn flat_frame(len: usize) -> crate::frame::FeatureFrame {
        let candles: Vec<Candle> = (0..len)
            .map(|i| {
                // Tiny oscillation so highs/lows stay non-degenerate
                let wobble = if i % 2 == 0 { 0.2 } else { -0.2 };
                let base = 100.0 + wobble;
                candle(i as i64, base, base + 0.4, base - 0.4, base)
            })
            .collect();
        crate::frame::FeatureFrame::new(candles).unwrap()
    }

    fn frames(frame: crate::frame::FeatureFrame) -> FrameSet {
        FrameSet {
            short: frame.clone(),
            medium: frame.clone(),
            long: frame,
        }
    }

    #[test]
    fn steady_rally_classifies_trending_up() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let assessment = classifier.classify(&frames(trending_up_frame(80)));
        assert_eq!(assessment.regime, Regime::TrendingUp);
        assert!(assessment.confidence > 0.4);
        assert!(assessment.scores.trending_up > assessment.scores.trending_down);
    }

    #[test]
    fn flat_market_classifies_ranging() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let assessment = classifier.classify(&frames(flat_frame(80)));
        assert_eq!(assessment.regime, Regime::Ranging);
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let a = classifier.classify(&frames(trending_up_frame(80)));
        let b = classifier.classify(&frames(trending_up_frame(80)));
        assert_eq!(a.regime, b.regime);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn tie_prefers_ranging() {
        // Equal evidence in every bucket must come out Ranging
        let scores = RegimeScores {
            trending_up: 2.0,
            trending_down: 2.0,
            ranging: 2.0,
            volatile: 2.0,
        };
        assert_eq!(scores.max(), 2.0);
        // The selection rule checks ranging first with >=
        let regime = if scores.ranging >= scores.max() {
            Regime::Ranging
        } else {
            Regime::Volatile
        };
        assert_eq!(regime, Regime::Ranging);
    }

    #[test]
    fn confidence_is_winning_share() {
        let classifier = RegimeClassifier::new(RegimeConfig::default());
        let assessment = classifier.classify(&frames(trending_up_frame(80)));
        let expected = assessment.scores.get(assessment.regime) / {
            assessment.scores.trending_up
                + assessment.scores.trending_down
                + assessment.scores.ranging
                + assessment.scores.volatile
        };
        assert!((assessment.confidence - expected).abs() < 1e-12);
    }
}
