//! Composite volume scoring
//!
//! Blends five independent reads of volume conditions into one score in
//! [0, 1] that drives the position-size multiplier: relative volume, price
//! proximity to VWAP (a stand-in for the volume-profile point of control),
//! liquidity tier from average USD turnover, short-term volume trend, and a
//! crude institutional-flow proxy built from simultaneous volume spikes and
//! price moves.

use serde::{Deserialize, Serialize};

use crate::frame::{to_f64, FeatureFrame};

/// Liquidity bucket from average USD turnover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidityTier {
    VeryLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeTrend {
    Accumulation,
    Distribution,
    Neutral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub relative_weight: f64,
    pub profile_weight: f64,
    pub liquidity_weight: f64,
    pub trend_weight: f64,
    pub flow_weight: f64,

    /// USD turnover floors for the liquidity tiers
    pub high_liquidity_usd: f64,
    pub medium_liquidity_usd: f64,
    pub low_liquidity_usd: f64,

    /// Price within this fraction of VWAP counts as at the point of control
    pub poc_proximity: f64,
    /// Recent/older volume ratio marking accumulation
    pub accumulation_ratio: f64,
    /// ... and distribution
    pub distribution_ratio: f64,
    /// Volume ratio that counts as an institutional-size spike
    pub flow_spike_ratio: f64,
    /// Price move that must accompany a spike
    pub flow_price_move: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            relative_weight: 0.30,
            profile_weight: 0.25,
            liquidity_weight: 0.20,
            trend_weight: 0.15,
            flow_weight: 0.10,
            high_liquidity_usd: 50_000_000.0,
            medium_liquidity_usd: 10_000_000.0,
            low_liquidity_usd: 1_000_000.0,
            poc_proximity: 0.02,
            accumulation_ratio: 1.2,
            distribution_ratio: 0.8,
            flow_spike_ratio: 2.0,
            flow_price_move: 0.01,
        }
    }
}

/// Result of one volume pass over a frame
#[derive(Debug, Clone)]
pub struct VolumeAnalysis {
    pub composite_score: f64,
    pub relative_score: f64,
    pub profile_score: f64,
    pub liquidity_score: f64,
    pub trend_score: f64,
    pub flow_score: f64,
    /// Price-to-VWAP closeness component on its own
    pub profile_strength: f64,
    pub volume_ratio: f64,
    pub avg_volume_usd: f64,
    pub tier: LiquidityTier,
    pub trend: VolumeTrend,
    /// Count of spike-plus-move candles in the flow window
    pub institutional_signals: usize,
}

pub struct VolumeAnalyzer {
    config: VolumeConfig,
}

impl VolumeAnalyzer {
    pub fn new(config: VolumeConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, frame: &FeatureFrame) -> VolumeAnalysis {
        let (relative_score, volume_ratio) = self.relative_volume(frame);
        let (profile_score, profile_strength) = self.volume_profile(frame);
        let (liquidity_score, tier, avg_volume_usd) = self.liquidity(frame);
        let (trend_score, trend) = self.volume_trend(frame);
        let (flow_score, institutional_signals) = self.institutional_flows(frame);

        let weighted = relative_score * self.config.relative_weight
            + profile_score * self.config.profile_weight
            + liquidity_score * self.config.liquidity_weight
            + trend_score * self.config.trend_weight
            + flow_score * self.config.flow_weight;
        let total_weight = self.config.relative_weight
            + self.config.profile_weight
            + self.config.liquidity_weight
            + self.config.trend_weight
            + self.config.flow_weight;

        VolumeAnalysis {
            composite_score: if total_weight > 0.0 {
                weighted / total_weight
            } else {
                0.5
            },
            relative_score,
            profile_score,
            liquidity_score,
            trend_score,
            flow_score,
            profile_strength,
            volume_ratio,
            avg_volume_usd,
            tier,
            trend,
            institutional_signals,
        }
    }

    fn relative_volume(&self, frame: &FeatureFrame) -> (f64, f64) {
        let ratio = frame.last_row().volume_ratio;
        let score = if ratio >= 2.0 {
            0.9
        } else if ratio >= 1.5 {
            0.7
        } else if ratio >= 0.8 {
            0.5
        } else if ratio >= 0.5 {
            0.3
        } else {
            0.1
        };
        (score, ratio)
    }

    fn volume_profile(&self, frame: &FeatureFrame) -> (f64, f64) {
        let row = frame.last_row();
        let close = to_f64(frame.last().close);
        if close <= 0.0 || row.vwap <= 0.0 {
            return (0.5, 0.5);
        }

        let distance = (close - row.vwap).abs() / close;
        let strength = if distance <= self.config.poc_proximity {
            0.8
        } else if distance <= self.config.poc_proximity * 2.0 {
            0.6
        } else {
            0.3
        };

        // Volume concentration over the profile window
        let n = frame.len();
        let start = n.saturating_sub(50);
        let volumes: Vec<f64> = (start..n)
            .map(|i| to_f64(frame.candles()[i].volume))
            .collect();
        let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
        let concentration = if mean > 0.0 {
            let variance =
                volumes.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / volumes.len() as f64;
            (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ((strength + concentration) / 2.0, strength)
    }

    fn liquidity(&self, frame: &FeatureFrame) -> (f64, LiquidityTier, f64) {
        let n = frame.len();
        let start = n.saturating_sub(20);
        let count = (n - start) as f64;
        let avg_price: f64 = (start..n).map(|i| frame.close_f64(i)).sum::<f64>() / count;
        let avg_volume: f64 = (start..n)
            .map(|i| to_f64(frame.candles()[i].volume))
            .sum::<f64>()
            / count;
        let avg_volume_usd = avg_price * avg_volume;

        let (tier, score) = if avg_volume_usd >= self.config.high_liquidity_usd {
            (LiquidityTier::High, 0.9)
        } else if avg_volume_usd >= self.config.medium_liquidity_usd {
            (LiquidityTier::Medium, 0.6)
        } else if avg_volume_usd >= self.config.low_liquidity_usd {
            (LiquidityTier::Low, 0.3)
        } else {
            (LiquidityTier::VeryLow, 0.1)
        };

        (score, tier, avg_volume_usd)
    }

    fn volume_trend(&self, frame: &FeatureFrame) -> (f64, VolumeTrend) {
        let n = frame.len();
        if n < 10 {
            return (0.5, VolumeTrend::Neutral);
        }
        let volumes: Vec<f64> = (n - 10..n)
            .map(|i| to_f64(frame.candles()[i].volume))
            .collect();
        let older: f64 = volumes[..5].iter().sum::<f64>() / 5.0;
        let recent: f64 = volumes[5..].iter().sum::<f64>() / 5.0;
        let ratio = if older > 0.0 { recent / older } else { 1.0 };

        let (trend, base_score) = if ratio >= self.config.accumulation_ratio {
            (VolumeTrend::Accumulation, 0.8)
        } else if ratio <= self.config.distribution_ratio {
            (VolumeTrend::Distribution, 0.3)
        } else {
            (VolumeTrend::Neutral, 0.5)
        };

        let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
        let consistency = if mean > 0.0 {
            let variance =
                volumes.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / volumes.len() as f64;
            (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
        } else {
            0.0
        };

        (base_score * (0.7 + 0.3 * consistency), trend)
    }

    fn institutional_flows(&self, frame: &FeatureFrame) -> (f64, usize) {
        let n = frame.len();
        let start = n.saturating_sub(24).max(1);
        let mut signals = 0;
        for i in start..n {
            let spike = frame.row(i).volume_ratio >= self.config.flow_spike_ratio;
            let prev_close = frame.close_f64(i - 1);
            let price_move = if prev_close > 0.0 {
                (frame.close_f64(i) - prev_close).abs() / prev_close
            } else {
                0.0
            };
            if spike && price_move >= self.config.flow_price_move {
                signals += 1;
            }
        }

        let score = if signals >= 3 {
            0.8
        } else if signals >= 1 {
            0.6
        } else {
            0.4
        };
        (score, signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{to_decimal, Candle, FeatureFrame};
    use chrono::{Duration, TimeZone, Utc};

    fn frame(closes_volumes: &[(f64, f64)]) -> FeatureFrame {
        let candles: Vec<Candle> = closes_volumes
            .iter()
            .enumerate()
            .map(|(i, (close, volume))| {
                let ts =
                    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
                Candle {
                    timestamp: ts,
                    open: to_decimal(*close),
                    high: to_decimal(close * 1.005),
                    low: to_decimal(close * 0.995),
                    close: to_decimal(*close),
                    volume: to_decimal(*volume),
                }
            })
            .collect();
        FeatureFrame::new(candles).unwrap()
    }

    #[test]
    fn high_turnover_lands_in_high_tier() {
        // 50k coins at 2000 USD = 100M turnover
        let data: Vec<(f64, f64)> = (0..60).map(|_| (2000.0, 50_000.0)).collect();
        let analysis = VolumeAnalyzer::new(VolumeConfig::default()).analyze(&frame(&data));
        assert_eq!(analysis.tier, LiquidityTier::High);
        assert!(analysis.liquidity_score > 0.8);
    }

    #[test]
    fn thin_market_lands_in_very_low_tier() {
        let data: Vec<(f64, f64)> = (0..60).map(|_| (2.0, 1_000.0)).collect();
        let analysis = VolumeAnalyzer::new(VolumeConfig::default()).analyze(&frame(&data));
        assert_eq!(analysis.tier, LiquidityTier::VeryLow);
    }

    #[test]
    fn rising_volume_reads_as_accumulation() {
        let mut data: Vec<(f64, f64)> = (0..55).map(|_| (100.0, 1_000.0)).collect();
        for i in 0..5 {
            data.push((100.0, 2_000.0 + i as f64 * 100.0));
        }
        let analysis = VolumeAnalyzer::new(VolumeConfig::default()).analyze(&frame(&data));
        assert_eq!(analysis.trend, VolumeTrend::Accumulation);
    }

    #[test]
    fn spike_with_price_move_counts_as_flow_signal() {
        let mut data: Vec<(f64, f64)> = (0..59).map(|_| (100.0, 1_000.0)).collect();
        // 4x volume with a 3% jump
        data.push((103.0, 4_000.0));
        let analysis = VolumeAnalyzer::new(VolumeConfig::default()).analyze(&frame(&data));
        assert!(analysis.institutional_signals >= 1);
        assert!(analysis.flow_score >= 0.6);
    }

    #[test]
    fn composite_stays_in_unit_interval() {
        let data: Vec<(f64, f64)> = (0..60)
            .map(|i| (100.0 + i as f64, 1_000.0 * (1.0 + (i % 7) as f64)))
            .collect();
        let analysis = VolumeAnalyzer::new(VolumeConfig::default()).analyze(&frame(&data));
        assert!(analysis.composite_score >= 0.0 && analysis.composite_score <= 1.0);
    }
}
