//! Position sizing and risk gating
//!
//! Turns a validated signal plus account state into a risk-checked position
//! size. Sizing starts from a base fraction of capital and is scaled by the
//! composite volume score, the liquidity tier, and the signal's consensus
//! score, then bounded by a fractional-Kelly risk ceiling and by
//! correlation/concentration limits against the existing book.
//!
//! The verdict separates fatal problems (insufficient capital, degenerate
//! stop, risk over the hard cap) from advisory warnings (thin risk/reward,
//! reduced size); only the former block the trade.

pub mod volume;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consensus::ValidatedSignal;
use crate::frame::{to_decimal, to_f64, FeatureFrame};

pub use volume::{LiquidityTier, VolumeAnalysis, VolumeAnalyzer, VolumeConfig, VolumeTrend};

/// Coarse asset bucket used for correlation and concentration limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Major,
    Layer1,
    Defi,
    Meme,
    Other,
}

impl AssetCategory {
    /// Category from a symbol like "SOL-USD" or "BTCUSDT"
    pub fn for_symbol(symbol: &str) -> Self {
        let base = symbol
            .split(['-', '/'])
            .next()
            .unwrap_or(symbol)
            .trim_end_matches("USDT")
            .trim_end_matches("USDC")
            .to_ascii_uppercase();
        match base.as_str() {
            "BTC" | "ETH" => AssetCategory::Major,
            "SOL" | "AVAX" | "ADA" | "DOT" | "NEAR" | "ATOM" => AssetCategory::Layer1,
            "LINK" | "UNI" | "AAVE" | "MKR" => AssetCategory::Defi,
            "DOGE" | "SHIB" | "PEPE" => AssetCategory::Meme,
            _ => AssetCategory::Other,
        }
    }
}

/// Static pairwise correlation estimate between asset buckets
pub fn pairwise_correlation(a: AssetCategory, b: AssetCategory) -> f64 {
    use AssetCategory::*;
    match (a, b) {
        (Major, Major) => 0.85,
        (Layer1, Layer1) => 0.80,
        (Defi, Defi) => 0.75,
        (Meme, Meme) => 0.70,
        (Major, Layer1) | (Layer1, Major) => 0.65,
        (Major, Defi) | (Defi, Major) => 0.60,
        _ => 0.40,
    }
}

/// One existing position, as the gate needs to see it
#[derive(Debug, Clone)]
pub struct OpenExposure {
    pub symbol: String,
    pub category: AssetCategory,
    pub value: Decimal,
}

/// Account-level inputs to sizing
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub capital: Decimal,
    pub open_positions: Vec<OpenExposure>,
    /// Historical trade stats feeding the Kelly estimate
    pub win_rate: f64,
    /// Average winning return, as a fraction
    pub avg_win: f64,
    /// Average losing return, as a positive fraction
    pub avg_loss: f64,
}

impl AccountSnapshot {
    /// Flat account with neutral historical stats
    pub fn flat(capital: Decimal) -> Self {
        Self {
            capital,
            open_positions: Vec::new(),
            win_rate: 0.5,
            avg_win: 0.03,
            avg_loss: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    pub base_position_pct: f64,
    pub min_position_pct: f64,
    pub max_position_pct: f64,
    /// Hard cap on risk per trade as a fraction of capital
    pub max_risk_per_trade: f64,
    pub min_risk_reward: f64,
    /// Fraction of full Kelly used for the ceiling
    pub kelly_fraction: f64,
    pub correlation_threshold: f64,
    /// One category may hold at most this fraction of capital
    pub max_category_concentration: f64,
    pub volume: VolumeConfig,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_position_pct: 0.02,
            min_position_pct: 0.005,
            max_position_pct: 0.10,
            max_risk_per_trade: 0.02,
            min_risk_reward: 2.0,
            kelly_fraction: 0.25,
            correlation_threshold: 0.6,
            max_category_concentration: 0.5,
            volume: VolumeConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskMetrics {
    pub risk_pct: f64,
    pub risk_reward_ratio: f64,
    pub position_pct_of_capital: f64,
    pub kelly_fraction: f64,
    pub volume_score: f64,
    pub liquidity_tier: LiquidityTier,
}

/// Sizing verdict: a position size plus everything the caller should know
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    /// False only for fatal problems; warnings alone never block
    pub is_valid: bool,
    /// Fatal reasons, empty when valid
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub position_capital: Decimal,
    pub metrics: RiskMetrics,
}

/// Raw Kelly fraction from historical stats, clamped to [0, 1].
/// Returns 0 for degenerate inputs; the gate treats that as uninformative
/// and falls back to the plain risk budget.
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 || win_rate <= 0.0 || win_rate >= 1.0 {
        return 0.0;
    }
    let payoff = avg_win / avg_loss;
    if payoff <= 0.0 {
        return 0.0;
    }
    let kelly = (win_rate * payoff - (1.0 - win_rate)) / payoff;
    kelly.clamp(0.0, 1.0)
}

/// Sizes positions and enforces the risk limits
pub struct RiskGate {
    config: SizingConfig,
    analyzer: VolumeAnalyzer,
}

impl RiskGate {
    pub fn new(config: SizingConfig) -> Self {
        let analyzer = VolumeAnalyzer::new(config.volume.clone());
        Self { config, analyzer }
    }

    /// Size multiplier from the composite volume score. Non-decreasing in
    /// the score, which the sizing monotonicity property relies on.
    pub fn volume_multiplier(&self, score: f64) -> f64 {
        if score >= 0.8 {
            1.5
        } else if score >= 0.6 {
            1.2
        } else if score >= 0.4 {
            1.0
        } else if score >= 0.2 {
            0.7
        } else {
            0.4
        }
    }

    fn liquidity_adjustment(&self, tier: LiquidityTier) -> f64 {
        match tier {
            LiquidityTier::High => 1.2,
            LiquidityTier::Medium => 1.0,
            LiquidityTier::Low | LiquidityTier::VeryLow => 0.6,
        }
    }

    fn signal_multiplier(&self, consensus_score: f64) -> f64 {
        if consensus_score >= 0.8 {
            1.3
        } else if consensus_score >= 0.75 {
            1.1
        } else if consensus_score < 0.7 {
            0.8
        } else {
            1.0
        }
    }

    /// Full sizing and validation pass for one proposed entry
    pub fn assess(
        &self,
        signal: &ValidatedSignal,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        frame: &FeatureFrame,
        account: &AccountSnapshot,
    ) -> RiskAssessment {
        let mut warnings = Vec::new();
        let mut reasons = Vec::new();

        let capital = to_f64(account.capital);
        let entry = to_f64(entry_price);
        let stop_distance = if entry > 0.0 {
            (entry - to_f64(stop_loss)).abs() / entry
        } else {
            0.0
        };
        let profit_distance = if entry > 0.0 {
            (to_f64(take_profit) - entry).abs() / entry
        } else {
            0.0
        };

        let analysis = self.analyzer.analyze(frame);
        let kelly = kelly_fraction(account.win_rate, account.avg_win, account.avg_loss);

        if capital <= 0.0 {
            reasons.push("insufficient capital".to_string());
        }
        if stop_distance == 0.0 {
            reasons.push("degenerate stop distance (zero)".to_string());
        }
        if !reasons.is_empty() {
            return RiskAssessment {
                is_valid: false,
                reasons,
                warnings,
                position_capital: Decimal::ZERO,
                metrics: RiskMetrics {
                    risk_pct: 0.0,
                    risk_reward_ratio: 0.0,
                    position_pct_of_capital: 0.0,
                    kelly_fraction: kelly,
                    volume_score: analysis.composite_score,
                    liquidity_tier: analysis.tier,
                },
            };
        }

        // Base sizing: volume, liquidity and signal-quality multipliers
        let mut pct = self.config.base_position_pct
            * self.volume_multiplier(analysis.composite_score)
            * self.liquidity_adjustment(analysis.tier)
            * self.signal_multiplier(signal.consensus_score);

        // Dynamic adjustments from the volume read
        match analysis.trend {
            VolumeTrend::Accumulation => pct *= 1.1,
            VolumeTrend::Distribution => pct *= 0.9,
            VolumeTrend::Neutral => {}
        }
        if analysis.profile_strength >= 0.7 {
            pct *= 1.05;
        }
        if analysis.institutional_signals >= 3 {
            pct *= 1.1;
        }

        // Thin markets get a reduced ceiling on top of the smaller multiplier
        let tier_cap = match analysis.tier {
            LiquidityTier::VeryLow => 0.5,
            LiquidityTier::Low => 0.7,
            _ => 1.0,
        };
        let min_pct = self.config.min_position_pct;
        let max_pct = (self.config.max_position_pct * tier_cap).max(min_pct);
        pct = pct.clamp(min_pct, max_pct);

        let mut position_value = capital * pct;

        // Kelly ceiling on risk capital; a zero estimate is uninformative and
        // leaves the plain risk budget in charge
        let risk_budget = capital * self.config.max_risk_per_trade;
        let kelly_cap = capital * kelly * self.config.kelly_fraction;
        let risk_cap = if kelly_cap > 0.0 {
            risk_budget.min(kelly_cap)
        } else {
            risk_budget
        };
        if position_value * stop_distance > risk_cap {
            position_value = risk_cap / stop_distance;
            warnings.push(format!(
                "size reduced to honour risk ceiling ({:.2}% of capital at risk)",
                risk_cap / capital * 100.0
            ));
        }

        // Correlated open exposure shrinks the new position
        let category = AssetCategory::for_symbol(&signal.symbol);
        for open in &account.open_positions {
            if open.symbol == signal.symbol {
                continue;
            }
            let corr = pairwise_correlation(category, open.category);
            if corr > self.config.correlation_threshold {
                position_value *= 1.0 - corr * 0.3;
                warnings.push(format!(
                    "correlated exposure to {} (r={:.2}), size reduced",
                    open.symbol, corr
                ));
            }
        }

        // Category concentration against total capital
        let category_exposure: f64 = account
            .open_positions
            .iter()
            .filter(|p| p.category == category)
            .map(|p| to_f64(p.value))
            .sum();
        let concentration_limit = capital * self.config.max_category_concentration;
        if category_exposure + position_value > concentration_limit {
            let allowed = (concentration_limit - category_exposure).max(0.0);
            warnings.push(format!(
                "category concentration above {:.0}% of capital, size reduced",
                self.config.max_category_concentration * 100.0
            ));
            position_value = allowed;
        }

        // The sizing bounds are the outermost invariant
        position_value = position_value.clamp(capital * min_pct, capital * max_pct);

        let risk_amount = position_value * stop_distance;
        let risk_pct = risk_amount / capital;
        let risk_reward = if stop_distance > 0.0 {
            profit_distance / stop_distance
        } else {
            0.0
        };

        if position_value > capital {
            reasons.push(format!(
                "insufficient capital: position {:.2} exceeds {:.2}",
                position_value, capital
            ));
        }
        if risk_pct > self.config.max_risk_per_trade + 1e-9 {
            reasons.push(format!(
                "risk {:.2}% exceeds hard cap {:.2}%",
                risk_pct * 100.0,
                self.config.max_risk_per_trade * 100.0
            ));
        }

        if risk_reward < self.config.min_risk_reward {
            warnings.push(format!(
                "risk/reward {:.2} below recommended {:.1}",
                risk_reward, self.config.min_risk_reward
            ));
        }
        if stop_distance > 0.10 {
            warnings.push(format!("stop loss {:.1}% away", stop_distance * 100.0));
        }

        debug!(
            "Sized {} {}: {:.2} ({:.2}% of capital, risk {:.2}%, volume score {:.2})",
            signal.symbol,
            signal.side,
            position_value,
            pct * 100.0,
            risk_pct * 100.0,
            analysis.composite_score
        );

        RiskAssessment {
            is_valid: reasons.is_empty(),
            reasons,
            warnings,
            position_capital: to_decimal(position_value).round_dp(2),
            metrics: RiskMetrics {
                risk_pct,
                risk_reward_ratio: risk_reward,
                position_pct_of_capital: position_value / capital,
                kelly_fraction: kelly,
                volume_score: analysis.composite_score,
                liquidity_tier: analysis.tier,
            },
        }
    }
}
