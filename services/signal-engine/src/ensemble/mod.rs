//! Strategy ensemble - independent heuristic voters
//!
//! Every voter looks at the same frames and emits one `Opinion`. The ensemble
//! weights each voter's confidence by its expertise in the current regime
//! (trend specialists get boosted in trending markets, discounted in ranges,
//! and so on) and clamps the result. Nothing downstream depends on a voter's
//! internals, only on the Opinion contract, so heuristics are swappable.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::FrameSet;
use crate::regime::{Regime, RegimeAssessment};

pub mod breakout;
pub mod crossover;
pub mod levels;
pub mod momentum;
pub mod oscillator;

pub use breakout::BreakoutVoter;
pub use crossover::CrossoverVoter;
pub use levels::RangeLevelsVoter;
pub use momentum::MacdMomentumVoter;
pub use oscillator::OscillatorVoter;

/// Directional recommendation of a single voter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

/// One voter's view of the market for one cycle
#[derive(Debug, Clone)]
pub struct Opinion {
    pub voter_id: String,
    pub direction: Direction,
    /// Weighted and clamped to [0, 0.95] by the ensemble
    pub confidence: f64,
    /// Setup markers, e.g. "rsi_oversold", "volume_confirmed"
    pub tags: Vec<String>,
}

impl Opinion {
    pub fn hold(voter_id: &str) -> Self {
        Self {
            voter_id: voter_id.to_string(),
            direction: Direction::Hold,
            confidence: 0.0,
            tags: Vec::new(),
        }
    }

    pub fn new(voter_id: &str, direction: Direction, confidence: f64, tags: Vec<String>) -> Self {
        Self {
            voter_id: voter_id.to_string(),
            direction,
            confidence,
            tags,
        }
    }
}

/// A pluggable heuristic strategy
pub trait Voter: Send + Sync {
    fn id(&self) -> &str;

    /// Regime this voter is strongest in
    fn affinity(&self) -> Regime;

    /// Expertise multiplier for the given regime, within [0.5, 1.4]
    fn regime_weight(&self, regime: Regime) -> f64;

    /// Evaluate the market and emit one opinion
    fn evaluate(&self, frames: &FrameSet) -> Opinion;
}

/// Fixed set of voters evaluated together each cycle
pub struct StrategyEnsemble {
    voters: Vec<Box<dyn Voter>>,
}

impl StrategyEnsemble {
    pub fn with_voters(voters: Vec<Box<dyn Voter>>) -> Self {
        Self { voters }
    }

    /// The five default heuristics
    pub fn default_set() -> Self {
        Self::with_voters(vec![
            Box::new(OscillatorVoter::default()),
            Box::new(CrossoverVoter::default()),
            Box::new(RangeLevelsVoter::default()),
            Box::new(BreakoutVoter::default()),
            Box::new(MacdMomentumVoter::default()),
        ])
    }

    /// Build from configured voter names; unknown names are skipped
    pub fn from_names(names: &[String]) -> Self {
        let mut voters: Vec<Box<dyn Voter>> = Vec::new();
        for name in names {
            match name.as_str() {
                "oscillator" => voters.push(Box::new(OscillatorVoter::default())),
                "crossover" => voters.push(Box::new(CrossoverVoter::default())),
                "levels" => voters.push(Box::new(RangeLevelsVoter::default())),
                "breakout" => voters.push(Box::new(BreakoutVoter::default())),
                "momentum" => voters.push(Box::new(MacdMomentumVoter::default())),
                other => debug!("Unknown voter in config, skipping: {}", other),
            }
        }
        Self::with_voters(voters)
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    /// Collect one regime-weighted opinion per voter
    pub fn collect(&self, frames: &FrameSet, regime: &RegimeAssessment) -> Vec<Opinion> {
        self.voters
            .iter()
            .map(|voter| {
                let mut opinion = voter.evaluate(frames);
                let weight = voter.regime_weight(regime.regime);
                opinion.confidence = (opinion.confidence * weight).clamp(0.0, 0.95);
                debug!(
                    "Voter {} -> {:?} ({:.2}, weight {:.2})",
                    opinion.voter_id, opinion.direction, opinion.confidence, weight
                );
                opinion
            })
            .collect()
    }
}
