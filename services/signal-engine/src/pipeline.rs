//! Pipeline facade - one decision per symbol per time step
//!
//! Wires the classifier, ensemble, validator and risk gate into a single
//! entry point. The result is either a fully sized `PositionIntent` or an
//! explicit no-decision with the reason; the caller (backtest loop or live
//! scheduler) owns execution and the trailing-stop engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::consensus::{ConsensusValidator, Side, SignalState, Verdict};
use crate::ensemble::StrategyEnsemble;
use crate::frame::{to_decimal, FrameSet};
use crate::regime::RegimeClassifier;
use crate::sizing::{AccountSnapshot, RiskGate};

/// Sized, risk-checked order intent handed to the execution collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionIntent {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub position_capital: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Risk at the stop as a fraction of capital
    pub risk_pct: f64,
    pub consensus_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one evaluation cycle
#[derive(Debug, Clone)]
pub enum Decision {
    Entry(PositionIntent),
    /// Expected steady-state outcome, not a failure
    NoDecision { reason: String },
}

impl Decision {
    pub fn is_entry(&self) -> bool {
        matches!(self, Decision::Entry(_))
    }

    pub fn no_decision(reason: impl Into<String>) -> Self {
        Decision::NoDecision {
            reason: reason.into(),
        }
    }
}

/// The adaptive signal pipeline for entries
pub struct SignalPipeline {
    config: EngineConfig,
    classifier: RegimeClassifier,
    ensemble: StrategyEnsemble,
    validator: ConsensusValidator,
    risk_gate: RiskGate,
}

impl SignalPipeline {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let ensemble = if config.voters.is_empty() {
            StrategyEnsemble::default_set()
        } else {
            StrategyEnsemble::from_names(&config.voters)
        };
        Self::with_ensemble(config, clock, ensemble)
    }

    /// Build with a caller-supplied voter set (tests, custom strategies)
    pub fn with_ensemble(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        ensemble: StrategyEnsemble,
    ) -> Self {
        let classifier = RegimeClassifier::new(config.regime.clone());
        let validator = ConsensusValidator::new(config.consensus.clone(), clock);
        let risk_gate = RiskGate::new(config.sizing.clone());
        Self {
            config,
            classifier,
            ensemble,
            validator,
            risk_gate,
        }
    }

    /// Evaluate one symbol for one time step
    pub fn evaluate(
        &mut self,
        symbol: &str,
        frames: &FrameSet,
        account: &AccountSnapshot,
    ) -> Decision {
        let limits = &self.config.pipeline;
        if frames.short.len() < limits.min_short_candles
            || frames.medium.len() < limits.min_medium_candles
            || frames.long.len() < limits.min_long_candles
        {
            return Decision::no_decision(format!(
                "insufficient data: {}/{}/{} candles, need {}/{}/{}",
                frames.short.len(),
                frames.medium.len(),
                frames.long.len(),
                limits.min_short_candles,
                limits.min_medium_candles,
                limits.min_long_candles
            ));
        }

        let regime = self.classifier.classify(frames);
        debug!(
            "{}: regime {:?} ({:.0}% confidence, trend strength {:.0})",
            symbol,
            regime.regime,
            regime.confidence * 100.0,
            regime.trend_strength
        );

        let opinions = self.ensemble.collect(frames, &regime);

        let signal = match self.validator.validate(symbol, &opinions) {
            Verdict::Accepted(signal) => signal,
            Verdict::Rejected(reason) => {
                return Decision::no_decision(reason.to_string());
            }
        };

        // Entry geometry off the short frame's volatility
        let entry_price = frames.short.last().close;
        let atr = to_decimal(frames.short.last_row().atr);
        let stop_distance = atr * to_decimal(self.config.pipeline.stop_atr_multiplier);
        let target_distance = atr * to_decimal(self.config.pipeline.target_atr_multiplier);
        let (stop_loss, take_profit) = match signal.side {
            Side::Buy => (entry_price - stop_distance, entry_price + target_distance),
            Side::Sell => (entry_price + stop_distance, entry_price - target_distance),
        };

        let assessment = self.risk_gate.assess(
            &signal,
            entry_price,
            stop_loss,
            take_profit,
            &frames.short,
            account,
        );

        for warning in &assessment.warnings {
            warn!("{}: {}", symbol, warning);
        }

        if !assessment.is_valid {
            return Decision::no_decision(format!(
                "trade blocked: {}",
                assessment.reasons.join("; ")
            ));
        }

        let intent = PositionIntent {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: signal.side,
            entry_price,
            position_capital: assessment.position_capital,
            stop_loss,
            take_profit,
            risk_pct: assessment.metrics.risk_pct,
            consensus_score: signal.consensus_score,
            timestamp: signal.timestamp,
        };

        info!(
            "{} intent: {} {} at {} (capital {}, stop {}, target {})",
            symbol,
            intent.side,
            intent.symbol,
            intent.entry_price,
            intent.position_capital,
            intent.stop_loss,
            intent.take_profit
        );

        Decision::Entry(intent)
    }

    /// Read access to the consensus state (bias queries, reporting)
    pub fn validator(&self) -> &ConsensusValidator {
        &self.validator
    }

    /// Signal state for persistence between runs
    pub fn snapshot_signal_states(&self) -> HashMap<String, SignalState> {
        self.validator.snapshot()
    }

    /// Rehydrate signal state from a previous run, timestamps intact
    pub fn restore_signal_states(&mut self, states: HashMap<String, SignalState>) {
        self.validator.restore(states);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ensemble::{Direction, Opinion, Voter};
    use crate::frame::{Candle, FeatureFrame};
    use crate::regime::Regime;
    use chrono::{Duration, TimeZone};

    /// Voter with a fixed answer, for driving the pipeline end to end
    struct ScriptedVoter {
        id: String,
        direction: Direction,
    }

    impl ScriptedVoter {
        fn boxed(id: &str, direction: Direction) -> Box<dyn Voter> {
            Box::new(Self {
                id: id.to_string(),
                direction,
            })
        }
    }

    impl Voter for ScriptedVoter {
        fn id(&self) -> &str {
            &self.id
        }

        fn affinity(&self) -> Regime {
            Regime::Ranging
        }

        fn regime_weight(&self, _regime: Regime) -> f64 {
            1.0
        }

        fn evaluate(&self, _frames: &FrameSet) -> Opinion {
            Opinion::new(&self.id, self.direction, 0.7, Vec::new())
        }
    }

    fn liquid_frames(len: usize) -> FrameSet {
        let candles: Vec<Candle> = (0..len)
            .map(|i| {
                let ts =
                    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
                Candle {
                    timestamp: ts,
                    open: to_decimal(2000.0),
                    high: to_decimal(2010.0),
                    low: to_decimal(1990.0),
                    close: to_decimal(2000.0),
                    volume: to_decimal(50_000.0),
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

    fn buy_heavy_pipeline(clock: Arc<ManualClock>) -> SignalPipeline {
        let ensemble = StrategyEnsemble::with_voters(vec![
            ScriptedVoter::boxed("a", Direction::Buy),
            ScriptedVoter::boxed("b", Direction::Buy),
            ScriptedVoter::boxed("c", Direction::Buy),
            ScriptedVoter::boxed("d", Direction::Buy),
            ScriptedVoter::boxed("e", Direction::Hold),
        ]);
        SignalPipeline::with_ensemble(EngineConfig::default(), clock, ensemble)
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap(),
        ))
    }

    #[test]
    fn too_little_data_yields_no_decision() {
        let mut pipeline = buy_heavy_pipeline(manual_clock());
        let account = AccountSnapshot::flat(to_decimal(10_000.0));
        let decision = pipeline.evaluate("ETH-USD", &liquid_frames(10), &account);
        match decision {
            Decision::NoDecision { reason } => assert!(reason.contains("insufficient data")),
            other => panic!("expected no-decision, got {:?}", other),
        }
    }

    #[test]
    fn consensus_buy_produces_a_sized_intent() {
        let mut pipeline = buy_heavy_pipeline(manual_clock());
        let account = AccountSnapshot::flat(to_decimal(10_000.0));
        let frames = liquid_frames(60);

        let decision = pipeline.evaluate("ETH-USD", &frames, &account);
        let intent = match decision {
            Decision::Entry(intent) => intent,
            Decision::NoDecision { reason } => panic!("expected entry, got: {}", reason),
        };

        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.entry_price, to_decimal(2000.0));
        assert!(intent.stop_loss < intent.entry_price);
        assert!(intent.take_profit > intent.entry_price);
        assert!((intent.consensus_score - 0.8).abs() < 1e-12);

        // Sized within the configured bounds
        let capital = 10_000.0;
        let value = crate::frame::to_f64(intent.position_capital);
        assert!(value >= capital * 0.005 && value <= capital * 0.10);
        assert!(intent.risk_pct <= 0.02 + 1e-9);
    }

    #[test]
    fn second_cycle_within_cooldown_is_idempotent() {
        let clock = manual_clock();
        let mut pipeline = buy_heavy_pipeline(clock.clone());
        let account = AccountSnapshot::flat(to_decimal(10_000.0));
        let frames = liquid_frames(60);

        assert!(pipeline.evaluate("ETH-USD", &frames, &account).is_entry());

        // Identical opinions two minutes later: exactly one signal overall
        clock.advance(Duration::minutes(2));
        let decision = pipeline.evaluate("ETH-USD", &frames, &account);
        match decision {
            Decision::NoDecision { reason } => assert!(reason.contains("cooldown")),
            other => panic!("expected cooldown rejection, got {:?}", other),
        }
    }

    #[test]
    fn organic_voters_mostly_disagree_on_flat_data() {
        // The real voter set on featureless data must not conjure an entry
        let mut pipeline = SignalPipeline::new(EngineConfig::default(), manual_clock());
        let account = AccountSnapshot::flat(to_decimal(10_000.0));
        let decision = pipeline.evaluate("ETH-USD", &liquid_frames(60), &account);
        assert!(!decision.is_entry());
    }

    #[test]
    fn signal_state_survives_snapshot_restore() {
        let clock = manual_clock();
        let mut pipeline = buy_heavy_pipeline(clock.clone());
        let account = AccountSnapshot::flat(to_decimal(10_000.0));
        let frames = liquid_frames(60);

        assert!(pipeline.evaluate("ETH-USD", &frames, &account).is_entry());
        let saved = pipeline.snapshot_signal_states();

        // Fresh pipeline, rehydrated: the cooldown must still bite
        let mut restored = buy_heavy_pipeline(clock.clone());
        restored.restore_signal_states(saved);
        clock.advance(Duration::minutes(2));
        let decision = restored.evaluate("ETH-USD", &frames, &account);
        assert!(!decision.is_entry());
    }
}
