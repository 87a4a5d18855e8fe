//! Trading session - shared per-step logic for backtest and live paper modes
//!
//! One session owns the pipeline, the trailing-stop engine, the portfolio and
//! the symbol-to-position map. Both drivers feed it one candle per symbol per
//! step; it answers with what happened.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use signal_engine::{
    Candle, Clock, Decision, FrameSet, Side, SignalPipeline, TrailingStopEngine,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::portfolio::Portfolio;
use crate::state::RunnerState;

/// One completed round trip
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub periods_held: u32,
    pub exit_reason: String,
    /// Stop efficiency at exit (protected gain over max gain)
    pub efficiency: f64,
}

/// What one (symbol, step) produced
#[derive(Debug)]
pub enum StepOutcome {
    Opened(Uuid),
    Exited(TradeRecord),
    HoldingOpen,
    NoDecision(String),
}

pub struct TradingSession {
    pipeline: SignalPipeline,
    trailing: TrailingStopEngine,
    pub portfolio: Portfolio,
    open_by_symbol: HashMap<String, Uuid>,
    pub trades: Vec<TradeRecord>,
    pub signals: u32,
    pub no_decisions: u32,
    slippage_bps: u32,
}

impl TradingSession {
    pub fn new(config: &RunnerConfig, clock: Arc<dyn Clock>) -> Self {
        let pipeline = SignalPipeline::new(config.engine.clone(), clock);
        let trailing = TrailingStopEngine::new(config.engine.trailing.clone());
        let portfolio = Portfolio::new(
            Decimal::try_from(config.starting_capital).unwrap_or(Decimal::from(10_000)),
        );
        Self {
            pipeline,
            trailing,
            portfolio,
            open_by_symbol: HashMap::new(),
            trades: Vec::new(),
            signals: 0,
            no_decisions: 0,
            slippage_bps: config.slippage_bps,
        }
    }

    /// Process one symbol at one step. `extra_slippage_bps` models live fill
    /// jitter; backtests pass 0 to stay reproducible.
    pub fn process(
        &mut self,
        symbol: &str,
        frames: &FrameSet,
        candle: &Candle,
        extra_slippage_bps: u32,
    ) -> StepOutcome {
        let price = candle.close;

        // A symbol with an open position is exit-managed only
        if let Some(position_id) = self.open_by_symbol.get(symbol).copied() {
            if let Some(update) = self.trailing.update(position_id, price, &frames.short) {
                if update.triggered {
                    let record = self.exit_position(
                        symbol,
                        position_id,
                        update.current_stop,
                        candle.timestamp,
                        update
                            .trigger_reason
                            .unwrap_or_else(|| "stop triggered".to_string()),
                        update.efficiency,
                    );
                    if let Some(record) = record {
                        return StepOutcome::Exited(record);
                    }
                }
            }
            return StepOutcome::HoldingOpen;
        }

        // Flat on this symbol: ask the pipeline
        let account = self.portfolio.account_snapshot();
        match self.pipeline.evaluate(symbol, frames, &account) {
            Decision::Entry(intent) => {
                let fill_price =
                    apply_slippage(price, intent.side, self.slippage_bps + extra_slippage_bps);
                match self.portfolio.open_position(&intent, fill_price, candle.timestamp) {
                    Ok(position_id) => {
                        self.trailing.open(
                            position_id,
                            symbol,
                            intent.side,
                            fill_price,
                            candle.timestamp,
                            intent.consensus_score,
                            &frames.short,
                        );
                        self.open_by_symbol.insert(symbol.to_string(), position_id);
                        self.signals += 1;
                        StepOutcome::Opened(position_id)
                    }
                    Err(e) => {
                        warn!("{}: intent dropped: {}", symbol, e);
                        StepOutcome::NoDecision(e.to_string())
                    }
                }
            }
            Decision::NoDecision { reason } => {
                self.no_decisions += 1;
                debug!("{}: no decision ({})", symbol, reason);
                StepOutcome::NoDecision(reason)
            }
        }
    }

    /// Close every open position at the given prices ("end of data")
    pub fn close_all(
        &mut self,
        prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
        reason: &str,
    ) {
        let open: Vec<(String, Uuid)> = self
            .open_by_symbol
            .iter()
            .map(|(s, id)| (s.clone(), *id))
            .collect();
        for (symbol, position_id) in open {
            let Some(price) = prices.get(&symbol).copied() else {
                continue;
            };
            self.exit_position(&symbol, position_id, price, now, reason.to_string(), 0.0);
        }
    }

    fn exit_position(
        &mut self,
        symbol: &str,
        position_id: Uuid,
        exit_price: Decimal,
        now: DateTime<Utc>,
        reason: String,
        efficiency: f64,
    ) -> Option<TradeRecord> {
        let position = self.portfolio.position(position_id)?.clone();
        let pnl = self.portfolio.close_position(position_id, exit_price)?;
        let stop_state = self.trailing.close(position_id);
        self.open_by_symbol.remove(symbol);

        let record = TradeRecord {
            symbol: symbol.to_string(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            pnl,
            opened_at: position.opened_at,
            closed_at: now,
            periods_held: stop_state.map(|s| s.periods_held).unwrap_or(0),
            exit_reason: reason,
            efficiency,
        };
        info!(
            "Trade done: {} {} {} -> {} | PnL {}",
            record.side, record.symbol, record.entry_price, record.exit_price, record.pnl
        );
        self.trades.push(record.clone());
        Some(record)
    }

    pub fn open_position_count(&self) -> usize {
        self.open_by_symbol.len()
    }

    /// Capture everything that must survive a restart
    pub fn to_state(&self, cursor: usize, now: DateTime<Utc>) -> RunnerState {
        RunnerState {
            signal_states: self.pipeline.snapshot_signal_states(),
            trailing_stops: self.trailing.snapshot(),
            open_by_symbol: self.open_by_symbol.clone(),
            portfolio: self.portfolio.clone(),
            cursor,
            saved_at: now,
        }
    }

    /// Rehydrate from a previous run's state, timestamps intact
    pub fn restore(&mut self, state: RunnerState) {
        self.pipeline.restore_signal_states(state.signal_states);
        self.trailing.restore(state.trailing_stops);
        self.open_by_symbol = state.open_by_symbol;
        self.portfolio = state.portfolio;
    }
}

/// Adverse fill: longs pay up, shorts sell down
fn apply_slippage(price: Decimal, side: Side, bps: u32) -> Decimal {
    let factor = Decimal::from(bps) / Decimal::from(10_000);
    match side {
        Side::Buy => price * (Decimal::ONE + factor),
        Side::Sell => price * (Decimal::ONE - factor),
    }
}
