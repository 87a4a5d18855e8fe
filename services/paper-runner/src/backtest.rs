//! Backtest driver - replay history through the pipeline one step at a time
//!
//! The clock is driven from candle timestamps, so lockout and cooldown guards
//! behave exactly as they would have live, and identical inputs produce the
//! identical report.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use signal_engine::{Clock, ManualClock};
use tracing::info;

use crate::config::RunnerConfig;
use crate::data::CandleStore;
use crate::session::{TradeRecord, TradingSession};

/// Summary of one backtest run
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub symbols: Vec<String>,
    pub steps: usize,
    pub signals: u32,
    pub no_decisions: u32,
    pub trades: Vec<TradeRecord>,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub starting_capital: Decimal,
    pub ending_equity: Decimal,
    pub max_drawdown_pct: f64,
    pub avg_stop_efficiency: f64,
}

pub struct Backtester {
    config: RunnerConfig,
    store: CandleStore,
    session: TradingSession,
    clock: Arc<ManualClock>,
}

impl Backtester {
    /// Load candle files from the configured data directory
    pub fn new(config: RunnerConfig) -> anyhow::Result<Self> {
        let store = CandleStore::load_dir(&config.data_dir, &config.symbols)?;
        Ok(Self::with_store(config, store))
    }

    /// Run against an in-memory store (tests, synthetic data)
    pub fn with_store(config: RunnerConfig, store: CandleStore) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        ));
        let session = TradingSession::new(&config, clock.clone());
        Self {
            config,
            store,
            session,
            clock,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<BacktestReport> {
        let steps = self.store.max_len();
        let symbols = self.config.symbols.clone();
        info!(
            "Backtest starting: {} symbols over {} steps",
            symbols.len(),
            steps
        );

        let mut last_prices: HashMap<String, Decimal> = HashMap::new();
        let mut peak_equity = f64::MIN;
        let mut max_drawdown_pct: f64 = 0.0;

        for idx in 0..steps {
            for symbol in &symbols {
                let Some(candle) = self.store.candle(symbol, idx) else {
                    continue;
                };
                let candle = candle.clone();
                self.clock.set(candle.timestamp);
                last_prices.insert(symbol.clone(), candle.close);

                let Some(frames) = self.store.frames_at(symbol, idx, self.config.frame_window)?
                else {
                    continue;
                };
                self.session.process(symbol, &frames, &candle, 0);
            }

            self.session.portfolio.mark_to_market(&last_prices);
            let equity = self
                .session
                .portfolio
                .snapshot()
                .total_equity
                .to_f64()
                .unwrap_or(0.0);
            if equity > peak_equity {
                peak_equity = equity;
            }
            if peak_equity > 0.0 {
                let drawdown = (peak_equity - equity) / peak_equity * 100.0;
                if drawdown > max_drawdown_pct {
                    max_drawdown_pct = drawdown;
                }
            }
        }

        // Flatten at the end so the report accounts for every position
        self.session
            .close_all(&last_prices, self.clock.now(), "end of data");

        Ok(self.build_report(steps, max_drawdown_pct))
    }

    fn build_report(&self, steps: usize, max_drawdown_pct: f64) -> BacktestReport {
        let trades = self.session.trades.clone();
        let wins = trades.iter().filter(|t| t.pnl >= Decimal::ZERO).count() as u32;
        let losses = trades.len() as u32 - wins;
        let total_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64
        };
        let avg_stop_efficiency = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.efficiency).sum::<f64>() / trades.len() as f64
        };

        let snapshot = self.session.portfolio.snapshot();

        BacktestReport {
            symbols: self.config.symbols.clone(),
            steps,
            signals: self.session.signals,
            no_decisions: self.session.no_decisions,
            wins,
            losses,
            win_rate,
            total_pnl,
            starting_capital: Decimal::try_from(self.config.starting_capital)
                .unwrap_or(Decimal::ZERO),
            ending_equity: snapshot.total_equity,
            max_drawdown_pct,
            avg_stop_efficiency,
            trades,
        }
    }
}
