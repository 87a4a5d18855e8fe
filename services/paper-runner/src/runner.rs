//! Paper runner - interval-driven replay with persistent state
//!
//! Simulates live paper trading: every tick one new candle per symbol
//! "arrives" from the replay feed, the session takes its decision, and the
//! full state is written back to disk so a restart resumes mid-stream with
//! lockout timestamps and stop levels intact.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rust_decimal::Decimal;
use signal_engine::SystemClock;
use tokio::time::interval;
use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::data::CandleStore;
use crate::session::{StepOutcome, TradingSession};
use crate::state::StateStore;

pub struct PaperRunner {
    config: RunnerConfig,
    store: CandleStore,
    session: TradingSession,
    state_store: StateStore,
    cursor: usize,
}

impl PaperRunner {
    /// Load candles and, if present, the previous run's state
    pub fn new(config: RunnerConfig) -> anyhow::Result<Self> {
        let store = CandleStore::load_dir(&config.data_dir, &config.symbols)?;
        let state_store = StateStore::new(&config.state_file);
        let mut session = TradingSession::new(&config, Arc::new(SystemClock));

        let mut cursor = 0;
        if let Some(state) = state_store.load()? {
            cursor = state.cursor;
            session.restore(state);
            info!("Resuming paper run at step {}", cursor);
        }

        Ok(Self {
            config,
            store,
            session,
            state_store,
            cursor,
        })
    }

    /// Run until the replay feed is exhausted
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "📝 Paper trading {} symbols, one candle every {}s",
            self.config.symbols.len(),
            self.config.poll_interval_secs
        );

        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs));
        let total = self.store.max_len();

        loop {
            ticker.tick().await;

            if self.cursor >= total {
                info!("Replay feed exhausted after {} steps", self.cursor);
                break;
            }

            if let Err(e) = self.step() {
                warn!("Trading step error: {}", e);
            }

            self.cursor += 1;
            let state = self.session.to_state(self.cursor, chrono::Utc::now());
            self.state_store.save(&state)?;
        }

        let snapshot = self.session.portfolio.snapshot();
        info!(
            "Paper run finished: equity {}, realized PnL {}, {} trades",
            snapshot.total_equity,
            snapshot.realized_pnl,
            self.session.trades.len()
        );
        Ok(())
    }

    fn step(&mut self) -> anyhow::Result<()> {
        let idx = self.cursor;
        let symbols = self.config.symbols.clone();
        let mut prices: HashMap<String, Decimal> = HashMap::new();
        let mut rng = rand::thread_rng();

        for symbol in &symbols {
            let Some(candle) = self.store.candle(symbol, idx) else {
                continue;
            };
            let candle = candle.clone();
            prices.insert(symbol.clone(), candle.close);

            let Some(frames) = self.store.frames_at(symbol, idx, self.config.frame_window)?
            else {
                continue;
            };

            // Live fills wander a little beyond the configured slippage
            let jitter_bps: u32 = rng.gen_range(0..=3);
            match self.session.process(symbol, &frames, &candle, jitter_bps) {
                StepOutcome::Opened(id) => info!("{}: position opened ({})", symbol, id),
                StepOutcome::Exited(record) => {
                    info!("{}: position exited, PnL {}", symbol, record.pnl)
                }
                StepOutcome::HoldingOpen | StepOutcome::NoDecision(_) => {}
            }
        }

        self.session.portfolio.mark_to_market(&prices);
        Ok(())
    }
}
