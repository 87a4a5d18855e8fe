//! End-to-end backtest harness
//!
//! Validates the full loop over synthetic history:
//! candles -> frames -> regime/ensemble/consensus -> sizing -> trailing exit
//! plus report accounting, reproducibility, and state persistence.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use signal_engine::{Candle, Clock, ManualClock};

use paper_runner::{
    Backtester, CandleStore, RunMode, RunnerConfig, StateStore, TradingSession,
};

fn dec(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap()
}

/// Deterministic synthetic series: rally, range, selloff
fn synthetic_candles(seed: u64, len: usize) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let mut price: f64 = 30_000.0;
    let mut candles = Vec::with_capacity(len);

    for i in 0..len {
        let drift = if i < len / 2 {
            0.0015 // rally
        } else if i < len * 3 / 4 {
            0.0 // range
        } else {
            -0.002 // selloff
        };
        let noise: f64 = rng.gen_range(-0.004..0.004);
        price = (price * (1.0 + drift + noise)).max(1_000.0);

        let spread = price * 0.006;
        let volume = if rng.gen_ratio(1, 12) {
            3_000.0 + rng.gen_range(0.0..2_000.0) // spike
        } else {
            900.0 + rng.gen_range(0.0..200.0)
        };

        candles.push(Candle {
            timestamp: start + Duration::hours(i as i64),
            open: dec(price),
            high: dec(price + spread),
            low: dec(price - spread),
            close: dec(price),
            volume: dec(volume),
        });
    }
    candles
}

/// Config tuned so the long horizon warms up inside the synthetic series
fn test_config() -> RunnerConfig {
    let mut config = RunnerConfig::default();
    config.mode = RunMode::Backtest;
    config.symbols = vec!["BTC-USD".to_string()];
    config.starting_capital = 10_000.0;
    config.frame_window = 120;
    config.engine.pipeline.min_medium_candles = 30;
    config.engine.pipeline.min_long_candles = 20;
    config
}

fn store_with(series: Vec<Candle>) -> CandleStore {
    let mut store = CandleStore::new();
    store.insert("BTC-USD", series).unwrap();
    store
}

#[test]
fn backtest_runs_and_accounts_cleanly() {
    let config = test_config();
    let candles = synthetic_candles(7, 1_500);
    let mut backtester = Backtester::with_store(config, store_with(candles));

    let report = backtester.run().unwrap();

    assert_eq!(report.steps, 1_500);
    // The steady state is no-decision; decisions are the exception
    assert!(report.no_decisions > 0);

    // Every closed position is in the ledger and the cash adds up:
    // ending equity = starting capital + total PnL once everything is flat
    let expected = report.starting_capital + report.total_pnl;
    let diff = (report.ending_equity - expected).abs();
    assert!(
        diff < Decimal::from_f64(0.01).unwrap(),
        "equity {} vs expected {}",
        report.ending_equity,
        expected
    );

    assert_eq!(
        report.wins + report.losses,
        report.trades.len() as u32
    );
    for trade in &report.trades {
        assert!(!trade.exit_reason.is_empty());
        assert!(trade.efficiency >= 0.0 && trade.efficiency <= 1.0);
    }
    assert!(report.max_drawdown_pct >= 0.0);
}

#[test]
fn backtest_is_reproducible() {
    let run = || {
        let config = test_config();
        let candles = synthetic_candles(21, 1_200);
        let mut backtester = Backtester::with_store(config, store_with(candles));
        backtester.run().unwrap()
    };

    let a = run();
    let b = run();

    assert_eq!(a.signals, b.signals);
    assert_eq!(a.no_decisions, b.no_decisions);
    assert_eq!(a.trades.len(), b.trades.len());
    assert_eq!(a.total_pnl, b.total_pnl);
    assert_eq!(a.ending_equity, b.ending_equity);
    assert_eq!(a.max_drawdown_pct, b.max_drawdown_pct);
}

#[test]
fn candle_files_round_trip_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let candles = synthetic_candles(3, 400);
    let json = serde_json::to_string(&candles).unwrap();
    std::fs::write(dir.path().join("BTC-USD.json"), json).unwrap();

    let store =
        CandleStore::load_dir(dir.path(), &["BTC-USD".to_string()]).unwrap();
    assert_eq!(store.len("BTC-USD"), 400);
    assert_eq!(
        store.candle("BTC-USD", 399).unwrap().close,
        candles[399].close
    );

    // Missing file is an error, not a silent empty series
    assert!(CandleStore::load_dir(dir.path(), &["ETH-USD".to_string()]).is_err());
}

#[test]
fn session_state_survives_a_restart() {
    let config = test_config();
    let candles = synthetic_candles(11, 900);
    let store = store_with(candles);

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let mut session = TradingSession::new(&config, clock.clone());

    // Walk far enough that frames are warm, then a bit further
    for idx in 0..700 {
        let candle = store.candle("BTC-USD", idx).unwrap().clone();
        clock.set(candle.timestamp);
        let frames = store
            .frames_at("BTC-USD", idx, config.frame_window)
            .unwrap()
            .unwrap();
        session.process("BTC-USD", &frames, &candle, 0);
    }

    let cash_before = session.portfolio.cash();
    let open_before = session.open_position_count();

    // Persist, then rebuild a fresh session from disk
    let dir = tempfile::tempdir().unwrap();
    let state_store = StateStore::new(&dir.path().join("state.json"));
    state_store
        .save(&session.to_state(700, clock.now()))
        .unwrap();

    let mut restored = TradingSession::new(&config, clock.clone());
    restored.restore(state_store.load().unwrap().unwrap());

    assert_eq!(restored.portfolio.cash(), cash_before);
    assert_eq!(restored.open_position_count(), open_before);

    // Both sessions keep making the same calls on the same data
    for idx in 700..750 {
        let candle = store.candle("BTC-USD", idx).unwrap().clone();
        clock.set(candle.timestamp);
        let frames = store
            .frames_at("BTC-USD", idx, config.frame_window)
            .unwrap()
            .unwrap();
        session.process("BTC-USD", &frames, &candle, 0);
        restored.process("BTC-USD", &frames, &candle, 0);
    }
    assert_eq!(session.portfolio.cash(), restored.portfolio.cash());
    assert_eq!(
        session.open_position_count(),
        restored.open_position_count()
    );
}
