//! Runner configuration
//!
//! Layered: an optional config file (RUNNER_CONFIG, default `runner.*`)
//! overridden by RUNNER_* environment variables.

use std::path::PathBuf;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use signal_engine::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Replay history in one pass and print a report
    #[default]
    Backtest,
    /// Replay the candle feed on a timer, persisting state between ticks
    Paper,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub mode: RunMode,
    pub symbols: Vec<String>,
    /// Directory holding one `{symbol}.json` candle file per symbol
    pub data_dir: PathBuf,
    pub state_file: PathBuf,
    /// Optional JSON artifact for the backtest report
    pub report_file: Option<PathBuf>,
    pub starting_capital: f64,
    pub poll_interval_secs: u64,
    /// Candles in the short frame handed to the engine
    pub frame_window: usize,
    /// Adverse fill slippage in basis points
    pub slippage_bps: u32,
    pub engine: EngineConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Backtest,
            symbols: vec!["BTC-USD".to_string()],
            data_dir: PathBuf::from("data"),
            state_file: PathBuf::from("state/runner_state.json"),
            report_file: None,
            starting_capital: 10_000.0,
            poll_interval_secs: 60,
            frame_window: 120,
            slippage_bps: 5,
            engine: EngineConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// Load from file + environment
    pub fn load() -> anyhow::Result<Self> {
        let file = std::env::var("RUNNER_CONFIG").unwrap_or_else(|_| "runner".to_string());

        let settings = ConfigLoader::builder()
            .add_source(File::with_name(&file).required(false))
            .add_source(Environment::with_prefix("RUNNER").separator("__"))
            .build()?;

        let config: RunnerConfig = settings.try_deserialize()?;
        Ok(config)
    }
}
