//! Paper Runner - backtest and live-paper driver for the signal engine
//!
//! 1. Loads configuration (file + RUNNER_* environment)
//! 2. Reads pre-fetched candle history from JSON files
//! 3. Backtest mode: replays everything in one pass and prints a report
//! 4. Paper mode: replays on a timer with state persisted between ticks

use tracing::info;

use paper_runner::{report, Backtester, PaperRunner, RunMode, RunnerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting Paper Runner...");

    let config = RunnerConfig::load()?;
    info!(
        "Mode: {:?}, symbols: {}, data dir: {}",
        config.mode,
        config.symbols.join(", "),
        config.data_dir.display()
    );

    match config.mode {
        RunMode::Backtest => {
            let report_file = config.report_file.clone();
            let mut backtester = Backtester::new(config)?;
            let result = backtester.run()?;

            println!("{}", report::render(&result));
            if let Some(path) = report_file {
                report::write_json(&result, &path)?;
                info!("Report written to {}", path.display());
            }
        }
        RunMode::Paper => {
            let runner = PaperRunner::new(config)?;
            runner.run().await?;
        }
    }

    Ok(())
}
