//! Candle store - file-backed history for backtests and replay
//!
//! Candles arrive pre-fetched as JSON files, one per symbol; fetching them is
//! the data-retrieval collaborator's job, not ours. The store serves the
//! engine `FrameSet`s as of a given step: the raw series for the short
//! horizon, with 4x and 24x aggregations standing in for the swing and trend
//! horizons.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use signal_engine::{Candle, FeatureFrame, FrameSet};
use tracing::info;

/// Aggregation factors for the medium and long horizons
const MEDIUM_GROUP: usize = 4;
const LONG_GROUP: usize = 24;

pub struct CandleStore {
    series: HashMap<String, Vec<Candle>>,
}

impl CandleStore {
    pub fn new() -> Self {
        Self {
            series: HashMap::new(),
        }
    }

    /// Load `{symbol}.json` for every symbol from a directory
    pub fn load_dir(dir: &Path, symbols: &[String]) -> anyhow::Result<Self> {
        let mut store = Self::new();
        for symbol in symbols {
            let path = dir.join(format!("{}.json", symbol));
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading candle file {}", path.display()))?;
            let candles: Vec<Candle> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing candle file {}", path.display()))?;
            info!("Loaded {} candles for {}", candles.len(), symbol);
            store.insert(symbol, candles)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, symbol: &str, candles: Vec<Candle>) -> anyhow::Result<()> {
        if candles.is_empty() {
            return Err(anyhow!("empty candle series for {}", symbol));
        }
        // Fail fast on malformed input rather than at decision time
        FeatureFrame::new(candles.clone())
            .map_err(|e| anyhow!("bad candle series for {}: {}", symbol, e))?;
        self.series.insert(symbol.to_string(), candles);
        Ok(())
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map(|s| s.len()).unwrap_or(0)
    }

    pub fn max_len(&self) -> usize {
        self.series.values().map(|s| s.len()).max().unwrap_or(0)
    }

    pub fn candle(&self, symbol: &str, idx: usize) -> Option<&Candle> {
        self.series.get(symbol).and_then(|s| s.get(idx))
    }

    /// Frames visible at step `idx` (candle `idx` is the latest known).
    /// Returns `None` when the symbol is unknown or the step is out of range;
    /// whether the frames are *long enough* is the pipeline's call.
    pub fn frames_at(
        &self,
        symbol: &str,
        idx: usize,
        window: usize,
    ) -> anyhow::Result<Option<FrameSet>> {
        let Some(series) = self.series.get(symbol) else {
            return Ok(None);
        };
        if idx >= series.len() {
            return Ok(None);
        }

        let visible = &series[..=idx];

        let short_start = visible.len().saturating_sub(window);
        let short = FeatureFrame::new(visible[short_start..].to_vec())?;

        let medium = FeatureFrame::new(aggregate(visible, MEDIUM_GROUP))?;
        let long = FeatureFrame::new(aggregate(visible, LONG_GROUP))?;

        Ok(Some(FrameSet {
            short,
            medium,
            long,
        }))
    }
}

/// Aggregate base candles into groups of `group`, aligned so the newest
/// aggregated candle ends at the newest base candle
fn aggregate(candles: &[Candle], group: usize) -> Vec<Candle> {
    if candles.len() <= group {
        return candles.to_vec();
    }

    let remainder = candles.len() % group;
    let mut out = Vec::with_capacity(candles.len() / group + 1);

    // A partial leading group keeps the series anchored at the oldest data
    if remainder > 0 {
        out.push(merge(&candles[..remainder]));
    }
    for chunk in candles[remainder..].chunks(group) {
        out.push(merge(chunk));
    }
    out
}

fn merge(chunk: &[Candle]) -> Candle {
    let mut high = chunk[0].high;
    let mut low = chunk[0].low;
    let mut volume = chunk[0].volume;
    for candle in &chunk[1..] {
        if candle.high > high {
            high = candle.high;
        }
        if candle.low < low {
            low = candle.low;
        }
        volume += candle.volume;
    }
    Candle {
        timestamp: chunk[0].timestamp,
        open: chunk[0].open,
        high,
        low,
        close: chunk[chunk.len() - 1].close,
        volume,
    }
}
