//! State persistence between runs
//!
//! Serializes the engine's per-symbol signal state, the trailing stops and
//! the paper portfolio to one JSON file. Timestamps are stored as-is, so the
//! lockout and stop-monotonicity invariants carry across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_engine::{SignalState, TrailingStopState};
use tracing::{debug, info};
use uuid::Uuid;

use crate::portfolio::Portfolio;

/// Everything a restart needs to pick up where the last run stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerState {
    pub signal_states: HashMap<String, SignalState>,
    pub trailing_stops: HashMap<Uuid, TrailingStopState>,
    pub open_by_symbol: HashMap<String, Uuid>,
    pub portfolio: Portfolio,
    pub cursor: usize,
    pub saved_at: DateTime<Utc>,
}

/// Reads and writes the runner state file
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn save(&self, state: &RunnerState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("writing state file {}", self.path.display()))?;
        debug!("Saved runner state to {}", self.path.display());
        Ok(())
    }

    /// Load a previous state, or `None` on first run
    pub fn load(&self) -> anyhow::Result<Option<RunnerState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading state file {}", self.path.display()))?;
        let state: RunnerState = serde_json::from_str(&raw)
            .with_context(|| format!("parsing state file {}", self.path.display()))?;
        info!(
            "Restored runner state from {} (saved {})",
            self.path.display(),
            state.saved_at
        );
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let store = StateStore::new(&path);

        assert!(store.load().unwrap().is_none());

        let mut signal_states = HashMap::new();
        signal_states.insert(
            "BTC-USD".to_string(),
            SignalState {
                active: signal_engine::Side::Buy,
                issued_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
                history: VecDeque::new(),
            },
        );

        let state = RunnerState {
            signal_states,
            trailing_stops: HashMap::new(),
            open_by_symbol: HashMap::new(),
            portfolio: Portfolio::new(Decimal::from(10_000)),
            cursor: 42,
            saved_at: Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap(),
        };

        store.save(&state).unwrap();
        let restored = store.load().unwrap().unwrap();

        assert_eq!(restored.cursor, 42);
        assert_eq!(restored.signal_states.len(), 1);
        let btc = &restored.signal_states["BTC-USD"];
        assert_eq!(btc.active, signal_engine::Side::Buy);
        // Timestamps intact: the lockout guard keeps working after restore
        assert_eq!(
            btc.issued_at,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
        );
    }
}
