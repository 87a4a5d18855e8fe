//! Engine configuration
//!
//! One serde-friendly bundle for every tunable in the pipeline. All fields
//! default sensibly, so a config file only needs the knobs it changes.

use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusConfig;
use crate::regime::RegimeConfig;
use crate::sizing::SizingConfig;
use crate::trailing::TrailingConfig;

/// Data minimums and entry geometry for the pipeline facade
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_short_candles: usize,
    pub min_medium_candles: usize,
    pub min_long_candles: usize,
    /// Initial stop distance in ATRs on the short frame
    pub stop_atr_multiplier: f64,
    /// Take-profit distance in ATRs
    pub target_atr_multiplier: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_short_candles: 30,
            min_medium_candles: 50,
            min_long_candles: 50,
            stop_atr_multiplier: 2.0,
            target_atr_multiplier: 4.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub regime: RegimeConfig,
    pub consensus: ConsensusConfig,
    pub sizing: SizingConfig,
    pub trailing: TrailingConfig,
    pub pipeline: PipelineConfig,
    /// Voter names for the ensemble; empty selects the default set
    pub voters: Vec<String>,
}
