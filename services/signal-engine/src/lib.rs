//! Signal Engine
//!
//! Adaptive signal and risk management pipeline for crypto candle data:
//! 1. Classifies the market regime from multi-horizon candle frames
//! 2. Collects opinions from a regime-weighted strategy ensemble
//! 3. Validates consensus with per-symbol lockout state
//! 4. Sizes and risk-checks the resulting order intent
//! 5. Manages trailing-stop exits tick by tick
//!
//! The engine is synchronous and deterministic: data arrives pre-fetched as
//! `FeatureFrame`s, time comes from an injected `Clock`, and every expected
//! rejection is an explicit no-decision value rather than an error.

pub mod clock;
pub mod config;
pub mod consensus;
pub mod ensemble;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod regime;
pub mod sizing;
pub mod trailing;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, PipelineConfig};
pub use consensus::{
    Bias, BiasReading, ConsensusConfig, ConsensusValidator, RejectReason, Side, SignalState,
    ValidatedSignal, Verdict,
};
pub use ensemble::{Direction, Opinion, StrategyEnsemble, Voter};
pub use error::EngineError;
pub use frame::{Candle, FeatureFrame, FrameSet, IndicatorRow};
pub use pipeline::{Decision, PositionIntent, SignalPipeline};
pub use regime::{Regime, RegimeAssessment, RegimeClassifier, RegimeConfig, RegimeScores};
pub use sizing::{
    AccountSnapshot, AssetCategory, LiquidityTier, OpenExposure, RiskAssessment, RiskGate,
    RiskMetrics, SizingConfig, VolumeAnalysis, VolumeAnalyzer,
};
pub use trailing::{
    StopMethod, StopUpdate, TrailingConfig, TrailingStopEngine, TrailingStopState,
};
