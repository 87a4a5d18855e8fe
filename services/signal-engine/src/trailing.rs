//! Dynamic trailing-stop exit engine
//!
//! One state per open position. The stop method is fixed at entry from the
//! volatility/momentum picture and never changes for the life of the trade;
//! what does change is the trail distance, scaled by momentum acceleration
//! and time held. The one hard invariant: a stop only ever moves in the
//! position's favour - up for longs, down for shorts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::consensus::Side;
use crate::frame::{to_decimal, to_f64, FeatureFrame};

/// Stop computation method, chosen once at entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    AtrTrailing,
    MomentumTrailing,
    StructureTrailing,
    /// 60% ATR / 40% momentum blend
    HybridTrailing,
}

impl fmt::Display for StopMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopMethod::AtrTrailing => "ATR_TRAILING",
            StopMethod::MomentumTrailing => "MOMENTUM_TRAILING",
            StopMethod::StructureTrailing => "STRUCTURE_TRAILING",
            StopMethod::HybridTrailing => "HYBRID_TRAILING",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub atr_multiplier_min: f64,
    pub atr_multiplier_max: f64,
    /// Momentum magnitude that counts as acceleration
    pub acceleration_threshold: f64,
    pub extend_factor: f64,
    pub tighten_factor: f64,
    /// Extra distance fraction for structure-based stops
    pub structure_buffer: f64,
    /// Stops run tighter for this many periods after entry
    pub initial_tight_periods: u32,
    /// ... and looser once a trade has been held this long
    pub mature_trade_periods: u32,
    /// Signal scores at or above this widen the initial stop
    pub high_score_threshold: f64,
    /// ... and at or below this tighten it
    pub low_score_threshold: f64,
    pub score_adjustment: f64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            atr_multiplier_min: 1.5,
            atr_multiplier_max: 3.0,
            acceleration_threshold: 0.02,
            extend_factor: 1.2,
            tighten_factor: 0.8,
            structure_buffer: 0.005,
            initial_tight_periods: 4,
            mature_trade_periods: 20,
            high_score_threshold: 0.8,
            low_score_threshold: 0.6,
            score_adjustment: 0.2,
        }
    }
}

/// Mutable exit state for one open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub best_price: Decimal,
    pub current_stop: Decimal,
    pub method: StopMethod,
    pub atr_multiplier: f64,
    pub trail_distance: Decimal,
    pub periods_held: u32,
    pub triggered: bool,
    pub trigger_reason: Option<String>,
}

/// Result of one price tick
#[derive(Debug, Clone)]
pub struct StopUpdate {
    pub position_id: Uuid,
    pub current_stop: Decimal,
    pub best_price: Decimal,
    pub stop_moved: bool,
    pub triggered: bool,
    pub trigger_reason: Option<String>,
    /// Protected gain over the maximum favourable excursion, 0 when the
    /// trade has never been in profit. Diagnostics only.
    pub efficiency: f64,
    pub unrealized_pnl_pct: f64,
}

/// Owns exit state for every open position, keyed by position id
pub struct TrailingStopEngine {
    config: TrailingConfig,
    stops: HashMap<Uuid, TrailingStopState>,
}

impl TrailingStopEngine {
    pub fn new(config: TrailingConfig) -> Self {
        Self {
            config,
            stops: HashMap::new(),
        }
    }

    /// Initialize exit state when a position opens. The method and base ATR
    /// multiplier are locked in here.
    pub fn open(
        &mut self,
        position_id: Uuid,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        entry_time: DateTime<Utc>,
        signal_score: f64,
        frame: &FeatureFrame,
    ) -> TrailingStopState {
        let atr = frame.last_row().atr;
        let close = to_f64(frame.last().close);

        // Score: better signals earn wider stops
        let score_adjustment = if signal_score >= self.config.high_score_threshold {
            1.0 + self.config.score_adjustment
        } else if signal_score <= self.config.low_score_threshold {
            1.0 - self.config.score_adjustment
        } else {
            1.0
        };

        // Volatility regime off the recent ATR path
        let volatility_adjustment = match volatility_regime(frame) {
            VolatilityRegime::High => 1.3,
            VolatilityRegime::Low => 0.8,
            VolatilityRegime::Normal => 1.0,
        };

        let atr_multiplier = (self.config.atr_multiplier_min
            * score_adjustment
            * volatility_adjustment)
            .clamp(self.config.atr_multiplier_min, self.config.atr_multiplier_max);

        let method = self.select_method(frame, atr, close);

        let trail_distance = to_decimal(atr * atr_multiplier);
        let initial_stop = match side {
            Side::Buy => entry_price - trail_distance,
            Side::Sell => entry_price + trail_distance,
        };

        let state = TrailingStopState {
            position_id,
            symbol: symbol.to_string(),
            side,
            entry_price,
            entry_time,
            best_price: entry_price,
            current_stop: initial_stop,
            method,
            atr_multiplier,
            trail_distance,
            periods_held: 0,
            triggered: false,
            trigger_reason: None,
        };

        info!(
            "Trailing stop opened for {} {}: {} at {} (mult {:.2})",
            symbol, side, method, initial_stop, atr_multiplier
        );

        self.stops.insert(position_id, state.clone());
        state
    }

    /// Process one price tick for a position. Returns `None` for unknown ids.
    /// Once triggered the state is terminal; further ticks echo the trigger
    /// without mutating anything.
    pub fn update(
        &mut self,
        position_id: Uuid,
        price: Decimal,
        frame: &FeatureFrame,
    ) -> Option<StopUpdate> {
        let config = self.config.clone();
        let state = self.stops.get_mut(&position_id)?;

        if state.triggered {
            return Some(make_update(state, price, false));
        }

        state.periods_held += 1;

        // 1. Track the best price seen in the position's favour
        match state.side {
            Side::Buy => {
                if price > state.best_price {
                    state.best_price = price;
                }
            }
            Side::Sell => {
                if price < state.best_price {
                    state.best_price = price;
                }
            }
        }

        // 2. Candidate stop from the method fixed at entry
        let (candidate, candidate_distance) = compute_candidate(&config, state, frame);

        // 3. Apply only if more favourable than the current stop
        let stop_moved = match state.side {
            Side::Buy => candidate > state.current_stop,
            Side::Sell => candidate < state.current_stop,
        };
        if stop_moved {
            debug!(
                "Stop for {} moved {} -> {}",
                state.symbol, state.current_stop, candidate
            );
            state.current_stop = candidate;
            state.trail_distance = candidate_distance;
        }

        // 4. Trigger check against the (possibly updated) stop
        let triggered = match state.side {
            Side::Buy => price <= state.current_stop,
            Side::Sell => price >= state.current_stop,
        };
        if triggered {
            state.triggered = true;
            state.trigger_reason = Some(format!(
                "price {} breached {} stop {}",
                price, state.method, state.current_stop
            ));
            info!(
                "Trailing stop triggered for {} after {} periods: {}",
                state.symbol,
                state.periods_held,
                state.trigger_reason.as_deref().unwrap_or("")
            );
        }

        Some(make_update(state, price, stop_moved))
    }

    pub fn get(&self, position_id: Uuid) -> Option<&TrailingStopState> {
        self.stops.get(&position_id)
    }

    /// Drop a position's exit state (closed or archived externally)
    pub fn close(&mut self, position_id: Uuid) -> Option<TrailingStopState> {
        self.stops.remove(&position_id)
    }

    pub fn open_count(&self) -> usize {
        self.stops.len()
    }

    /// Clone the state map for persistence
    pub fn snapshot(&self) -> HashMap<Uuid, TrailingStopState> {
        self.stops.clone()
    }

    /// Rehydrate state saved by a previous run; stop levels carry over so
    /// the monotonic-tightening invariant spans restarts
    pub fn restore(&mut self, stops: HashMap<Uuid, TrailingStopState>) {
        self.stops = stops;
    }

    fn select_method(&self, frame: &FeatureFrame, atr: f64, close: f64) -> StopMethod {
        let volatility = if close > 0.0 { atr / close } else { 0.0 };
        let momentum = frame.momentum(10).abs();

        if volatility > 0.05 {
            if momentum > 0.03 {
                StopMethod::MomentumTrailing
            } else {
                StopMethod::AtrTrailing
            }
        } else if volatility < 0.02 {
            StopMethod::StructureTrailing
        } else {
            StopMethod::HybridTrailing
        }
    }
}

enum VolatilityRegime {
    High,
    Normal,
    Low,
}

fn volatility_regime(frame: &FeatureFrame) -> VolatilityRegime {
    let n = frame.len();
    let start = n.saturating_sub(20);
    let mean_atr: f64 = (start..n).map(|i| frame.row(i).atr).sum::<f64>() / (n - start) as f64;
    let current = frame.last_row().atr;
    if mean_atr <= 0.0 {
        return VolatilityRegime::Normal;
    }
    if current > mean_atr * 1.5 {
        VolatilityRegime::High
    } else if current < mean_atr * 0.7 {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Normal
    }
}

/// Candidate stop and its distance for the state's fixed method
fn compute_candidate(
    config: &TrailingConfig,
    state: &TrailingStopState,
    frame: &FeatureFrame,
) -> (Decimal, Decimal) {
    match state.method {
        StopMethod::AtrTrailing => atr_candidate(config, state, frame),
        StopMethod::MomentumTrailing => momentum_candidate(config, state, frame),
        StopMethod::StructureTrailing => structure_candidate(config, state, frame),
        StopMethod::HybridTrailing => {
            let (atr_stop, _) = atr_candidate(config, state, frame);
            let (momentum_stop, _) = momentum_candidate(config, state, frame);
            let blended = atr_stop * to_decimal(0.6) + momentum_stop * to_decimal(0.4);
            let distance = (blended - state.best_price).abs();
            (blended, distance)
        }
    }
}

fn atr_candidate(
    config: &TrailingConfig,
    state: &TrailingStopState,
    frame: &FeatureFrame,
) -> (Decimal, Decimal) {
    let atr = frame.last_row().atr;

    let momentum_adjustment = if frame.momentum(10).abs() > config.acceleration_threshold {
        config.extend_factor
    } else {
        1.0
    };
    let time_adjustment = time_adjustment(config, state.periods_held);

    let distance = to_decimal(atr * state.atr_multiplier * momentum_adjustment * time_adjustment);
    (offset_from_best(state, distance), distance)
}

fn momentum_candidate(
    config: &TrailingConfig,
    state: &TrailingStopState,
    frame: &FeatureFrame,
) -> (Decimal, Decimal) {
    let momentum = frame.momentum(10);
    let momentum_avg = trailing_momentum_avg(frame, 10, 5);

    // Accelerating momentum earns room, fading momentum gives it back
    let factor = if momentum > momentum_avg {
        config.extend_factor
    } else {
        config.tighten_factor
    };

    let distance = state.trail_distance * to_decimal(factor);
    (offset_from_best(state, distance), distance)
}

fn structure_candidate(
    config: &TrailingConfig,
    state: &TrailingStopState,
    frame: &FeatureFrame,
) -> (Decimal, Decimal) {
    let atr = frame.last_row().atr;
    let distance =
        to_decimal(atr * state.atr_multiplier * (1.0 + config.structure_buffer));
    (offset_from_best(state, distance), distance)
}

fn offset_from_best(state: &TrailingStopState, distance: Decimal) -> Decimal {
    match state.side {
        Side::Buy => state.best_price - distance,
        Side::Sell => state.best_price + distance,
    }
}

fn time_adjustment(config: &TrailingConfig, periods_held: u32) -> f64 {
    if periods_held <= config.initial_tight_periods {
        0.9
    } else if periods_held >= config.mature_trade_periods {
        1.1
    } else {
        1.0
    }
}

/// Mean of the `period`-candle momentum over the last `window` offsets
fn trailing_momentum_avg(frame: &FeatureFrame, period: usize, window: usize) -> f64 {
    let n = frame.len();
    if n < period + window {
        return frame.momentum(period);
    }
    let mut sum = 0.0;
    for offset in 0..window {
        let end = n - offset;
        let now = frame.close_f64(end - 1);
        let then = frame.close_f64(end - 1 - period);
        if then != 0.0 {
            sum += (now - then) / then;
        }
    }
    sum / window as f64
}

fn make_update(state: &TrailingStopState, price: Decimal, stop_moved: bool) -> StopUpdate {
    StopUpdate {
        position_id: state.position_id,
        current_stop: state.current_stop,
        best_price: state.best_price,
        stop_moved,
        triggered: state.triggered,
        trigger_reason: state.trigger_reason.clone(),
        efficiency: stop_efficiency(state),
        unrealized_pnl_pct: unrealized_pnl_pct(state, price),
    }
}

/// Protected gain over maximum gain, clamped to [0, 1]
fn stop_efficiency(state: &TrailingStopState) -> f64 {
    let entry = to_f64(state.entry_price);
    let best = to_f64(state.best_price);
    let stop = to_f64(state.current_stop);

    let (max_gain, protected_gain) = match state.side {
        Side::Buy => (best - entry, stop - entry),
        Side::Sell => (entry - best, entry - stop),
    };

    if max_gain <= 0.0 {
        return 0.0;
    }
    (protected_gain / max_gain).clamp(0.0, 1.0)
}

fn unrealized_pnl_pct(state: &TrailingStopState, price: Decimal) -> f64 {
    let entry = to_f64(state.entry_price);
    let current = to_f64(price);
    if entry <= 0.0 || current <= 0.0 {
        return 0.0;
    }
    match state.side {
        Side::Buy => (current / entry - 1.0) * 100.0,
        Side::Sell => (entry / current - 1.0) * 100.0,
    }
}
