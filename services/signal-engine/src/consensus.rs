//! Consensus validation with per-symbol lockout state
//!
//! Aggregates the ensemble's opinions into either a `ValidatedSignal` or an
//! explicit rejection. Rejections are the steady state here, not failures:
//! contradictory votes, thin consensus, an active lockout or cooldown, and
//! trend flips without strong backing all come back as a `Verdict::Rejected`
//! carrying a human-readable reason.
//!
//! Per-symbol state is `None -> locked buy/sell -> None`, where the return to
//! `None` is purely a timestamp comparison against the injected clock - no
//! timers, no explicit expiry transitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::ensemble::{Direction, Opinion};

/// Trade side of an accepted signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Immutable record of an accepted consensus decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedSignal {
    pub symbol: String,
    pub side: Side,
    /// Fraction of all voters (HOLD included) behind the winning side
    pub consensus_score: f64,
    pub supporting_voters: Vec<String>,
    pub opposing_voters: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-symbol signal state owned by the validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalState {
    pub active: Side,
    pub issued_at: DateTime<Utc>,
    /// Bounded history of accepted signals, oldest first
    pub history: VecDeque<ValidatedSignal>,
}

/// Why a cycle produced no signal. Expected, frequent, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    Contradiction {
        buy_fraction: f64,
        sell_fraction: f64,
    },
    NoConsensus {
        buy_fraction: f64,
        sell_fraction: f64,
        required: f64,
    },
    OppositeLocked {
        active: Side,
        remaining_secs: i64,
    },
    CooldownActive {
        active: Side,
        remaining_secs: i64,
    },
    FlipNeedsStrongerConsensus {
        score: f64,
        required: f64,
    },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Contradiction {
                buy_fraction,
                sell_fraction,
            } => write!(
                f,
                "contradictory votes: {:.0}% buy vs {:.0}% sell",
                buy_fraction * 100.0,
                sell_fraction * 100.0
            ),
            RejectReason::NoConsensus {
                buy_fraction,
                sell_fraction,
                required,
            } => write!(
                f,
                "consensus not reached: best {:.0}% (buy {:.0}%, sell {:.0}%), need {:.0}%",
                buy_fraction.max(*sell_fraction) * 100.0,
                buy_fraction * 100.0,
                sell_fraction * 100.0,
                required * 100.0
            ),
            RejectReason::OppositeLocked {
                active,
                remaining_secs,
            } => write!(
                f,
                "opposite signal blocked: {} lock active for {}s more",
                active, remaining_secs
            ),
            RejectReason::CooldownActive {
                active,
                remaining_secs,
            } => write!(
                f,
                "duplicate {} suppressed: cooldown active for {}s more",
                active, remaining_secs
            ),
            RejectReason::FlipNeedsStrongerConsensus { score, required } => write!(
                f,
                "trend flip needs {:.0}% consensus, got {:.0}%",
                required * 100.0,
                score * 100.0
            ),
        }
    }
}

/// Outcome of one validation cycle
#[derive(Debug, Clone)]
pub enum Verdict {
    Accepted(ValidatedSignal),
    Rejected(RejectReason),
}

/// Market bias read off the bounded history, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy)]
pub struct BiasReading {
    pub bias: Bias,
    pub strength: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum winning fraction of all voters
    pub consensus_threshold: f64,
    /// Both sides above this fraction is a contradiction
    pub contradiction_threshold: f64,
    /// Seconds an opposite-direction signal stays blocked
    pub lockout_secs: i64,
    /// Seconds a same-direction repeat stays suppressed
    pub cooldown_secs: i64,
    /// Consensus needed to flip against 3 unanimous prior signals
    pub flip_threshold: f64,
    pub history_cap: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.65,
            contradiction_threshold: 0.3,
            lockout_secs: 900,
            cooldown_secs: 300,
            flip_threshold: 0.8,
            history_cap: 10,
        }
    }
}

/// Aggregates opinions and owns the per-symbol lockout state machine
pub struct ConsensusValidator {
    config: ConsensusConfig,
    clock: Arc<dyn Clock>,
    states: HashMap<String, SignalState>,
}

impl ConsensusValidator {
    pub fn new(config: ConsensusConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            states: HashMap::new(),
        }
    }

    /// Run the full guard chain over a fresh opinion set
    pub fn validate(&mut self, symbol: &str, opinions: &[Opinion]) -> Verdict {
        let total = opinions.len();
        if total == 0 {
            return Verdict::Rejected(RejectReason::NoConsensus {
                buy_fraction: 0.0,
                sell_fraction: 0.0,
                required: self.config.consensus_threshold,
            });
        }

        let buyers: Vec<&Opinion> = opinions
            .iter()
            .filter(|o| o.direction == Direction::Buy)
            .collect();
        let sellers: Vec<&Opinion> = opinions
            .iter()
            .filter(|o| o.direction == Direction::Sell)
            .collect();

        // Denominator includes HOLD votes
        let buy_fraction = buyers.len() as f64 / total as f64;
        let sell_fraction = sellers.len() as f64 / total as f64;

        debug!(
            "Vote for {}: buy {}/{}, sell {}/{}",
            symbol,
            buyers.len(),
            total,
            sellers.len(),
            total
        );

        // Contradiction guard runs before everything else
        if buy_fraction > self.config.contradiction_threshold
            && sell_fraction > self.config.contradiction_threshold
        {
            return Verdict::Rejected(RejectReason::Contradiction {
                buy_fraction,
                sell_fraction,
            });
        }

        let (side, fraction, supporting, opposing) = if buy_fraction >= sell_fraction {
            (Side::Buy, buy_fraction, &buyers, &sellers)
        } else {
            (Side::Sell, sell_fraction, &sellers, &buyers)
        };

        if fraction < self.config.consensus_threshold {
            return Verdict::Rejected(RejectReason::NoConsensus {
                buy_fraction,
                sell_fraction,
                required: self.config.consensus_threshold,
            });
        }

        let now = self.clock.now();

        if let Some(state) = self.states.get(symbol) {
            let elapsed = now - state.issued_at;

            if state.active == side.opposite() {
                let lockout = Duration::seconds(self.config.lockout_secs);
                if elapsed < lockout {
                    return Verdict::Rejected(RejectReason::OppositeLocked {
                        active: state.active,
                        remaining_secs: (lockout - elapsed).num_seconds(),
                    });
                }
            } else {
                let cooldown = Duration::seconds(self.config.cooldown_secs);
                if elapsed < cooldown {
                    return Verdict::Rejected(RejectReason::CooldownActive {
                        active: state.active,
                        remaining_secs: (cooldown - elapsed).num_seconds(),
                    });
                }
            }

            // Flipping against a unanimous run takes extra conviction
            if state.history.len() >= 3 {
                let last3: Vec<Side> = state
                    .history
                    .iter()
                    .rev()
                    .take(3)
                    .map(|s| s.side)
                    .collect();
                let unanimous = last3.iter().all(|s| *s == last3[0]);
                if unanimous && last3[0] != side && fraction < self.config.flip_threshold {
                    return Verdict::Rejected(RejectReason::FlipNeedsStrongerConsensus {
                        score: fraction,
                        required: self.config.flip_threshold,
                    });
                }
            }
        }

        let signal = ValidatedSignal {
            symbol: symbol.to_string(),
            side,
            consensus_score: fraction,
            supporting_voters: supporting.iter().map(|o| o.voter_id.clone()).collect(),
            opposing_voters: opposing.iter().map(|o| o.voter_id.clone()).collect(),
            timestamp: now,
        };

        let state = self
            .states
            .entry(symbol.to_string())
            .or_insert_with(|| SignalState {
                active: side,
                issued_at: now,
                history: VecDeque::new(),
            });
        state.active = side;
        state.issued_at = now;
        state.history.push_back(signal.clone());
        while state.history.len() > self.config.history_cap {
            state.history.pop_front();
        }

        info!(
            "Signal validated: {} {} with {:.0}% consensus ({} for, {} against)",
            signal.symbol,
            signal.side,
            signal.consensus_score * 100.0,
            signal.supporting_voters.len(),
            signal.opposing_voters.len()
        );

        Verdict::Accepted(signal)
    }

    /// Directional bias over the bounded history (diagnostics)
    pub fn current_bias(&self, symbol: &str) -> BiasReading {
        let Some(state) = self.states.get(symbol) else {
            return BiasReading {
                bias: Bias::Neutral,
                strength: 0.0,
            };
        };
        if state.history.is_empty() {
            return BiasReading {
                bias: Bias::Neutral,
                strength: 0.0,
            };
        }

        let buys = state.history.iter().filter(|s| s.side == Side::Buy).count();
        let sells = state.history.len() - buys;
        let total = state.history.len() as f64;

        if buys as f64 > sells as f64 * 1.5 {
            BiasReading {
                bias: Bias::Bullish,
                strength: buys as f64 / total,
            }
        } else if sells as f64 > buys as f64 * 1.5 {
            BiasReading {
                bias: Bias::Bearish,
                strength: sells as f64 / total,
            }
        } else {
            BiasReading {
                bias: Bias::Neutral,
                strength: 0.5,
            }
        }
    }

    pub fn state(&self, symbol: &str) -> Option<&SignalState> {
        self.states.get(symbol)
    }

    /// Clone the state map for persistence
    pub fn snapshot(&self) -> HashMap<String, SignalState> {
        self.states.clone()
    }

    /// Rehydrate state saved by a previous run; timestamps must be intact so
    /// the lockout guards keep working across restarts
    pub fn restore(&mut self, states: HashMap<String, SignalState>) {
        self.states = states;
    }
}
