//! Paper portfolio - cash, positions and realized stats
//!
//! Paper accounting is symmetric for longs and shorts: opening reserves the
//! position's capital, closing releases it plus the signed PnL. Closed-trade
//! stats feed the engine's Kelly estimate once there is enough history to
//! mean anything.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use signal_engine::{
    AccountSnapshot, AssetCategory, OpenExposure, PositionIntent, Side,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Closed trades needed before the portfolio trusts its own stats
const MIN_TRADES_FOR_STATS: u32 = 5;

/// A single open paper position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperPosition {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub capital: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl PaperPosition {
    pub fn unrealized_pnl(&self) -> Decimal {
        match self.side {
            Side::Buy => (self.current_price - self.entry_price) * self.quantity,
            Side::Sell => (self.entry_price - self.current_price) * self.quantity,
        }
    }
}

/// Snapshot for reporting
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub total_equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub open_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    cash: Decimal,
    positions: HashMap<Uuid, PaperPosition>,
    realized_pnl: Decimal,
    wins: u32,
    losses: u32,
    win_return_sum: f64,
    loss_return_sum: f64,
}

impl Portfolio {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: starting_cash,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            wins: 0,
            losses: 0,
            win_return_sum: 0.0,
            loss_return_sum: 0.0,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self, id: Uuid) -> Option<&PaperPosition> {
        self.positions.get(&id)
    }

    pub fn position_for_symbol(&self, symbol: &str) -> Option<&PaperPosition> {
        self.positions.values().find(|p| p.symbol == symbol)
    }

    pub fn closed_trades(&self) -> u32 {
        self.wins + self.losses
    }

    /// Reserve capital and open a paper position at the fill price
    pub fn open_position(
        &mut self,
        intent: &PositionIntent,
        fill_price: Decimal,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Uuid> {
        if intent.position_capital > self.cash {
            return Err(anyhow!(
                "cannot open {}: capital {} exceeds cash {}",
                intent.symbol,
                intent.position_capital,
                self.cash
            ));
        }
        if fill_price <= Decimal::ZERO {
            return Err(anyhow!("invalid fill price {}", fill_price));
        }

        let quantity = intent.position_capital / fill_price;
        let position = PaperPosition {
            id: intent.id,
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity,
            entry_price: fill_price,
            current_price: fill_price,
            capital: intent.position_capital,
            opened_at: now,
        };

        self.cash -= intent.position_capital;
        self.positions.insert(position.id, position);

        info!(
            "Opened {} {} | qty {} at {} | cash left {}",
            intent.side, intent.symbol, quantity, fill_price, self.cash
        );
        Ok(intent.id)
    }

    /// Close a position at the exit price, returning the realized PnL
    pub fn close_position(&mut self, id: Uuid, exit_price: Decimal) -> Option<Decimal> {
        let mut position = self.positions.remove(&id)?;
        position.current_price = exit_price;
        let pnl = position.unrealized_pnl();

        self.cash += position.capital + pnl;
        self.realized_pnl += pnl;

        let return_fraction = if position.capital > Decimal::ZERO {
            (pnl / position.capital).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        if pnl >= Decimal::ZERO {
            self.wins += 1;
            self.win_return_sum += return_fraction;
        } else {
            self.losses += 1;
            self.loss_return_sum += return_fraction.abs();
        }

        info!(
            "Closed {} {} at {} | PnL {} | realized total {}",
            position.side, position.symbol, exit_price, pnl, self.realized_pnl
        );
        Some(pnl)
    }

    /// Refresh the mark on every open position
    pub fn mark_to_market(&mut self, prices: &HashMap<String, Decimal>) {
        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(&position.symbol) {
                position.current_price = *price;
            }
        }
    }

    pub fn snapshot(&self) -> PortfolioSnapshot {
        let unrealized: Decimal = self.positions.values().map(|p| p.unrealized_pnl()).sum();
        let reserved: Decimal = self.positions.values().map(|p| p.capital).sum();
        PortfolioSnapshot {
            cash: self.cash,
            total_equity: self.cash + reserved + unrealized,
            unrealized_pnl: unrealized,
            realized_pnl: self.realized_pnl,
            open_positions: self.positions.len(),
        }
    }

    /// Account view the risk gate sizes against
    pub fn account_snapshot(&self) -> AccountSnapshot {
        let open_positions = self
            .positions
            .values()
            .map(|p| OpenExposure {
                symbol: p.symbol.clone(),
                category: AssetCategory::for_symbol(&p.symbol),
                value: p.capital,
            })
            .collect();

        // Neutral priors until enough trades have closed
        let mut snapshot = AccountSnapshot::flat(self.cash);
        snapshot.open_positions = open_positions;

        let total = self.closed_trades();
        if total >= MIN_TRADES_FOR_STATS {
            snapshot.win_rate = self.wins as f64 / total as f64;
            if self.wins > 0 {
                snapshot.avg_win = self.win_return_sum / self.wins as f64;
            }
            if self.losses > 0 {
                snapshot.avg_loss = self.loss_return_sum / self.losses as f64;
            }
            debug!(
                "Using realized stats: win rate {:.2}, avg win {:.3}, avg loss {:.3}",
                snapshot.win_rate, snapshot.avg_win, snapshot.avg_loss
            );
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::prelude::FromPrimitive;

    fn dec(value: f64) -> Decimal {
        Decimal::from_f64(value).unwrap()
    }

    fn intent(symbol: &str, side: Side, capital: f64, entry: f64) -> PositionIntent {
        PositionIntent {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            entry_price: dec(entry),
            position_capital: dec(capital),
            stop_loss: dec(entry * 0.95),
            take_profit: dec(entry * 1.10),
            risk_pct: 0.01,
            consensus_score: 0.8,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn long_round_trip_books_pnl() {
        let mut portfolio = Portfolio::new(dec(10_000.0));
        let buy = intent("ETH-USD", Side::Buy, 1_000.0, 2_000.0);
        let id = portfolio.open_position(&buy, dec(2_000.0), now()).unwrap();

        assert_eq!(portfolio.cash(), dec(9_000.0));

        // 10% move up on a 1000 position: +100
        let pnl = portfolio.close_position(id, dec(2_200.0)).unwrap();
        assert_eq!(pnl, dec(100.0));
        assert_eq!(portfolio.cash(), dec(10_100.0));
        assert_eq!(portfolio.closed_trades(), 1);
    }

    #[test]
    fn short_profits_when_price_falls() {
        let mut portfolio = Portfolio::new(dec(10_000.0));
        let sell = intent("ETH-USD", Side::Sell, 1_000.0, 2_000.0);
        let id = portfolio.open_position(&sell, dec(2_000.0), now()).unwrap();

        let pnl = portfolio.close_position(id, dec(1_800.0)).unwrap();
        assert_eq!(pnl, dec(100.0));
    }

    #[test]
    fn cannot_open_beyond_cash() {
        let mut portfolio = Portfolio::new(dec(500.0));
        let buy = intent("ETH-USD", Side::Buy, 1_000.0, 2_000.0);
        assert!(portfolio.open_position(&buy, dec(2_000.0), now()).is_err());
    }

    #[test]
    fn equity_is_cash_plus_positions() {
        let mut portfolio = Portfolio::new(dec(10_000.0));
        let buy = intent("ETH-USD", Side::Buy, 2_000.0, 2_000.0);
        portfolio.open_position(&buy, dec(2_000.0), now()).unwrap();

        let mut prices = HashMap::new();
        prices.insert("ETH-USD".to_string(), dec(2_100.0));
        portfolio.mark_to_market(&prices);

        let snapshot = portfolio.snapshot();
        assert_eq!(snapshot.unrealized_pnl, dec(100.0));
        assert_eq!(snapshot.total_equity, dec(10_100.0));
        assert_eq!(snapshot.open_positions, 1);
    }

    #[test]
    fn stats_stay_neutral_until_enough_trades() {
        let mut portfolio = Portfolio::new(dec(10_000.0));
        for _ in 0..3 {
            let buy = intent("ETH-USD", Side::Buy, 1_000.0, 2_000.0);
            let id = portfolio.open_position(&buy, dec(2_000.0), now()).unwrap();
            portfolio.close_position(id, dec(2_100.0));
        }
        // 3 < MIN_TRADES_FOR_STATS: keep the neutral priors
        let account = portfolio.account_snapshot();
        assert_eq!(account.win_rate, 0.5);

        for _ in 0..2 {
            let buy = intent("ETH-USD", Side::Buy, 1_000.0, 2_000.0);
            let id = portfolio.open_position(&buy, dec(2_000.0), now()).unwrap();
            portfolio.close_position(id, dec(2_100.0));
        }
        let account = portfolio.account_snapshot();
        assert_eq!(account.win_rate, 1.0);
        assert!(account.avg_win > 0.0);
    }

    #[test]
    fn serde_round_trip() {
        let mut portfolio = Portfolio::new(dec(10_000.0));
        let buy = intent("ETH-USD", Side::Buy, 1_000.0, 2_000.0);
        portfolio.open_position(&buy, dec(2_000.0), now()).unwrap();

        let json = serde_json::to_string(&portfolio).unwrap();
        let restored: Portfolio = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.cash(), portfolio.cash());
        assert!(restored.position_for_symbol("ETH-USD").is_some());
    }
}
