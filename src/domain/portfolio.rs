//! Cash, open position, trade ledger and equity curve for one run.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::costs::CostBreakdown;
use super::position::{ExitReason, Fill, Position, PositionState, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub state: PositionState,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub bars_in_market: usize,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            state: PositionState::Flat,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            bars_in_market: 0,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.state.position()
    }

    pub fn is_flat(&self) -> bool {
        self.state.is_flat()
    }

    /// cash + notional + unrealized P&L at `price`.
    pub fn equity(&self, price: f64) -> f64 {
        match self.position() {
            Some(pos) => self.cash + pos.notional() + pos.unrealized_pnl(price),
            None => self.cash,
        }
    }

    /// Commit cash for `position` and hold it. No-op if already holding.
    pub fn open(&mut self, position: Position) -> bool {
        if !self.is_flat() {
            return false;
        }
        self.cash -= position.cost_basis();
        let state = std::mem::take(&mut self.state);
        self.state = state.enter(position).state;
        true
    }

    /// Close the open position, returning the recorded trade.
    pub fn close(
        &mut self,
        fill: Fill,
        exit_costs: CostBreakdown,
        reason: ExitReason,
    ) -> Option<&Trade> {
        let state = std::mem::take(&mut self.state);
        let transition = state.exit(fill, exit_costs, reason);
        self.state = transition.state;
        let trade = transition.closed?;
        self.cash += trade.size * trade.entry_price + trade.gross_pnl - exit_costs.total();
        self.trades.push(trade);
        self.trades.last()
    }

    pub fn record_equity(&mut self, timestamp: NaiveDateTime, equity: f64) {
        if !self.is_flat() {
            self.bars_in_market += 1;
        }
        self.equity_curve.push(EquityPoint { timestamp, equity });
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.cash)
    }
}
