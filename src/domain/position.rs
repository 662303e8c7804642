//! Position state machine and trade records.
//!
//! The simulator holds exactly one [`PositionState`]. Transitions are pure:
//! they consume the old state and return the new one together with the
//! [`Trade`] closed on the way, if any.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::costs::CostBreakdown;
use crate::domain::ohlcv::Bar;
use crate::domain::strategy::{Direction, ExitRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    Reversal,
    StopLoss,
    TakeProfit,
    TrailingStop,
    TimeExit,
    DataGap,
    EndOfData,
}

/// One executed fill at a market price, before slippage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub timestamp: NaiveDateTime,
    pub bar_index: usize,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    /// Market price at entry; slippage is carried in `entry_costs`.
    pub entry_price: f64,
    pub size: f64,
    pub entry_timestamp: NaiveDateTime,
    pub entry_index: usize,
    pub entry_costs: CostBreakdown,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_pct: Option<f64>,
    /// Most favourable price seen through the previous bar.
    pub extreme: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub direction: Direction,
    pub size: f64,
    pub entry_timestamp: NaiveDateTime,
    pub exit_timestamp: NaiveDateTime,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_price: f64,
    pub exit_price: f64,
    pub gross_pnl: f64,
    pub commission: f64,
    pub slippage: f64,
    pub impact: f64,
    pub net_pnl: f64,
    pub holding_bars: usize,
    pub holding_secs: i64,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn total_costs(&self) -> f64 {
        self.commission + self.slippage + self.impact
    }
}

impl Position {
    pub fn open(
        direction: Direction,
        fill: Fill,
        size: f64,
        entry_costs: CostBreakdown,
        exits: &ExitRules,
    ) -> Self {
        let sign = direction.sign();
        let price = fill.price;
        Position {
            direction,
            entry_price: price,
            size,
            entry_timestamp: fill.timestamp,
            entry_index: fill.bar_index,
            entry_costs,
            stop_loss: exits.stop_loss_pct.map(|p| price * (1.0 - sign * p / 100.0)),
            take_profit: exits.take_profit_pct.map(|p| price * (1.0 + sign * p / 100.0)),
            trailing_pct: exits.trailing_pct,
            extreme: price,
        }
    }

    pub fn notional(&self) -> f64 {
        self.size * self.entry_price
    }

    /// Cash committed at entry: notional plus entry costs.
    pub fn cost_basis(&self) -> f64 {
        self.notional() + self.entry_costs.total()
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.direction.sign() * self.size * (price - self.entry_price)
    }

    pub fn trailing_stop(&self) -> Option<f64> {
        let sign = self.direction.sign();
        self.trailing_pct
            .map(|p| self.extreme * (1.0 - sign * p / 100.0))
    }

    /// Extend the favourable extreme with a completed bar.
    pub fn track(&mut self, bar: &Bar) {
        self.extreme = match self.direction {
            Direction::Long => self.extreme.max(bar.high),
            Direction::Short => self.extreme.min(bar.low),
        };
    }

    /// Protective exit hit during `bar`, if any, with its market fill price.
    ///
    /// Time exits fill at the open. An adverse level is hit when the bar's
    /// range reaches it; a bar that opens beyond the level fills at the open.
    /// Stop-loss is checked before the trailing stop, and both before
    /// take-profit, so a bar that breaches stop and target exits at the stop.
    pub fn protective_exit(
        &self,
        bar: &Bar,
        bar_index: usize,
        max_holding_bars: Option<usize>,
    ) -> Option<(ExitReason, f64)> {
        if let Some(max) = max_holding_bars {
            if bar_index.saturating_sub(self.entry_index) >= max {
                return Some((ExitReason::TimeExit, bar.open));
            }
        }

        let long = self.direction == Direction::Long;
        let adverse_hit = |level: f64| {
            if long {
                (bar.low <= level).then(|| bar.open.min(level))
            } else {
                (bar.high >= level).then(|| bar.open.max(level))
            }
        };
        let favourable_hit = |level: f64| {
            if long {
                (bar.high >= level).then(|| bar.open.max(level))
            } else {
                (bar.low <= level).then(|| bar.open.min(level))
            }
        };

        if let Some(price) = self.stop_loss.and_then(adverse_hit) {
            return Some((ExitReason::StopLoss, price));
        }
        if let Some(price) = self.trailing_stop().and_then(adverse_hit) {
            return Some((ExitReason::TrailingStop, price));
        }
        if let Some(price) = self.take_profit.and_then(favourable_hit) {
            return Some((ExitReason::TakeProfit, price));
        }
        None
    }

    /// Close at `fill` and build the trade record.
    pub fn close(self, fill: Fill, exit_costs: CostBreakdown, reason: ExitReason) -> Trade {
        let gross_pnl = self.unrealized_pnl(fill.price);
        let costs = self.entry_costs + exit_costs;
        Trade {
            direction: self.direction,
            size: self.size,
            entry_timestamp: self.entry_timestamp,
            exit_timestamp: fill.timestamp,
            entry_index: self.entry_index,
            exit_index: fill.bar_index,
            entry_price: self.entry_price,
            exit_price: fill.price,
            gross_pnl,
            commission: costs.commission,
            slippage: costs.slippage,
            impact: costs.impact,
            net_pnl: gross_pnl - costs.total(),
            holding_bars: fill.bar_index.saturating_sub(self.entry_index),
            holding_secs: (fill.timestamp - self.entry_timestamp).num_seconds(),
            exit_reason: reason,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum PositionState {
    #[default]
    Flat,
    Long(Position),
    Short(Position),
}

/// Result of a state transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: PositionState,
    pub closed: Option<Trade>,
}

impl PositionState {
    pub fn position(&self) -> Option<&Position> {
        match self {
            PositionState::Flat => None,
            PositionState::Long(p) | PositionState::Short(p) => Some(p),
        }
    }

    pub fn position_mut(&mut self) -> Option<&mut Position> {
        match self {
            PositionState::Flat => None,
            PositionState::Long(p) | PositionState::Short(p) => Some(p),
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        self.position().map(|p| p.direction)
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }

    /// Open `position` from flat. Opening over an existing position leaves
    /// the state unchanged.
    pub fn enter(self, position: Position) -> Transition {
        let state = match self {
            PositionState::Flat => match position.direction {
                Direction::Long => PositionState::Long(position),
                Direction::Short => PositionState::Short(position),
            },
            held => held,
        };
        Transition { state, closed: None }
    }

    /// Close the open position, if any.
    pub fn exit(self, fill: Fill, exit_costs: CostBreakdown, reason: ExitReason) -> Transition {
        match self {
            PositionState::Flat => Transition {
                state: PositionState::Flat,
                closed: None,
            },
            PositionState::Long(p) | PositionState::Short(p) => Transition {
                state: PositionState::Flat,
                closed: Some(p.close(fill, exit_costs, reason)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn fill(day: u32, price: f64) -> Fill {
        Fill {
            timestamp: ts(day),
            bar_index: day as usize,
            price,
        }
    }

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: ts(5),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn exits(sl: Option<f64>, tp: Option<f64>, trail: Option<f64>) -> ExitRules {
        ExitRules {
            stop_loss_pct: sl,
            take_profit_pct: tp,
            trailing_pct: trail,
            max_holding_bars: None,
        }
    }

    fn long(exit_rules: &ExitRules) -> Position {
        Position::open(
            Direction::Long,
            fill(1, 100.0),
            10.0,
            CostBreakdown::default(),
            exit_rules,
        )
    }

    #[test]
    fn levels_follow_direction() {
        let rules = exits(Some(5.0), Some(10.0), None);
        let p = long(&rules);
        assert!((p.stop_loss.unwrap() - 95.0).abs() < 1e-9);
        assert!((p.take_profit.unwrap() - 110.0).abs() < 1e-9);

        let s = Position::open(
            Direction::Short,
            fill(1, 100.0),
            10.0,
            CostBreakdown::default(),
            &rules,
        );
        assert!((s.stop_loss.unwrap() - 105.0).abs() < 1e-9);
        assert!((s.take_profit.unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn stop_triggers_intrabar() {
        let p = long(&exits(Some(5.0), None, None));
        let (reason, price) = p
            .protective_exit(&bar(99.0, 101.0, 94.0, 100.0), 2, None)
            .unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
        assert!((price - 95.0).abs() < 1e-9);
        assert_eq!(p.protective_exit(&bar(99.0, 101.0, 96.0, 100.0), 2, None), None);
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let p = long(&exits(Some(5.0), None, None));
        assert_eq!(
            p.protective_exit(&bar(90.0, 92.0, 88.0, 91.0), 2, None),
            Some((ExitReason::StopLoss, 90.0))
        );
    }

    #[test]
    fn stop_wins_when_both_levels_breached() {
        let p = long(&exits(Some(5.0), Some(5.0), None));
        let result = p.protective_exit(&bar(100.0, 106.0, 94.0, 100.0), 2, None);
        assert_eq!(result.map(|r| r.0), Some(ExitReason::StopLoss));
    }

    #[test]
    fn take_profit_for_short() {
        let s = Position::open(
            Direction::Short,
            fill(1, 100.0),
            10.0,
            CostBreakdown::default(),
            &exits(None, Some(10.0), None),
        );
        let (reason, price) = s
            .protective_exit(&bar(95.0, 96.0, 89.0, 92.0), 2, None)
            .unwrap();
        assert_eq!(reason, ExitReason::TakeProfit);
        assert!((price - 90.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_stop_uses_prior_extreme() {
        let mut p = long(&exits(None, None, Some(10.0)));
        p.track(&bar(100.0, 120.0, 99.0, 118.0));
        assert!((p.trailing_stop().unwrap() - 108.0).abs() < 1e-9);
        let (reason, price) = p
            .protective_exit(&bar(115.0, 116.0, 107.0, 110.0), 3, None)
            .unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
        assert!((price - 108.0).abs() < 1e-9);
    }

    #[test]
    fn time_exit_at_open() {
        let p = long(&ExitRules::default());
        assert_eq!(p.protective_exit(&bar(101.0, 102.0, 100.0, 101.0), 3, Some(3)), None);
        assert_eq!(
            p.protective_exit(&bar(101.0, 102.0, 100.0, 101.0), 4, Some(3)),
            Some((ExitReason::TimeExit, 101.0))
        );
    }

    #[test]
    fn close_builds_trade_with_costs() {
        let entry_costs = CostBreakdown {
            commission: 1.0,
            slippage: 0.5,
            impact: 0.0,
        };
        let p = Position::open(
            Direction::Long,
            fill(1, 100.0),
            10.0,
            entry_costs,
            &ExitRules::default(),
        );
        let trade = p.close(fill(3, 110.0), entry_costs, ExitReason::Signal);
        assert!((trade.gross_pnl - 100.0).abs() < 1e-9);
        assert!((trade.net_pnl - 97.0).abs() < 1e-9);
        assert!((trade.commission - 2.0).abs() < 1e-9);
        assert_eq!(trade.holding_bars, 2);
        assert_eq!(trade.holding_secs, TimeDelta::days(2).num_seconds());
    }

    #[test]
    fn short_gross_pnl_is_inverted() {
        let s = Position::open(
            Direction::Short,
            fill(1, 100.0),
            10.0,
            CostBreakdown::default(),
            &ExitRules::default(),
        );
        let trade = s.close(fill(2, 90.0), CostBreakdown::default(), ExitReason::Signal);
        assert!((trade.gross_pnl - 100.0).abs() < 1e-9);
    }

    #[test]
    fn transitions() {
        let state = PositionState::Flat;
        let t = state.enter(long(&ExitRules::default()));
        assert!(matches!(t.state, PositionState::Long(_)));
        assert!(t.closed.is_none());

        // entering again while long is a no-op
        let again = t.state.clone().enter(long(&ExitRules::default()));
        assert_eq!(again.state, t.state);

        let closed = t
            .state
            .exit(fill(2, 101.0), CostBreakdown::default(), ExitReason::Signal);
        assert!(closed.state.is_flat());
        assert_eq!(closed.closed.unwrap().exit_reason, ExitReason::Signal);

        let noop = PositionState::Flat.exit(fill(2, 1.0), CostBreakdown::default(), ExitReason::Signal);
        assert!(noop.state.is_flat());
        assert!(noop.closed.is_none());
    }
}
