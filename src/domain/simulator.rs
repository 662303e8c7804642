//! Bar-by-bar execution simulator.
//!
//! For each bar in the active window the simulator, in order:
//!
//! 1. closes any open position at the previous close if the timestamp gap
//!    exceeds the configured tolerance, dropping the pending order;
//! 2. fills the order queued by the previous bar's signal at this bar's open;
//! 3. applies protective exits (time, stop-loss, trailing stop, take-profit);
//! 4. acts on this bar's signal, queueing it for the next open or filling it
//!    at the close depending on [`FillTiming`];
//! 5. marks the portfolio to market at the close.
//!
//! The last bar closes whatever is still open (`EndOfData`).

use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use tracing::{debug, warn};

use crate::domain::costs::{CostModel, Side};
use crate::domain::ohlcv::{Bar, BarSeries};
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::{ExitReason, Fill, Position, Trade};
use crate::domain::rule_eval::IndicatorTable;
use crate::domain::signal::{Signal, SignalKind};
use crate::domain::sizing::{size_position, SizingInput, SizingSkip};
use crate::domain::strategy::{Direction, StrategyConfig};

pub const DEFAULT_GAP_TOLERANCE: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FillTiming {
    /// Fill at the open of the bar after the signal.
    #[default]
    NextOpen,
    /// Fill at the close of the signal bar.
    SignalClose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub initial_capital: f64,
    pub costs: CostModel,
    pub fill_timing: FillTiming,
    pub allow_shorting: bool,
    /// Multiple of the series interval beyond which a timestamp jump is a gap.
    pub gap_tolerance: f64,
    /// Bars before this index only feed indicators.
    pub active_from: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            initial_capital: 100_000.0,
            costs: CostModel::default(),
            fill_timing: FillTiming::NextOpen,
            allow_shorting: false,
            gap_tolerance: DEFAULT_GAP_TOLERANCE,
            active_from: 0,
        }
    }
}

/// Recovered conditions counted during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationDiagnostics {
    /// Entries reduced to what cash could pay for.
    pub clamped_entries: usize,
    /// Entries that could not be sized at all.
    pub skipped_entries: usize,
    pub gaps: usize,
    /// Signals with nothing to act on (same-direction entry, exit while flat,
    /// disallowed short).
    pub ignored_signals: usize,
    /// Orders dropped by a gap or by the end of data.
    pub discarded_orders: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub initial_capital: f64,
    pub final_cash: f64,
    pub bars_in_market: usize,
    pub diagnostics: SimulationDiagnostics,
}

impl SimulationOutcome {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.final_cash)
    }

    pub fn active_bars(&self) -> usize {
        self.equity_curve.len()
    }
}

pub struct Simulator<'a> {
    config: &'a SimulationConfig,
    strategy: &'a StrategyConfig,
    series: &'a BarSeries,
    indicators: &'a IndicatorTable,
    portfolio: Portfolio,
    pending: Option<Signal>,
    diagnostics: SimulationDiagnostics,
}

impl<'a> Simulator<'a> {
    pub fn new(
        config: &'a SimulationConfig,
        strategy: &'a StrategyConfig,
        series: &'a BarSeries,
        indicators: &'a IndicatorTable,
    ) -> Self {
        Self {
            config,
            strategy,
            series,
            indicators,
            portfolio: Portfolio::new(config.initial_capital),
            pending: None,
            diagnostics: SimulationDiagnostics::default(),
        }
    }

    /// Consume `signals` (time ordered, at most one per bar) and simulate
    /// every bar of the series.
    pub fn run<I>(mut self, signals: I) -> SimulationOutcome
    where
        I: IntoIterator<Item = Signal>,
    {
        let mut signals = signals.into_iter().peekable();
        let active_from = self.config.active_from;

        for i in 0..self.series.bars.len() {
            let signal = signal_at(&mut signals, i);
            if i < active_from {
                continue;
            }
            self.step(i, signal);
        }

        SimulationOutcome {
            trades: self.portfolio.trades,
            equity_curve: self.portfolio.equity_curve,
            initial_capital: self.portfolio.initial_capital,
            final_cash: self.portfolio.cash,
            bars_in_market: self.portfolio.bars_in_market,
            diagnostics: self.diagnostics,
        }
    }

    fn step(&mut self, i: usize, signal: Option<Signal>) {
        let series = self.series;
        let bars = &series.bars;
        let bar = &bars[i];
        let is_last = i + 1 == bars.len();

        if i > self.config.active_from && self.is_gap(i) {
            self.handle_gap(i);
        }

        if let Some(order) = self.pending.take() {
            self.execute(&order, i, bar.open);
        }

        self.apply_protective_exits(i, bar);

        if let Some(signal) = signal {
            // The final bar's close is where any open position is liquidated.
            match self.config.fill_timing {
                _ if is_last => {
                    debug!(bar = i, kind = ?signal.kind, "order at final bar discarded");
                    self.diagnostics.discarded_orders += 1;
                }
                FillTiming::NextOpen => self.pending = Some(signal),
                FillTiming::SignalClose => self.execute(&signal, i, bar.close),
            }
        }

        if is_last && !self.portfolio.is_flat() {
            self.close(i, bar.close, ExitReason::EndOfData);
        }

        let equity = self.portfolio.equity(bar.close);
        self.portfolio.record_equity(bar.timestamp, equity);
    }

    fn is_gap(&self, i: usize) -> bool {
        let interval_ms = self.series.interval.num_milliseconds();
        if interval_ms <= 0 {
            return false;
        }
        let bars = &self.series.bars;
        let delta = bars[i].timestamp - bars[i - 1].timestamp;
        delta.num_milliseconds() as f64 > interval_ms as f64 * self.config.gap_tolerance
    }

    fn handle_gap(&mut self, i: usize) {
        let series = self.series;
        let bars = &series.bars;
        let delta = bars[i].timestamp - bars[i - 1].timestamp;
        self.diagnostics.gaps += 1;
        warn!(
            symbol = %series.symbol,
            bar = i,
            gap_secs = delta.num_seconds(),
            holding = !self.portfolio.is_flat(),
            "data gap detected"
        );
        if !self.portfolio.is_flat() {
            self.close(i - 1, bars[i - 1].close, ExitReason::DataGap);
        }
        if self.pending.take().is_some() {
            self.diagnostics.discarded_orders += 1;
        }
    }

    fn apply_protective_exits(&mut self, i: usize, bar: &Bar) {
        let max_holding = self.strategy.exits.max_holding_bars;
        let hit = self
            .portfolio
            .position()
            .and_then(|pos| pos.protective_exit(bar, i, max_holding));
        if let Some((reason, price)) = hit {
            self.close(i, price, reason);
        }
        if let Some(pos) = self.portfolio.state.position_mut() {
            pos.track(bar);
        }
    }

    fn execute(&mut self, signal: &Signal, i: usize, price: f64) {
        let held = self.portfolio.state.direction();
        let direction = match signal.kind {
            SignalKind::Exit => {
                if held.is_some() {
                    self.close(i, price, ExitReason::Signal);
                } else {
                    self.ignore(signal, "exit while flat");
                }
                return;
            }
            SignalKind::EnterLong => Direction::Long,
            SignalKind::EnterShort => Direction::Short,
        };

        if held == Some(direction) {
            self.ignore(signal, "already holding this direction");
            return;
        }
        let may_open = direction == Direction::Long || self.config.allow_shorting;
        match held {
            Some(_) if may_open => self.close(i, price, ExitReason::Reversal),
            // with shorting disabled a short entry only closes the long
            Some(_) => self.close(i, price, ExitReason::Signal),
            None if !may_open => self.ignore(signal, "shorting disabled"),
            None => {}
        }
        if may_open {
            self.open(direction, signal, i, price);
        }
    }

    fn ignore(&mut self, signal: &Signal, why: &str) {
        debug!(bar = signal.bar_index, kind = ?signal.kind, why, "signal ignored");
        self.diagnostics.ignored_signals += 1;
    }

    fn open(&mut self, direction: Direction, signal: &Signal, i: usize, price: f64) {
        let series = self.series;
        let bar = &series.bars[i];
        let atr = self
            .strategy
            .sizing_indicator()
            .and_then(|ind| self.indicators.get(&ind))
            .and_then(|series| series.simple_value(signal.bar_index));
        let input = SizingInput {
            equity: self.portfolio.equity(price),
            cash: self.portfolio.cash,
            price,
            atr,
        };

        let costs = &self.config.costs;
        let decision = match size_position(&self.strategy.sizing, &input, costs) {
            Ok(decision) => decision,
            Err(skip) => {
                let reason = match skip {
                    SizingSkip::NoVolatility => "volatility unavailable",
                    SizingSkip::NoCapital => "no capital",
                };
                warn!(bar = i, ?direction, reason, "entry skipped");
                self.diagnostics.skipped_entries += 1;
                return;
            }
        };
        if decision.clamped {
            warn!(
                bar = i,
                notional = decision.notional,
                cash = self.portfolio.cash,
                "entry clamped to available cash"
            );
            self.diagnostics.clamped_entries += 1;
        }

        let side = match direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        };
        let fill = Fill {
            timestamp: bar.timestamp,
            bar_index: i,
            price,
        };
        let position = Position::open(
            direction,
            fill,
            decision.units,
            costs.costs(decision.notional),
            &self.strategy.exits,
        );
        debug!(
            bar = i,
            ?direction,
            units = decision.units,
            market = price,
            effective = costs.fill_price(price, side),
            "position opened"
        );
        self.portfolio.open(position);
    }

    fn close(&mut self, i: usize, price: f64, reason: ExitReason) {
        let Some(size) = self.portfolio.position().map(|p| p.size) else {
            return;
        };
        let exit_costs = self.config.costs.costs(size * price);
        let fill = Fill {
            timestamp: self.series.bars[i].timestamp,
            bar_index: i,
            price,
        };
        if let Some(trade) = self.portfolio.close(fill, exit_costs, reason) {
            debug!(
                bar = i,
                reason = ?trade.exit_reason,
                net_pnl = trade.net_pnl,
                "position closed"
            );
        }
    }
}

fn signal_at<I>(signals: &mut Peekable<I>, i: usize) -> Option<Signal>
where
    I: Iterator<Item = Signal>,
{
    let mut found = None;
    while let Some(signal) = signals.next_if(|s| s.bar_index <= i) {
        if signal.bar_index == i {
            found = Some(signal);
        }
    }
    found
}

/// Simulate `series` against a precomputed signal stream.
pub fn simulate<I>(
    config: &SimulationConfig,
    strategy: &StrategyConfig,
    series: &BarSeries,
    indicators: &IndicatorTable,
    signals: I,
) -> SimulationOutcome
where
    I: IntoIterator<Item = Signal>,
{
    Simulator::new(config, strategy, series, indicators).run(signals)
}
