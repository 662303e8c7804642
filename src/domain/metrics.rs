//! Performance metrics computed from a trade ledger and equity curve.
//!
//! Return-based statistics use per-bar returns, starting from the initial
//! capital, annualized with `periods_per_year`.

use serde::{Serialize, Serializer};

use super::portfolio::EquityPoint;
use super::position::Trade;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub total_return: f64,
    pub annualized_return: f64,
    #[serde(serialize_with = "non_finite_as_text")]
    pub sharpe_ratio: f64,
    #[serde(serialize_with = "non_finite_as_text")]
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of bars spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub total_trades: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    /// NaN when there are no trades.
    #[serde(serialize_with = "non_finite_as_text")]
    pub win_rate: f64,
    /// +inf with wins and no losses, NaN with no trades.
    #[serde(serialize_with = "non_finite_as_text")]
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_holding_bars: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub total_costs: f64,
    /// Fraction of equity points recorded while a position was open.
    pub exposure: f64,
}

impl Metrics {
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        periods_per_year: f64,
    ) -> Self {
        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let years = equity_curve.len() as f64 / periods_per_year;
        let annualized_return = if years > 0.0 && total_return.is_finite() {
            if total_return <= -1.0 {
                -1.0
            } else {
                (1.0 + total_return).powf(1.0 / years) - 1.0
            }
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_duration) = compute_drawdown(equity_curve, initial_capital);
        let returns = period_returns(equity_curve, initial_capital);
        let (sharpe_ratio, sortino_ratio) = compute_risk_adjusted(&returns, periods_per_year);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_holding = 0usize;
        let mut gross_pnl = 0.0_f64;
        let mut total_costs = 0.0_f64;

        for trade in trades {
            let pnl = trade.net_pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                largest_win = largest_win.max(pnl);
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                largest_loss = largest_loss.max(pnl.abs());
            } else {
                trades_breakeven += 1;
            }
            total_holding += trade.holding_bars;
            gross_pnl += trade.gross_pnl;
            total_costs += trade.total_costs();
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            f64::NAN
        };

        let profit_factor = if total_trades == 0 {
            f64::NAN
        } else if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        let avg_holding_bars = if total_trades > 0 {
            total_holding as f64 / total_trades as f64
        } else {
            0.0
        };

        let exposure = if equity_curve.is_empty() {
            0.0
        } else {
            bars_held(trades, equity_curve) as f64 / equity_curve.len() as f64
        };

        Metrics {
            total_return,
            annualized_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            total_trades,
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_holding_bars,
            gross_pnl,
            net_pnl: gross_pnl - total_costs,
            total_costs,
            exposure,
        }
    }

    /// Every metric as a named number, in a fixed order for tabular output.
    pub fn key_values(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("total_return", self.total_return),
            ("annualized_return", self.annualized_return),
            ("sharpe_ratio", self.sharpe_ratio),
            ("sortino_ratio", self.sortino_ratio),
            ("max_drawdown", self.max_drawdown),
            ("max_drawdown_duration", self.max_drawdown_duration as f64),
            ("total_trades", self.total_trades as f64),
            ("trades_won", self.trades_won as f64),
            ("trades_lost", self.trades_lost as f64),
            ("trades_breakeven", self.trades_breakeven as f64),
            ("win_rate", self.win_rate),
            ("profit_factor", self.profit_factor),
            ("avg_win", self.avg_win),
            ("avg_loss", self.avg_loss),
            ("largest_win", self.largest_win),
            ("largest_loss", self.largest_loss),
            ("avg_holding_bars", self.avg_holding_bars),
            ("gross_pnl", self.gross_pnl),
            ("net_pnl", self.net_pnl),
            ("total_costs", self.total_costs),
            ("exposure", self.exposure),
        ]
    }
}

/// Finite values stay numbers; NaN and the infinities become `"NaN"`,
/// `"inf"` and `"-inf"` so JSON output keeps them apart.
fn non_finite_as_text<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

fn period_returns(equity_curve: &[EquityPoint], initial_capital: f64) -> Vec<f64> {
    let mut prev = initial_capital;
    equity_curve
        .iter()
        .map(|point| {
            let r = if prev > 0.0 {
                (point.equity - prev) / prev
            } else {
                0.0
            };
            prev = point.equity;
            r
        })
        .collect()
}

/// Equity points with `entry <= timestamp < exit` for some trade.
///
/// Single pass: the curve is in time order and trades are sequential.
fn bars_held(trades: &[Trade], equity_curve: &[EquityPoint]) -> usize {
    let mut trades = trades.iter().peekable();
    let mut held = 0;
    for point in equity_curve {
        while trades.next_if(|t| t.exit_timestamp <= point.timestamp).is_some() {}
        if trades
            .peek()
            .is_some_and(|t| t.entry_timestamp <= point.timestamp)
        {
            held += 1;
        }
    }
    held
}

fn compute_drawdown(equity_curve: &[EquityPoint], initial_capital: f64) -> (f64, usize) {
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    let mut max_dd_duration = 0usize;
    let mut current_dd_duration = 0usize;

    for point in equity_curve {
        if point.equity >= peak {
            peak = point.equity;
            current_dd_duration = 0;
        } else if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            max_dd = max_dd.max(dd);
            current_dd_duration += 1;
            max_dd_duration = max_dd_duration.max(current_dd_duration);
        }
    }

    (max_dd, max_dd_duration)
}

fn compute_risk_adjusted(returns: &[f64], periods_per_year: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean: f64 = returns.iter().sum::<f64>() / n;

    let variance: f64 = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    let annualizer = periods_per_year.sqrt();

    let sharpe = if stddev > 0.0 {
        mean / stddev * annualizer
    } else {
        0.0
    };

    let downside: f64 = returns
        .iter()
        .filter(|&&r| r < 0.0)
        .map(|r| r.powi(2))
        .sum();
    let downside_stddev = (downside / n).sqrt();

    let sortino = if downside_stddev > 0.0 {
        mean / downside_stddev * annualizer
    } else {
        0.0
    };

    (sharpe, sortino)
}
