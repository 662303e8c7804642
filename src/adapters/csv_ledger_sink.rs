//! CSV ledger writer.
//!
//! For each run, three files land in the output directory:
//! - `{stem}_trades.csv`: one row per closed trade
//! - `{stem}_equity.csv`: timestamp and equity per simulated bar
//! - `{stem}_metrics.csv`: `metric,value` rows
//!
//! `stem` is `{symbol}_{n}` with `n` counting runs written by this sink.
//! Rankings go to `ranking.csv`; walk-forward windows to `windows.csv`.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::backtest::{Params, RunResult};
use crate::domain::error::BacktestError;
use crate::domain::metrics::Metrics;
use crate::domain::portfolio::EquityPoint;
use crate::domain::position::Trade;
use crate::optimize::ranking::{Exclusion, RankedRun};
use crate::optimize::walk_forward::WalkForwardReport;
use crate::ports::result_sink::ResultSink;

pub struct CsvLedgerSink {
    dir: PathBuf,
    runs: usize,
}

impl CsvLedgerSink {
    /// Creates `dir` if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, BacktestError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(CsvLedgerSink {
            dir: dir.as_ref().to_path_buf(),
            runs: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_ledger(
        &self,
        stem: &str,
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        metrics: &Metrics,
    ) -> Result<(), BacktestError> {
        let mut wtr = csv::Writer::from_path(self.dir.join(format!("{stem}_trades.csv")))?;
        if trades.is_empty() {
            wtr.write_record(TRADE_HEADER)?;
        }
        for trade in trades {
            wtr.serialize(trade)?;
        }
        wtr.flush()?;

        let mut wtr = csv::Writer::from_path(self.dir.join(format!("{stem}_equity.csv")))?;
        wtr.write_record(["timestamp", "equity"])?;
        for point in equity_curve {
            wtr.write_record([point.timestamp.to_string(), point.equity.to_string()])?;
        }
        wtr.flush()?;

        let mut wtr = csv::Writer::from_path(self.dir.join(format!("{stem}_metrics.csv")))?;
        wtr.write_record(["metric", "value"])?;
        for (key, value) in metrics.key_values() {
            wtr.write_record([key.to_string(), value.to_string()])?;
        }
        wtr.flush()?;

        debug!(dir = %self.dir.display(), stem, trades = trades.len(), "wrote ledger");
        Ok(())
    }
}

const TRADE_HEADER: [&str; 16] = [
    "direction",
    "size",
    "entry_timestamp",
    "exit_timestamp",
    "entry_index",
    "exit_index",
    "entry_price",
    "exit_price",
    "gross_pnl",
    "commission",
    "slippage",
    "impact",
    "net_pnl",
    "holding_bars",
    "holding_secs",
    "exit_reason",
];

/// `a=1;b=2`
pub fn format_params(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn exclusion_label(exclusion: &Exclusion) -> String {
    match exclusion {
        Exclusion::Failed { reason } => format!("failed: {reason}"),
        Exclusion::Cancelled => "cancelled".into(),
        Exclusion::InsufficientTrades { trades, required } => {
            format!("insufficient trades: {trades} < {required}")
        }
        Exclusion::SharpeBelowMinimum { sharpe, minimum } => {
            format!("sharpe {sharpe:.3} below {minimum}")
        }
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl ResultSink for CsvLedgerSink {
    fn write_run(&mut self, result: &RunResult) -> Result<(), BacktestError> {
        let stem = format!("{}_{}", result.symbol, self.runs);
        self.write_ledger(&stem, &result.trades, &result.equity_curve, &result.metrics)?;
        self.runs += 1;
        Ok(())
    }

    fn write_ranking(&mut self, ranked: &[RankedRun]) -> Result<(), BacktestError> {
        let mut wtr = csv::Writer::from_path(self.dir.join("ranking.csv"))?;
        wtr.write_record([
            "rank",
            "index",
            "params",
            "score",
            "total_return",
            "sharpe_ratio",
            "max_drawdown",
            "win_rate",
            "total_trades",
            "exclusion",
        ])?;
        for run in ranked {
            let m = run.metrics.as_ref();
            wtr.write_record([
                run.rank.map(|r| r.to_string()).unwrap_or_default(),
                run.index.to_string(),
                format_params(&run.params),
                optional(run.score),
                optional(m.map(|m| m.total_return)),
                optional(m.map(|m| m.sharpe_ratio)),
                optional(m.map(|m| m.max_drawdown)),
                optional(m.map(|m| m.win_rate)),
                m.map(|m| m.total_trades.to_string()).unwrap_or_default(),
                run.exclusion.as_ref().map(exclusion_label).unwrap_or_default(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    fn write_walk_forward(&mut self, report: &WalkForwardReport) -> Result<(), BacktestError> {
        let mut wtr = csv::Writer::from_path(self.dir.join("windows.csv"))?;
        wtr.write_record([
            "window",
            "train_start",
            "train_end",
            "test_start",
            "test_end",
            "params",
            "in_sample_sharpe",
            "starting_capital",
            "ending_capital",
        ])?;
        for w in &report.windows {
            wtr.write_record([
                w.spec.index.to_string(),
                w.spec.train_start.to_string(),
                w.spec.train_end.to_string(),
                w.spec.test_start.to_string(),
                w.spec.test_end.to_string(),
                w.params.as_ref().map(format_params).unwrap_or_default(),
                optional(w.in_sample.as_ref().map(|m| m.sharpe_ratio)),
                w.starting_capital.to_string(),
                w.ending_capital.to_string(),
            ])?;
        }
        wtr.flush()?;

        let stem = format!("{}_walk_forward", report.symbol);
        self.write_ledger(&stem, &report.trades, &report.equity_curve, &report.metrics)
    }
}
