//! Parallel batch execution of a parameter grid.
//!
//! Each assignment is rendered into a strategy and backtested on a private
//! rayon pool. Workers send finished records through one `mpsc` channel to a
//! single collector thread, which is the only writer of the batch report.
//! Cancellation is cooperative: the token and the deadline are checked before
//! each run starts, so in-flight runs always finish.

use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::backtest::{run_backtest, BacktestConfig, Params, RunResult};
use crate::domain::config_validation::{invalid, read_f64, read_usize};
use crate::domain::error::BacktestError;
use crate::domain::ohlcv::BarSeries;
use crate::optimize::grid::{ParamGrid, StrategyTemplate};
use crate::ports::config_port::ConfigPort;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerConfig {
    /// Worker threads; 0 lets rayon pick one per core.
    pub workers: usize,
    /// No run is started once this much time has elapsed.
    pub deadline: Option<Duration>,
}

impl OptimizerConfig {
    /// `[optimize] workers` and `deadline_secs`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BacktestError> {
        let deadline = match read_f64(config, "optimize", "deadline_secs")? {
            Some(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            Some(_) => {
                return Err(invalid("optimize", "deadline_secs", "must be positive"));
            }
            None => None,
        };
        Ok(OptimizerConfig {
            workers: read_usize(config, "optimize", "workers")?.unwrap_or(0),
            deadline,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum RunStatus {
    Completed(Box<RunResult>),
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    /// Position of the assignment in grid order.
    pub index: usize,
    pub params: Params,
    pub status: RunStatus,
}

impl RunRecord {
    pub fn result(&self) -> Option<&RunResult> {
        match &self.status {
            RunStatus::Completed(result) => Some(&**result),
            _ => None,
        }
    }
}

/// Every assignment of a batch, in grid order, with its outcome.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub symbol: String,
    pub records: Vec<RunRecord>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &RunResult> {
        self.records.iter().filter_map(RunRecord::result)
    }

    pub fn completed_count(&self) -> usize {
        self.completed().count()
    }

    pub fn failed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.status, RunStatus::Failed { .. }))
            .count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r.status, RunStatus::Cancelled))
            .count()
    }
}

pub struct Optimizer<'a> {
    template: &'a StrategyTemplate,
    grid: &'a ParamGrid,
    backtest: &'a BacktestConfig,
    config: OptimizerConfig,
    cancel: CancelToken,
}

impl<'a> Optimizer<'a> {
    pub fn new(
        template: &'a StrategyTemplate,
        grid: &'a ParamGrid,
        backtest: &'a BacktestConfig,
    ) -> Self {
        Optimizer {
            template,
            grid,
            backtest,
            config: OptimizerConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: OptimizerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every grid assignment against `series`.
    ///
    /// Per-run failures are recorded in the report; only a broken grid,
    /// engine settings or thread pool fail the batch.
    pub fn run(&self, series: &BarSeries) -> Result<BatchReport, BacktestError> {
        self.grid.validate()?;
        self.backtest.validate()?;

        let assignments = self.grid.assignments();
        let total = assignments.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| BacktestError::Optimization {
                reason: format!("failed to build thread pool: {e}"),
            })?;

        info!(
            symbol = %series.symbol,
            runs = total,
            workers = pool.current_num_threads(),
            "starting optimization batch"
        );

        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        let (tx, rx) = mpsc::channel::<RunRecord>();

        let slots = std::thread::scope(|scope| {
            let collector = scope.spawn(move || {
                let mut slots: Vec<Option<RunRecord>> = (0..total).map(|_| None).collect();
                for record in rx {
                    let index = record.index;
                    slots[index] = Some(record);
                }
                slots
            });

            pool.install(|| {
                assignments
                    .par_iter()
                    .enumerate()
                    .for_each_with(tx, |tx, (index, params)| {
                        let status = if self.should_stop(deadline) {
                            RunStatus::Cancelled
                        } else {
                            self.run_one(series, index, params)
                        };
                        let _ = tx.send(RunRecord {
                            index,
                            params: params.clone(),
                            status,
                        });
                    });
            });

            collector.join()
        })
        .map_err(|_| BacktestError::Optimization {
            reason: "result collector panicked".into(),
        })?;

        let records: Vec<RunRecord> = slots
            .into_iter()
            .zip(assignments)
            .enumerate()
            .map(|(index, (slot, params))| {
                slot.unwrap_or(RunRecord {
                    index,
                    params,
                    status: RunStatus::Cancelled,
                })
            })
            .collect();

        let report = BatchReport {
            symbol: series.symbol.clone(),
            records,
            elapsed: started.elapsed(),
        };

        if report.cancelled_count() > 0 {
            warn!(
                cancelled = report.cancelled_count(),
                "optimization stopped before every run was dispatched"
            );
        }
        info!(
            completed = report.completed_count(),
            failed = report.failed_count(),
            cancelled = report.cancelled_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "optimization batch finished"
        );
        Ok(report)
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn run_one(&self, series: &BarSeries, index: usize, params: &Params) -> RunStatus {
        let outcome = self
            .template
            .instantiate(params)
            .and_then(|strategy| run_backtest(series, &strategy, self.backtest));
        match outcome {
            Ok(result) => {
                debug!(run = index, trades = result.trades.len(), "run complete");
                RunStatus::Completed(Box::new(result.with_params(params.clone())))
            }
            Err(e) => {
                warn!(run = index, params = ?params, error = %e, "run failed");
                RunStatus::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::IniConfigParser;
    use crate::domain::indicator::test_support::make_bars;
    use chrono::TimeDelta;

    const TEMPLATE: &str = "[strategy]\nname = breakout {level}\n\
        entry_long = CROSS_ABOVE(close, {level})\n\
        exit = CROSS_BELOW(close, {level})\n";

    fn series() -> BarSeries {
        let prices = [95.0, 99.0, 101.0, 105.0, 110.0, 98.0, 97.0, 96.0, 103.0, 94.0];
        BarSeries::new("TEST", TimeDelta::days(1), make_bars(&prices))
    }

    #[test]
    fn runs_every_assignment_in_grid_order() {
        let template = StrategyTemplate::new(TEMPLATE, IniConfigParser);
        let grid = ParamGrid::new().with_axis("level", [100.0, 104.0, 200.0]);
        let backtest = BacktestConfig::default();
        let report = Optimizer::new(&template, &grid, &backtest)
            .with_config(OptimizerConfig {
                workers: 2,
                deadline: None,
            })
            .run(&series())
            .unwrap();

        assert_eq!(report.records.len(), 3);
        assert_eq!(report.completed_count(), 3);
        for (i, record) in report.records.iter().enumerate() {
            assert_eq!(record.index, i);
            let result = record.result().unwrap();
            assert_eq!(result.params.as_ref(), Some(&record.params));
        }
        assert!(report.records[2].result().unwrap().trades.is_empty());
        assert!(!report.records[0].result().unwrap().trades.is_empty());
    }

    #[test]
    fn failed_run_does_not_stop_batch() {
        let template = StrategyTemplate::new(
            "[strategy]\nentry_long = ABOVE(SMA({period}), 1)\n",
            IniConfigParser,
        );
        let grid = ParamGrid::new().with_axis("period", [0.0, 3.0]);
        let backtest = BacktestConfig::default();
        let report = Optimizer::new(&template, &grid, &backtest)
            .run(&series())
            .unwrap();
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.completed_count(), 1);
        assert!(matches!(report.records[0].status, RunStatus::Failed { .. }));
    }

    #[test]
    fn cancelled_before_start_marks_every_run() {
        let template = StrategyTemplate::new(TEMPLATE, IniConfigParser);
        let grid = ParamGrid::new().with_axis("level", [100.0, 104.0]);
        let backtest = BacktestConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Optimizer::new(&template, &grid, &backtest)
            .with_cancel(cancel)
            .run(&series())
            .unwrap();
        assert_eq!(report.cancelled_count(), 2);
        assert_eq!(report.records[1].params["level"], 104.0);
    }

    #[test]
    fn elapsed_deadline_cancels_dispatch() {
        let template = StrategyTemplate::new(TEMPLATE, IniConfigParser);
        let grid = ParamGrid::new().with_axis("level", [100.0]);
        let backtest = BacktestConfig::default();
        let report = Optimizer::new(&template, &grid, &backtest)
            .with_config(OptimizerConfig {
                workers: 1,
                deadline: Some(Duration::ZERO),
            })
            .run(&series())
            .unwrap();
        assert_eq!(report.cancelled_count(), 1);
    }

    #[test]
    fn cancel_token_clones_share_state() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn invalid_grid_fails_batch() {
        let template = StrategyTemplate::new(TEMPLATE, IniConfigParser);
        let grid = ParamGrid::new();
        let backtest = BacktestConfig::default();
        assert!(Optimizer::new(&template, &grid, &backtest).run(&series()).is_err());
    }

    #[test]
    fn optimizer_config_from_ini() {
        let adapter = crate::adapters::file_config_adapter::FileConfigAdapter::from_string(
            "[optimize]\nworkers = 3\ndeadline_secs = 1.5\n",
        )
        .unwrap();
        let config = OptimizerConfig::from_config(&adapter).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.deadline, Some(Duration::from_millis(1500)));
    }
}
