//! Walk-forward validation: rolling in-sample optimization with
//! out-of-sample evaluation.
//!
//! Windows slide over the series by `step_bars`:
//! - in-sample (train): `[test_start - train_bars, test_start)`
//! - out-of-sample (test): `[test_start, test_start + test_bars)`
//!
//! The first test window starts at `train_bars`; a trailing partial test
//! window is dropped. Each window optimizes the grid on its training bars,
//! then runs the winner over the test bars with every earlier bar as
//! indicator warm-up only. Capital carries from one test window to the next,
//! and the summary metrics come from the stitched out-of-sample trades and
//! equity alone.

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::backtest::{run_backtest_window, BacktestConfig, Params, RunResult};
use crate::domain::config_validation::{invalid, read_usize};
use crate::domain::error::BacktestError;
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::BarSeries;
use crate::domain::portfolio::EquityPoint;
use crate::domain::position::Trade;
use crate::optimize::grid::{ParamGrid, StrategyTemplate};
use crate::optimize::harness::{CancelToken, Optimizer, OptimizerConfig};
use crate::optimize::ranking::{best, rank, RankingConfig};
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalkForwardConfig {
    pub train_bars: usize,
    pub test_bars: usize,
    /// Defaults to `test_bars`, giving back-to-back test windows.
    pub step_bars: Option<usize>,
}

impl WalkForwardConfig {
    pub fn step(&self) -> usize {
        self.step_bars.unwrap_or(self.test_bars)
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        for (key, value) in [
            ("train_bars", self.train_bars),
            ("test_bars", self.test_bars),
            ("step_bars", self.step()),
        ] {
            if value == 0 {
                return Err(invalid("walk_forward", key, "must be positive"));
            }
        }
        if self.step() < self.test_bars {
            return Err(invalid(
                "walk_forward",
                "step_bars",
                "must be at least test_bars so test windows do not overlap",
            ));
        }
        Ok(())
    }

    /// `[walk_forward] train_bars`, `test_bars` and optional `step_bars`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BacktestError> {
        const S: &str = "walk_forward";
        let required = |key: &str| -> Result<usize, BacktestError> {
            read_usize(config, S, key)?.ok_or_else(|| BacktestError::ConfigMissing {
                section: S.into(),
                key: key.into(),
            })
        };
        let wf = WalkForwardConfig {
            train_bars: required("train_bars")?,
            test_bars: required("test_bars")?,
            step_bars: read_usize(config, S, "step_bars")?,
        };
        wf.validate()?;
        Ok(wf)
    }
}

/// Bar index ranges of one window; every range is half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSpec {
    pub index: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub test_start: usize,
    pub test_end: usize,
}

/// Full windows that fit in `total_bars`.
pub fn windows(total_bars: usize, config: &WalkForwardConfig) -> Vec<WindowSpec> {
    let step = config.step();
    if step == 0 || config.test_bars == 0 {
        return Vec::new();
    }
    (0..)
        .map(|k| config.train_bars + k * step)
        .take_while(|&test_start| test_start + config.test_bars <= total_bars)
        .enumerate()
        .map(|(index, test_start)| WindowSpec {
            index,
            train_start: test_start - config.train_bars,
            train_end: test_start,
            test_start,
            test_end: test_start + config.test_bars,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub spec: WindowSpec,
    /// Winning assignment; `None` when no in-sample run was eligible.
    pub params: Option<Params>,
    pub in_sample: Option<Metrics>,
    pub in_sample_runs: usize,
    pub eligible_runs: usize,
    pub starting_capital: f64,
    pub ending_capital: f64,
    pub out_of_sample: Option<RunResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardReport {
    pub symbol: String,
    pub initial_capital: f64,
    pub windows: Vec<WindowResult>,
    /// Out-of-sample trades of every window, in order.
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Computed from the stitched out-of-sample trades and equity only.
    pub metrics: Metrics,
}

impl WalkForwardReport {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_capital)
    }
}

pub struct WalkForward<'a> {
    template: &'a StrategyTemplate,
    grid: &'a ParamGrid,
    backtest: &'a BacktestConfig,
    config: WalkForwardConfig,
    optimizer: OptimizerConfig,
    ranking: RankingConfig,
    cancel: CancelToken,
}

impl<'a> WalkForward<'a> {
    pub fn new(
        template: &'a StrategyTemplate,
        grid: &'a ParamGrid,
        backtest: &'a BacktestConfig,
        config: WalkForwardConfig,
    ) -> Self {
        WalkForward {
            template,
            grid,
            backtest,
            config,
            optimizer: OptimizerConfig::default(),
            ranking: RankingConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_ranking(mut self, ranking: RankingConfig) -> Self {
        self.ranking = ranking;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, series: &BarSeries) -> Result<WalkForwardReport, BacktestError> {
        self.config.validate()?;
        self.backtest.validate()?;

        let specs = windows(series.len(), &self.config);
        if specs.is_empty() {
            return Err(BacktestError::Optimization {
                reason: format!(
                    "{} bars cannot hold {} training bars followed by {} test bars",
                    series.len(),
                    self.config.train_bars,
                    self.config.test_bars
                ),
            });
        }
        info!(symbol = %series.symbol, windows = specs.len(), "starting walk-forward");

        let mut capital = self.backtest.initial_capital;
        let mut results = Vec::with_capacity(specs.len());
        let mut trades = Vec::new();
        let mut equity_curve = Vec::new();

        for spec in specs {
            if self.cancel.is_cancelled() {
                warn!(window = spec.index, "walk-forward cancelled");
                break;
            }
            let window = self.run_window(series, spec, capital)?;
            if let Some(oos) = &window.out_of_sample {
                trades.extend(oos.trades.iter().cloned());
                equity_curve.extend(oos.equity_curve.iter().cloned());
            } else {
                equity_curve.extend(series.bars[spec.test_start..spec.test_end].iter().map(|b| {
                    EquityPoint {
                        timestamp: b.timestamp,
                        equity: capital,
                    }
                }));
            }
            capital = window.ending_capital;
            results.push(window);
        }

        let metrics = Metrics::compute(
            &trades,
            &equity_curve,
            self.backtest.initial_capital,
            self.backtest.periods_per_year,
        );
        info!(
            symbol = %series.symbol,
            trades = trades.len(),
            total_return = metrics.total_return,
            "walk-forward complete"
        );

        Ok(WalkForwardReport {
            symbol: series.symbol.clone(),
            initial_capital: self.backtest.initial_capital,
            windows: results,
            trades,
            equity_curve,
            metrics,
        })
    }

    fn run_window(
        &self,
        series: &BarSeries,
        spec: WindowSpec,
        capital: f64,
    ) -> Result<WindowResult, BacktestError> {
        let train = series.slice(spec.train_start, spec.train_end);
        let batch = Optimizer::new(self.template, self.grid, self.backtest)
            .with_config(self.optimizer.clone())
            .with_cancel(self.cancel.clone())
            .run(&train)?;
        let ranked = rank(&batch, &self.ranking);
        let eligible_runs = ranked.iter().filter(|r| r.rank.is_some()).count();

        let Some(winner) = best(&ranked) else {
            warn!(window = spec.index, "no eligible in-sample run, staying flat");
            return Ok(WindowResult {
                spec,
                params: None,
                in_sample: None,
                in_sample_runs: batch.records.len(),
                eligible_runs,
                starting_capital: capital,
                ending_capital: capital,
                out_of_sample: None,
            });
        };

        let strategy = self.template.instantiate(&winner.params)?;
        let history = series.slice(0, spec.test_end);
        let oos = run_backtest_window(&history, &strategy, self.backtest, capital, spec.test_start)?
            .with_params(winner.params.clone());

        info!(
            window = spec.index,
            params = ?winner.params,
            oos_return = oos.metrics.total_return,
            "walk-forward window complete"
        );

        Ok(WindowResult {
            spec,
            params: Some(winner.params.clone()),
            in_sample: winner.metrics.clone(),
            in_sample_runs: batch.records.len(),
            eligible_runs,
            starting_capital: capital,
            ending_capital: oos.final_equity(),
            out_of_sample: Some(oos),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::IniConfigParser;
    use crate::domain::indicator::test_support::make_bars;
    use chrono::TimeDelta;

    fn wf(train: usize, test: usize, step: Option<usize>) -> WalkForwardConfig {
        WalkForwardConfig {
            train_bars: train,
            test_bars: test,
            step_bars: step,
        }
    }

    #[test]
    fn windows_slide_by_test_length() {
        let specs = windows(30, &wf(12, 3, None));
        assert_eq!(specs.len(), 6);
        let starts: Vec<usize> = specs.iter().map(|w| w.test_start).collect();
        assert_eq!(starts, vec![12, 15, 18, 21, 24, 27]);
        assert_eq!(specs[0].train_start, 0);
        assert_eq!(specs[5].train_start, 15);
        assert_eq!(specs[5].test_end, 30);
    }

    #[test]
    fn windows_drop_partial_test_window() {
        let specs = windows(29, &wf(12, 3, None));
        assert_eq!(specs.len(), 5);
        assert!(windows(14, &wf(12, 3, None)).is_empty());
    }

    #[test]
    fn windows_with_custom_step() {
        let specs = windows(30, &wf(10, 5, Some(7)));
        let starts: Vec<usize> = specs.iter().map(|w| w.test_start).collect();
        assert_eq!(starts, vec![10, 17, 24]);
        assert_eq!(specs.last().map(|w| w.test_end), Some(29));
    }

    #[test]
    fn zero_lengths_rejected() {
        assert!(wf(0, 3, None).validate().is_err());
        assert!(wf(10, 0, None).validate().is_err());
        assert!(wf(10, 3, Some(0)).validate().is_err());
    }

    #[test]
    fn step_shorter_than_test_window_rejected() {
        let err = wf(12, 3, Some(1)).validate().unwrap_err();
        assert!(matches!(
            err,
            BacktestError::ConfigInvalid { ref section, ref key, .. }
                if section == "walk_forward" && key == "step_bars"
        ));
        assert!(wf(12, 3, Some(3)).validate().is_ok());
        assert!(wf(12, 3, Some(5)).validate().is_ok());

        let template = StrategyTemplate::new(
            "[strategy]\nentry_long = ABOVE(close, {level})\n",
            IniConfigParser,
        );
        let grid = ParamGrid::new().with_axis("level", [1.0]);
        let backtest = BacktestConfig::default();
        assert!(
            WalkForward::new(&template, &grid, &backtest, wf(12, 3, Some(1)))
                .run(&oscillating(30))
                .is_err()
        );
    }

    fn oscillating(n: usize) -> BarSeries {
        let prices: Vec<f64> = (0..n)
            .map(|i| 100.0 + 10.0 * (i as f64 * 0.7).sin())
            .collect();
        BarSeries::new("WAVE", TimeDelta::days(1), make_bars(&prices))
    }

    #[test]
    fn capital_chains_and_equity_covers_test_bars() {
        let template = StrategyTemplate::new(
            "[strategy]\nentry_long = CROSS_ABOVE(close, {level})\n\
             exit = CROSS_BELOW(close, {level})\n",
            IniConfigParser,
        );
        let grid = ParamGrid::new().with_axis("level", [95.0, 100.0, 105.0]);
        let backtest = BacktestConfig::default();
        let report = WalkForward::new(&template, &grid, &backtest, wf(12, 3, None))
            .run(&oscillating(30))
            .unwrap();

        assert_eq!(report.windows.len(), 6);
        assert_eq!(report.equity_curve.len(), 18);
        for pair in report.equity_curve.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for pair in report.windows.windows(2) {
            assert_eq!(pair[1].starting_capital, pair[0].ending_capital);
        }
        assert_eq!(report.windows[0].starting_capital, backtest.initial_capital);
        for trade in &report.trades {
            assert!(trade.entry_index >= 12);
        }
        let last = report.windows.last().unwrap();
        assert!((report.final_equity() - last.ending_capital).abs() < 1e-6);
    }

    #[test]
    fn too_short_series_is_an_error() {
        let template = StrategyTemplate::new(
            "[strategy]\nentry_long = ABOVE(close, {level})\n",
            IniConfigParser,
        );
        let grid = ParamGrid::new().with_axis("level", [1.0]);
        let backtest = BacktestConfig::default();
        let err = WalkForward::new(&template, &grid, &backtest, wf(20, 5, None))
            .run(&oscillating(10))
            .unwrap_err();
        assert!(matches!(err, BacktestError::Optimization { .. }));
    }

    #[test]
    fn from_config_reads_section() {
        let adapter = crate::adapters::file_config_adapter::FileConfigAdapter::from_string(
            "[walk_forward]\ntrain_bars = 12\ntest_bars = 3\n",
        )
        .unwrap();
        let config = WalkForwardConfig::from_config(&adapter).unwrap();
        assert_eq!(config, wf(12, 3, None));
        assert_eq!(config.step(), 3);

        let adapter =
            crate::adapters::file_config_adapter::FileConfigAdapter::from_string("[walk_forward]\n")
                .unwrap();
        assert!(matches!(
            WalkForwardConfig::from_config(&adapter),
            Err(BacktestError::ConfigMissing { .. })
        ));
    }
}
