//! One backtest run, end to end: data checks, indicators, signals,
//! simulation and metrics.
//!
//! [`BacktestConfig`] holds the engine settings shared by every run of a
//! batch; the strategy is supplied per run.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::costs::CostModel;
use crate::domain::data_quality::ensure_usable;
use crate::domain::error::BacktestError;
use crate::domain::indicator::compute_indicators;
use crate::domain::metrics::{Metrics, TRADING_DAYS_PER_YEAR};
use crate::domain::ohlcv::BarSeries;
use crate::domain::portfolio::EquityPoint;
use crate::domain::position::Trade;
use crate::domain::signal::{SignalDiagnostic, SignalGenerator};
use crate::domain::simulator::{
    simulate, FillTiming, SimulationConfig, SimulationDiagnostics, DEFAULT_GAP_TOLERANCE,
};
use crate::domain::strategy::StrategyConfig;

pub const DEFAULT_MIN_TRADES: usize = 1;

/// Parameter assignment that produced a run, keyed by parameter name.
pub type Params = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub costs: CostModel,
    pub fill_timing: FillTiming,
    pub allow_shorting: bool,
    pub gap_tolerance: f64,
    pub periods_per_year: f64,
    /// Runs with fewer trades are flagged and left out of ranking.
    pub min_trades: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 100_000.0,
            costs: CostModel::default(),
            fill_timing: FillTiming::NextOpen,
            allow_shorting: false,
            gap_tolerance: DEFAULT_GAP_TOLERANCE,
            periods_per_year: TRADING_DAYS_PER_YEAR,
            min_trades: DEFAULT_MIN_TRADES,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), BacktestError> {
        let invalid = |key: &str, reason: &str| {
            Err(BacktestError::ConfigInvalid {
                section: "backtest".into(),
                key: key.into(),
                reason: reason.into(),
            })
        };
        if !(self.initial_capital > 0.0 && self.initial_capital.is_finite()) {
            return invalid("initial_capital", "must be positive");
        }
        if !(self.gap_tolerance >= 1.0) {
            return invalid("gap_tolerance", "must be at least 1");
        }
        if !(self.periods_per_year > 0.0) {
            return invalid("periods_per_year", "must be positive");
        }
        self.costs.validate()
    }

    pub fn simulation(&self, initial_capital: f64, active_from: usize) -> SimulationConfig {
        SimulationConfig {
            initial_capital,
            costs: self.costs,
            fill_timing: self.fill_timing,
            allow_shorting: self.allow_shorting,
            gap_tolerance: self.gap_tolerance,
            active_from,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunFlag {
    StatisticalInsufficiency { trades: usize, required: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDiagnostics {
    pub signals: usize,
    pub conflicting_signals: Vec<SignalDiagnostic>,
    pub simulation: SimulationDiagnostics,
}

/// Frozen outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub symbol: String,
    pub strategy: StrategyConfig,
    pub params: Option<Params>,
    pub initial_capital: f64,
    pub final_cash: f64,
    /// Index of the first simulated bar.
    pub active_from: usize,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub diagnostics: RunDiagnostics,
    pub flags: Vec<RunFlag>,
}

impl RunResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(self.initial_capital)
    }

    pub fn is_insufficient(&self) -> bool {
        self.flags
            .iter()
            .any(|f| matches!(f, RunFlag::StatisticalInsufficiency { .. }))
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }
}

/// Run `strategy` over the whole series.
pub fn run_backtest(
    series: &BarSeries,
    strategy: &StrategyConfig,
    config: &BacktestConfig,
) -> Result<RunResult, BacktestError> {
    run_backtest_window(series, strategy, config, config.initial_capital, 0)
}

/// Run `strategy` over `series`, trading only from `active_from` on.
/// Earlier bars feed indicators and rule state.
pub fn run_backtest_window(
    series: &BarSeries,
    strategy: &StrategyConfig,
    config: &BacktestConfig,
    initial_capital: f64,
    active_from: usize,
) -> Result<RunResult, BacktestError> {
    strategy.validate()?;
    config.validate()?;
    let quality = ensure_usable(series, config.gap_tolerance)?;
    if quality.gap_count() > 0 {
        debug!(symbol = %series.symbol, gaps = quality.gap_count(), "series has gaps");
    }

    let indicators = compute_indicators(&series.bars, &strategy.required_indicators())?;
    let sim_config = config.simulation(initial_capital, active_from);

    let mut generator = SignalGenerator::new(strategy, &series.bars, &indicators);
    let mut signal_count = 0usize;
    let outcome = simulate(
        &sim_config,
        strategy,
        series,
        &indicators,
        generator.by_ref().inspect(|_| signal_count += 1),
    );
    let conflicting_signals = generator.into_diagnostics();

    let metrics = Metrics::compute(
        &outcome.trades,
        &outcome.equity_curve,
        initial_capital,
        config.periods_per_year,
    );

    let mut flags = Vec::new();
    if outcome.trades.len() < config.min_trades {
        flags.push(RunFlag::StatisticalInsufficiency {
            trades: outcome.trades.len(),
            required: config.min_trades,
        });
    }

    debug!(
        symbol = %series.symbol,
        strategy = %strategy.name,
        trades = outcome.trades.len(),
        total_return = metrics.total_return,
        "backtest complete"
    );

    Ok(RunResult {
        symbol: series.symbol.clone(),
        strategy: strategy.clone(),
        params: None,
        initial_capital,
        final_cash: outcome.final_cash,
        active_from,
        diagnostics: RunDiagnostics {
            signals: signal_count,
            conflicting_signals,
            simulation: outcome.diagnostics,
        },
        trades: outcome.trades,
        equity_curve: outcome.equity_curve,
        metrics,
        flags,
    })
}
