//! Composite ranking of a batch.
//!
//! score = 0.30 × win rate + 0.30 × norm(Sharpe) + 0.25 × norm(total return)
//!         − 0.15 × max drawdown
//!
//! `norm` is min-max over the eligible runs of the batch (0 when every value
//! is equal). Ineligible runs stay in the output with their exclusion reason.

use serde::Serialize;
use std::cmp::Ordering;

use crate::domain::backtest::{Params, RunFlag};
use crate::domain::config_validation::read_f64;
use crate::domain::error::BacktestError;
use crate::domain::metrics::Metrics;
use crate::optimize::harness::{BatchReport, RunStatus};
use crate::ports::config_port::ConfigPort;

pub const WIN_RATE_WEIGHT: f64 = 0.30;
pub const SHARPE_WEIGHT: f64 = 0.30;
pub const RETURN_WEIGHT: f64 = 0.25;
pub const DRAWDOWN_WEIGHT: f64 = 0.15;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingConfig {
    /// Runs with a lower Sharpe ratio are excluded.
    pub min_sharpe: Option<f64>,
}

impl RankingConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BacktestError> {
        Ok(RankingConfig {
            min_sharpe: read_f64(config, "optimize", "min_sharpe")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Exclusion {
    Failed { reason: String },
    Cancelled,
    InsufficientTrades { trades: usize, required: usize },
    SharpeBelowMinimum { sharpe: f64, minimum: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedRun {
    /// Grid position of the run.
    pub index: usize,
    pub params: Params,
    /// 1-based; `None` for excluded runs.
    pub rank: Option<usize>,
    pub score: Option<f64>,
    pub metrics: Option<Metrics>,
    pub exclusion: Option<Exclusion>,
}

fn exclusion(status: &RunStatus, config: &RankingConfig) -> Option<Exclusion> {
    let result = match status {
        RunStatus::Failed { reason } => {
            return Some(Exclusion::Failed {
                reason: reason.clone(),
            });
        }
        RunStatus::Cancelled => return Some(Exclusion::Cancelled),
        RunStatus::Completed(result) => result,
    };
    if let Some(RunFlag::StatisticalInsufficiency { trades, required }) = result.flags.first() {
        return Some(Exclusion::InsufficientTrades {
            trades: *trades,
            required: *required,
        });
    }
    match config.min_sharpe {
        Some(minimum) if result.metrics.sharpe_ratio < minimum => {
            Some(Exclusion::SharpeBelowMinimum {
                sharpe: result.metrics.sharpe_ratio,
                minimum,
            })
        }
        _ => None,
    }
}

struct Range {
    min: f64,
    max: f64,
}

impl Range {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        values.fold(
            Range {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |r, v| Range {
                min: r.min.min(v),
                max: r.max.max(v),
            },
        )
    }

    fn normalize(&self, v: f64) -> f64 {
        let span = self.max - self.min;
        if span > 0.0 && span.is_finite() {
            (v - self.min) / span
        } else {
            0.0
        }
    }
}

fn or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Rank the completed, eligible runs of `report`; excluded runs follow in
/// grid order. Equal scores keep grid order.
pub fn rank(report: &BatchReport, config: &RankingConfig) -> Vec<RankedRun> {
    let mut eligible = Vec::new();
    let mut excluded = Vec::new();

    for record in &report.records {
        let metrics = record.result().map(|r| r.metrics.clone());
        match exclusion(&record.status, config) {
            Some(reason) => excluded.push(RankedRun {
                index: record.index,
                params: record.params.clone(),
                rank: None,
                score: None,
                metrics,
                exclusion: Some(reason),
            }),
            None => eligible.push(RankedRun {
                index: record.index,
                params: record.params.clone(),
                rank: None,
                score: None,
                metrics,
                exclusion: None,
            }),
        }
    }

    let scored = || eligible.iter().filter_map(|r| r.metrics.as_ref());
    let sharpe = Range::of(scored().map(|m| or_zero(m.sharpe_ratio)));
    let returns = Range::of(scored().map(|m| or_zero(m.total_return)));

    for run in &mut eligible {
        if let Some(m) = &run.metrics {
            run.score = Some(
                WIN_RATE_WEIGHT * or_zero(m.win_rate)
                    + SHARPE_WEIGHT * sharpe.normalize(or_zero(m.sharpe_ratio))
                    + RETURN_WEIGHT * returns.normalize(or_zero(m.total_return))
                    - DRAWDOWN_WEIGHT * or_zero(m.max_drawdown),
            );
        }
    }

    eligible.sort_by(|a, b| {
        let score = |r: &RankedRun| r.score.unwrap_or(f64::NEG_INFINITY);
        score(b)
            .partial_cmp(&score(a))
            .unwrap_or(Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
    for (i, run) in eligible.iter_mut().enumerate() {
        run.rank = Some(i + 1);
    }

    eligible.extend(excluded);
    eligible
}

/// The top-ranked run, if any run was eligible.
pub fn best(ranked: &[RankedRun]) -> Option<&RankedRun> {
    ranked.iter().find(|r| r.rank == Some(1))
}
