//! Optimization harness: parameter grids, parallel batches, ranking and
//! walk-forward validation.

pub mod grid;
pub mod harness;
pub mod ranking;
pub mod walk_forward;

pub use grid::{parse_axis, Constraint, ParamAxis, ParamGrid, StrategyTemplate};
pub use harness::{BatchReport, CancelToken, Optimizer, OptimizerConfig, RunRecord, RunStatus};
pub use ranking::{best, rank, Exclusion, RankedRun, RankingConfig};
pub use walk_forward::{
    windows, WalkForward, WalkForwardConfig, WalkForwardReport, WindowResult, WindowSpec,
};
