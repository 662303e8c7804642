//! Result output port trait.

use crate::domain::backtest::RunResult;
use crate::domain::error::BacktestError;
use crate::optimize::harness::BatchReport;
use crate::optimize::ranking::RankedRun;
use crate::optimize::walk_forward::WalkForwardReport;

/// Destination for finished runs. Sinks are written from a single thread.
pub trait ResultSink {
    fn write_run(&mut self, result: &RunResult) -> Result<(), BacktestError>;

    /// Default implementation: writes every completed run in batch order.
    fn write_batch(&mut self, report: &BatchReport) -> Result<(), BacktestError> {
        for result in report.completed() {
            self.write_run(result)?;
        }
        Ok(())
    }

    fn write_ranking(&mut self, _ranked: &[RankedRun]) -> Result<(), BacktestError> {
        Ok(())
    }

    /// Default implementation: writes each window's out-of-sample run.
    fn write_walk_forward(&mut self, report: &WalkForwardReport) -> Result<(), BacktestError> {
        for result in report.windows.iter().filter_map(|w| w.out_of_sample.as_ref()) {
            self.write_run(result)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BacktestError> {
        Ok(())
    }
}
