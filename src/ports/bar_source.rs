//! Bar data port trait.

use chrono::NaiveDateTime;

use crate::domain::error::BacktestError;
use crate::domain::ohlcv::BarSeries;

pub trait BarSource {
    /// Bars for `symbol` with `start <= timestamp <= end`, ordered by
    /// timestamp. An open bound means no limit on that side.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<BarSeries, BacktestError>;
}
