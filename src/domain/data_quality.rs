//! Bar series validation.
//!
//! Severe problems (broken OHLC ordering, non-monotonic timestamps) make a
//! series unusable and skip the run. Timestamp gaps are minor: they are
//! reported here and handled by the simulator.

use crate::domain::error::BacktestError;
use crate::domain::ohlcv::{BarSeries, Gap};

#[derive(Debug, Clone, PartialEq)]
pub enum DataIssue {
    InvalidOhlc { index: usize, reason: String },
    NonMonotonicTimestamp { index: usize },
    Gap(Gap),
}

impl DataIssue {
    pub fn is_severe(&self) -> bool {
        !matches!(self, DataIssue::Gap(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataQualityReport {
    pub issues: Vec<DataIssue>,
}

impl DataQualityReport {
    pub fn severe(&self) -> impl Iterator<Item = &DataIssue> {
        self.issues.iter().filter(|i| i.is_severe())
    }

    pub fn gap_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| matches!(i, DataIssue::Gap(_)))
            .count()
    }
}

/// Check a single bar's price fields.
pub fn check_ohlc(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Result<(), String> {
    let prices = [open, high, low, close];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err("prices must be positive and finite".into());
    }
    if !volume.is_finite() || volume < 0.0 {
        return Err("volume must be non-negative".into());
    }
    if high < open.max(close) {
        return Err(format!("high {high} below max(open, close)"));
    }
    if low > open.min(close) {
        return Err(format!("low {low} above min(open, close)"));
    }
    Ok(())
}

pub fn assess(series: &BarSeries, gap_tolerance: f64) -> DataQualityReport {
    let mut issues = Vec::new();

    for (i, bar) in series.bars.iter().enumerate() {
        if let Err(reason) = check_ohlc(bar.open, bar.high, bar.low, bar.close, bar.volume) {
            issues.push(DataIssue::InvalidOhlc { index: i, reason });
        }
        if i > 0 && bar.timestamp <= series.bars[i - 1].timestamp {
            issues.push(DataIssue::NonMonotonicTimestamp { index: i });
        }
    }

    issues.extend(series.gaps(gap_tolerance).into_iter().map(DataIssue::Gap));

    DataQualityReport { issues }
}

/// Reject a series that cannot be backtested. Gaps pass through.
pub fn ensure_usable(
    series: &BarSeries,
    gap_tolerance: f64,
) -> Result<DataQualityReport, BacktestError> {
    if series.is_empty() {
        return Err(BacktestError::NoData {
            symbol: series.symbol.clone(),
        });
    }

    let report = assess(series, gap_tolerance);
    if let Some(issue) = report.severe().next() {
        let reason = match issue {
            DataIssue::InvalidOhlc { index, reason } => {
                format!("invalid OHLC at bar {index}: {reason}")
            }
            DataIssue::NonMonotonicTimestamp { index } => {
                format!("non-monotonic timestamp at bar {index}")
            }
            DataIssue::Gap(_) => unreachable!("gaps are never severe"),
        };
        return Err(BacktestError::DataQuality {
            symbol: series.symbol.clone(),
            reason,
        });
    }
    Ok(report)
}
