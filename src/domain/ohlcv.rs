//! OHLCV bar and bar series representation.

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// A timestamp discontinuity between two consecutive bars.
#[derive(Debug, Clone, PartialEq)]
pub struct Gap {
    /// Index of the bar that follows the gap.
    pub index: usize,
    pub delta: TimeDelta,
}

/// Bars for a single instrument at a fixed nominal interval.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub symbol: String,
    pub interval: TimeDelta,
    pub bars: Vec<Bar>,
}

impl BarSeries {
    pub fn new(symbol: impl Into<String>, interval: TimeDelta, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            bars,
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Gaps where consecutive timestamps are further apart than
    /// `interval * tolerance`.
    pub fn gaps(&self, tolerance: f64) -> Vec<Gap> {
        find_gaps(&self.bars, self.interval, tolerance)
    }

    /// Sub-series covering bars `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> BarSeries {
        let end = end.min(self.bars.len());
        let start = start.min(end);
        BarSeries {
            symbol: self.symbol.clone(),
            interval: self.interval,
            bars: self.bars[start..end].to_vec(),
        }
    }
}

pub fn find_gaps(bars: &[Bar], interval: TimeDelta, tolerance: f64) -> Vec<Gap> {
    let limit_ms = interval.num_milliseconds() as f64 * tolerance;
    bars.windows(2)
        .enumerate()
        .filter_map(|(i, w)| {
            let delta = w[1].timestamp - w[0].timestamp;
            if delta.num_milliseconds() as f64 > limit_ms {
                Some(Gap { index: i + 1, delta })
            } else {
                None
            }
        })
        .collect()
}
