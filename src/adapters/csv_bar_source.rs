//! CSV bar source: one `{symbol}.csv` file per instrument.
//!
//! Columns are positional: `timestamp,open,high,low,close,volume`, with a
//! header row. Rows are returned in file order; ordering and price sanity
//! are checked by the engine, not here.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use csv::StringRecord;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::error::BacktestError;
use crate::domain::ohlcv::{Bar, BarSeries};
use crate::ports::bar_source::BarSource;

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct CsvBarSource {
    base_path: PathBuf,
    interval: Option<TimeDelta>,
}

impl CsvBarSource {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            interval: None,
        }
    }

    /// Use a fixed bar interval instead of inferring it from the data.
    pub fn with_interval(mut self, interval: TimeDelta) -> Self {
        self.interval = Some(interval);
        self
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Smallest positive spacing between consecutive bars; one day when the
/// series is too short to tell.
pub fn infer_interval(bars: &[Bar]) -> TimeDelta {
    bars.windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|d| *d > TimeDelta::zero())
        .min()
        .unwrap_or_else(|| TimeDelta::days(1))
}

fn field(record: &StringRecord, index: usize, name: &str, line: u64) -> Result<f64, BacktestError> {
    let raw = record.get(index).ok_or_else(|| BacktestError::DataSource {
        reason: format!("line {line}: missing {name} column"),
    })?;
    raw.trim().parse().map_err(|e| BacktestError::DataSource {
        reason: format!("line {line}: invalid {name} value '{raw}': {e}"),
    })
}

fn parse_record(record: &StringRecord) -> Result<Bar, BacktestError> {
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    let raw = record.get(0).ok_or_else(|| BacktestError::DataSource {
        reason: format!("line {line}: missing timestamp column"),
    })?;
    let timestamp = parse_timestamp(raw).ok_or_else(|| BacktestError::DataSource {
        reason: format!("line {line}: unrecognised timestamp '{raw}'"),
    })?;
    Ok(Bar {
        timestamp,
        open: field(record, 1, "open", line)?,
        high: field(record, 2, "high", line)?,
        low: field(record, 3, "low", line)?,
        close: field(record, 4, "close", line)?,
        volume: field(record, 5, "volume", line)?,
    })
}

impl BarSource for CsvBarSource {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<BarSeries, BacktestError> {
        let path = self.csv_path(symbol);
        let mut rdr = match csv::Reader::from_path(&path) {
            Ok(rdr) => rdr,
            Err(e) => {
                if let csv::ErrorKind::Io(io) = e.kind() {
                    if io.kind() == ErrorKind::NotFound {
                        return Err(BacktestError::NoData {
                            symbol: symbol.to_string(),
                        });
                    }
                }
                return Err(e.into());
            }
        };

        let mut bars = Vec::new();
        for result in rdr.records() {
            let bar = parse_record(&result?)?;
            if start.is_some_and(|s| bar.timestamp < s) || end.is_some_and(|e| bar.timestamp > e) {
                continue;
            }
            bars.push(bar);
        }

        let interval = self.interval.unwrap_or_else(|| infer_interval(&bars));
        debug!(
            symbol,
            path = %path.display(),
            bars = bars.len(),
            interval_secs = interval.num_seconds(),
            "loaded bars"
        );
        Ok(BarSeries::new(symbol, interval, bars))
    }
}
