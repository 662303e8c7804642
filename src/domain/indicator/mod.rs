//! Technical indicator implementations.
//!
//! Every indicator maps a bar slice to a series of the same length. Points in
//! the warm-up window carry `valid == false`; they are the "insufficient
//! history" marker and their `value` must not be read.
//!
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: A time series of indicator values

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stddev;
pub mod wma;

pub use atr::calculate_atr;
pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use roc::calculate_roc;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
pub use stddev::calculate_stddev;
pub use wma::calculate_wma;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::error::BacktestError;
use crate::domain::ohlcv::Bar;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorPoint {
    pub timestamp: NaiveDateTime,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Wma(usize),
    Rsi(usize),
    Roc(usize),
    Atr(usize),
    Stddev(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Number of leading invalid points.
    pub fn warmup_len(&self) -> usize {
        self.values.iter().take_while(|p| !p.valid).count()
    }

    pub fn simple_value(&self, index: usize) -> Option<f64> {
        match self.values.get(index) {
            Some(IndicatorPoint {
                valid: true,
                value: IndicatorValue::Simple(v),
                ..
            }) => Some(*v),
            _ => None,
        }
    }
}

impl IndicatorType {
    /// Reject parameter sets no series length could make meaningful.
    pub fn validate(&self) -> Result<(), BacktestError> {
        let invalid = |reason: &str| {
            Err(BacktestError::InvalidParameter {
                indicator: self.to_string(),
                reason: reason.to_string(),
            })
        };
        match *self {
            IndicatorType::Sma(p)
            | IndicatorType::Ema(p)
            | IndicatorType::Wma(p)
            | IndicatorType::Rsi(p)
            | IndicatorType::Roc(p)
            | IndicatorType::Atr(p)
            | IndicatorType::Stddev(p) => {
                if p == 0 {
                    return invalid("period must be positive");
                }
            }
            IndicatorType::Macd { fast, slow, signal } => {
                if fast == 0 || slow == 0 || signal == 0 {
                    return invalid("periods must be positive");
                }
                if fast >= slow {
                    return invalid("fast period must be shorter than slow period");
                }
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                if period == 0 {
                    return invalid("period must be positive");
                }
                if stddev_mult_x100 == 0 {
                    return invalid("stddev multiplier must be positive");
                }
            }
        }
        Ok(())
    }

    /// Index of the first valid point (the warm-up length).
    pub fn warmup(&self) -> usize {
        match *self {
            IndicatorType::Sma(p)
            | IndicatorType::Ema(p)
            | IndicatorType::Wma(p)
            | IndicatorType::Atr(p)
            | IndicatorType::Stddev(p) => p.saturating_sub(1),
            IndicatorType::Bollinger { period, .. } => period.saturating_sub(1),
            IndicatorType::Rsi(p) | IndicatorType::Roc(p) => p,
            IndicatorType::Macd { slow, signal, .. } => {
                slow.saturating_sub(1) + signal.saturating_sub(1)
            }
        }
    }
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Wma(period) => write!(f, "WMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Roc(period) => write!(f, "ROC({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Stddev(period) => write!(f, "STDDEV({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}

/// Compute one indicator over `bars`.
///
/// Fails only on invalid parameters. A series shorter than the lookback
/// yields an all-invalid output of the same length.
pub fn compute(bars: &[Bar], indicator: &IndicatorType) -> Result<IndicatorSeries, BacktestError> {
    indicator.validate()?;
    let series = match *indicator {
        IndicatorType::Sma(p) => calculate_sma(bars, p),
        IndicatorType::Ema(p) => calculate_ema(bars, p),
        IndicatorType::Wma(p) => calculate_wma(bars, p),
        IndicatorType::Rsi(p) => calculate_rsi(bars, p),
        IndicatorType::Roc(p) => calculate_roc(bars, p),
        IndicatorType::Atr(p) => calculate_atr(bars, p),
        IndicatorType::Stddev(p) => calculate_stddev(bars, p),
        IndicatorType::Macd { fast, slow, signal } => calculate_macd(bars, fast, slow, signal),
        IndicatorType::Bollinger {
            period,
            stddev_mult_x100,
        } => calculate_bollinger(bars, period, stddev_mult_x100),
    };
    debug_assert_eq!(series.values.len(), bars.len());
    Ok(series)
}

/// Compute each distinct indicator once.
pub fn compute_indicators(
    bars: &[Bar],
    indicators: &[IndicatorType],
) -> Result<HashMap<IndicatorType, IndicatorSeries>, BacktestError> {
    let mut out = HashMap::with_capacity(indicators.len());
    for ind in indicators {
        if !out.contains_key(ind) {
            out.insert(ind.clone(), compute(bars, ind)?);
        }
    }
    Ok(out)
}

/// Invalid point used for warm-up slots.
pub(crate) fn marker(timestamp: NaiveDateTime) -> IndicatorPoint {
    IndicatorPoint {
        timestamp,
        valid: false,
        value: IndicatorValue::Simple(0.0),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ohlcv::Bar;
    use chrono::{NaiveDate, TimeDelta};

    pub fn make_bars(prices: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + TimeDelta::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    pub fn simple(series: &super::IndicatorSeries, i: usize) -> f64 {
        match series.values[i].value {
            super::IndicatorValue::Simple(v) => v,
            _ => panic!("expected Simple value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_bars;
    use super::*;

    #[test]
    fn indicator_type_display() {
        assert_eq!(IndicatorType::Sma(20).to_string(), "SMA(20)");
        let macd = IndicatorType::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        assert_eq!(macd.to_string(), "MACD(12,26,9)");
        let boll = IndicatorType::Bollinger {
            period: 20,
            stddev_mult_x100: 200,
        };
        assert_eq!(boll.to_string(), "BOLLINGER(20,2)");
    }

    #[test]
    fn zero_period_is_invalid_parameter() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let err = compute(&bars, &IndicatorType::Sma(0)).unwrap_err();
        assert!(matches!(err, BacktestError::InvalidParameter { .. }));
    }

    #[test]
    fn macd_fast_not_below_slow_is_invalid() {
        let bars = make_bars(&[1.0; 40]);
        let ind = IndicatorType::Macd {
            fast: 26,
            slow: 12,
            signal: 9,
        };
        assert!(compute(&bars, &ind).is_err());
    }

    #[test]
    fn short_series_is_all_marker_not_error() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        for ind in [
            IndicatorType::Sma(10),
            IndicatorType::Ema(10),
            IndicatorType::Wma(10),
            IndicatorType::Rsi(10),
            IndicatorType::Roc(10),
            IndicatorType::Atr(10),
            IndicatorType::Stddev(10),
            IndicatorType::Macd {
                fast: 3,
                slow: 6,
                signal: 4,
            },
            IndicatorType::Bollinger {
                period: 10,
                stddev_mult_x100: 200,
            },
        ] {
            let series = compute(&bars, &ind).unwrap();
            assert_eq!(series.values.len(), 3, "{ind}");
            assert!(series.values.iter().all(|p| !p.valid), "{ind}");
        }
    }

    #[test]
    fn warmup_matches_computed_marker_run() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let bars = make_bars(&prices);
        for ind in [
            IndicatorType::Sma(5),
            IndicatorType::Ema(7),
            IndicatorType::Wma(4),
            IndicatorType::Rsi(14),
            IndicatorType::Roc(3),
            IndicatorType::Atr(14),
            IndicatorType::Stddev(6),
            IndicatorType::Macd {
                fast: 12,
                slow: 26,
                signal: 9,
            },
            IndicatorType::Bollinger {
                period: 20,
                stddev_mult_x100: 200,
            },
        ] {
            let series = compute(&bars, &ind).unwrap();
            assert_eq!(series.warmup_len(), ind.warmup(), "{ind}");
        }
    }

    #[test]
    fn compute_indicators_dedups() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0]);
        let map = compute_indicators(
            &bars,
            &[IndicatorType::Sma(2), IndicatorType::Sma(2), IndicatorType::Ema(2)],
        )
        .unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn indicator_type_hash_eq() {
        let mut map = HashMap::new();
        map.insert(IndicatorType::Sma(20), "sma20");
        map.insert(IndicatorType::Sma(50), "sma50");
        assert_eq!(map.get(&IndicatorType::Sma(20)), Some(&"sma20"));
        assert_eq!(map.get(&IndicatorType::Sma(50)), Some(&"sma50"));
    }
}
