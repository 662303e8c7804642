//! Moving Average Convergence Divergence.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line, seeded with the SMA of the first
//! `signal` valid MACD values
//! Histogram = MACD Line - Signal Line
//!
//! Warmup: slow - 1 + signal - 1 bars.

use crate::domain::indicator::{
    calculate_ema, marker, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue,
};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(bars: &[Bar], fast: usize, slow: usize, signal_period: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    let macd_warmup = slow.saturating_sub(1).max(fast.saturating_sub(1));
    let signal_warmup = macd_warmup + signal_period.saturating_sub(1);

    if fast == 0 || slow == 0 || signal_period == 0 || bars.len() <= signal_warmup {
        return IndicatorSeries {
            indicator_type,
            values: bars.iter().map(|b| marker(b.timestamp)).collect(),
        };
    }

    let ema_fast = ema_raw_values(bars, fast);
    let ema_slow = ema_raw_values(bars, slow);
    let macd_line: Vec<f64> = ema_fast.iter().zip(&ema_slow).map(|(f, s)| f - s).collect();

    let k = 2.0 / (signal_period as f64 + 1.0);
    let seed: f64 = macd_line[macd_warmup..=signal_warmup].iter().sum::<f64>() / signal_period as f64;
    let mut signal_ema = seed;

    let mut values = Vec::with_capacity(bars.len());
    for (i, bar) in bars.iter().enumerate() {
        if i < signal_warmup {
            values.push(marker(bar.timestamp));
            continue;
        }
        if i > signal_warmup {
            signal_ema = macd_line[i] * k + signal_ema * (1.0 - k);
        }
        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid: true,
            value: IndicatorValue::Macd {
                line: macd_line[i],
                signal: signal_ema,
                histogram: macd_line[i] - signal_ema,
            },
        });
    }

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[Bar]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}

/// Raw EMA values, 0.0 in warm-up slots.
fn ema_raw_values(bars: &[Bar], period: usize) -> Vec<f64> {
    calculate_ema(bars, period)
        .values
        .iter()
        .map(|p| match p.value {
            IndicatorValue::Simple(v) if p.valid => v,
            _ => 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicator::test_support::make_bars;

    fn ramp(n: usize) -> Vec<Bar> {
        let prices: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        make_bars(&prices)
    }

    #[test]
    fn macd_warmup_default() {
        let series = calculate_macd_default(&ramp(40));

        let warmup = DEFAULT_SLOW - 1 + DEFAULT_SIGNAL - 1;
        for i in 0..warmup {
            assert!(!series.values[i].valid, "Index {} should not be valid", i);
        }
        assert!(series.values[warmup].valid);
    }

    #[test]
    fn macd_histogram_equals_line_minus_signal() {
        let series = calculate_macd_default(&ramp(40));

        for point in series.values.iter().filter(|p| p.valid) {
            if let IndicatorValue::Macd {
                line,
                signal,
                histogram,
            } = point.value
            {
                assert!((histogram - (line - signal)).abs() < f64::EPSILON);
            } else {
                panic!("Expected Macd value");
            }
        }
    }

    #[test]
    fn macd_short_input_is_all_marker() {
        let bars = make_bars(&[100.0, 101.0, 102.0]);
        let series = calculate_macd(&bars, 5, 10, 3);

        assert_eq!(
            series.indicator_type,
            IndicatorType::Macd {
                fast: 5,
                slow: 10,
                signal: 3
            }
        );
        assert_eq!(series.values.len(), 3);
        assert!(series.values.iter().all(|p| !p.valid));
    }

    #[test]
    fn macd_zero_period_keeps_length() {
        let bars = make_bars(&[100.0, 101.0, 102.0]);
        assert_eq!(calculate_macd(&bars, 0, 26, 9).values.len(), 3);
        assert_eq!(calculate_macd(&bars, 12, 0, 9).values.len(), 3);
        assert_eq!(calculate_macd(&bars, 12, 26, 0).values.len(), 3);
    }

    #[test]
    fn macd_line_is_ema_fast_minus_ema_slow() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]);
        let series = calculate_macd(&bars, 3, 5, 2);

        let ema_fast = ema_raw_values(&bars, 3);
        let ema_slow = ema_raw_values(&bars, 5);

        for (i, point) in series.values.iter().enumerate().filter(|(_, p)| p.valid) {
            if let IndicatorValue::Macd { line, .. } = point.value {
                let expected_line = ema_fast[i] - ema_slow[i];
                assert!((line - expected_line).abs() < f64::EPSILON, "index {}", i);
            }
        }
    }

    #[test]
    fn macd_signal_seeded_with_sma_of_line() {
        let bars = make_bars(&[10.0, 12.0, 11.0, 15.0, 14.0, 18.0, 17.0, 21.0]);
        let series = calculate_macd(&bars, 2, 4, 3);
        let ema_fast = ema_raw_values(&bars, 2);
        let ema_slow = ema_raw_values(&bars, 4);
        let line: Vec<f64> = (3..=5).map(|i| ema_fast[i] - ema_slow[i]).collect();
        let seed = line.iter().sum::<f64>() / 3.0;

        match series.values[5].value {
            IndicatorValue::Macd { signal, .. } => assert!((signal - seed).abs() < 1e-12),
            _ => panic!("Expected Macd value"),
        }
    }

    #[test]
    fn macd_custom_parameters() {
        let series = calculate_macd(&ramp(20), 5, 10, 3);

        let warmup = 10 - 1 + 3 - 1;
        assert!(!series.values[warmup - 1].valid);
        assert!(series.values[warmup].valid);
    }
}
