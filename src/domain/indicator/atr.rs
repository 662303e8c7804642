//! Average True Range.
//!
//! TR[0] = high - low; TR[i] = max(H-L, |H-Cprev|, |L-Cprev|).
//! Seeded with the mean of the first n true ranges, then Wilder-smoothed:
//! ATR[i] = (ATR[i-1] * (n-1) + TR[i]) / n
//! Warmup: first (n-1) bars are invalid.

use crate::domain::indicator::{marker, IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;

pub fn calculate_atr(bars: &[Bar], period: usize) -> IndicatorSeries {
    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Atr(period),
            values: bars.iter().map(|b| marker(b.timestamp)).collect(),
        };
    }

    let n = period as f64;
    let mut values = Vec::with_capacity(bars.len());
    let mut atr = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            bar.true_range(bars[i - 1].close)
        };

        if i + 1 < period {
            atr += tr;
            values.push(marker(bar.timestamp));
            continue;
        }

        atr = if i + 1 == period {
            (atr + tr) / n
        } else {
            (atr * (n - 1.0) + tr) / n
        };
        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid: true,
            value: IndicatorValue::Simple(atr),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values,
    }
}
