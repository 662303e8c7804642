#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::fmt::Write as _;
use std::path::Path;

use stratforge::adapters::file_config_adapter::FileConfigAdapter;
use stratforge::domain::backtest::BacktestConfig;
pub use stratforge::domain::ohlcv::{Bar, BarSeries};
use stratforge::domain::config_validation::build_strategy;
use stratforge::domain::strategy::StrategyConfig;

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Daily bars whose open equals the previous close.
pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Bar {
                timestamp: start() + TimeDelta::days(i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// Daily bars with open, high, low and close all equal.
pub fn flat_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: start() + TimeDelta::days(i as i64),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        })
        .collect()
}

pub fn daily_series(symbol: &str, bars: Vec<Bar>) -> BarSeries {
    BarSeries::new(symbol, TimeDelta::days(1), bars)
}

/// 40 closes: down from 100 to 85, up by 3 to 118, then down by 1 to 105.
pub fn up_then_down_prices() -> Vec<f64> {
    let mut prices: Vec<f64> = (0..16).map(|i| 100.0 - i as f64).collect();
    prices.extend((0..11).map(|k| 88.0 + 3.0 * k as f64));
    prices.extend((0..13).map(|k| 117.0 - k as f64));
    prices
}

pub fn strategy_from_ini(ini: &str) -> StrategyConfig {
    let adapter = FileConfigAdapter::from_string(ini).unwrap();
    build_strategy(&adapter).unwrap()
}

pub fn frictionless() -> BacktestConfig {
    BacktestConfig {
        min_trades: 0,
        ..Default::default()
    }
}

/// Write `bars` to `{dir}/{symbol}.csv` in the format the CSV source reads.
pub fn write_csv(dir: &Path, symbol: &str, bars: &[Bar]) {
    let mut out = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            b.timestamp.format("%Y-%m-%d"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        )
        .unwrap();
    }
    std::fs::write(dir.join(format!("{symbol}.csv")), out).unwrap();
}
