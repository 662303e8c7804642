//! JSON-lines result writer: one serde_json record per line.
//!
//! Every line carries a `record` tag (`run`, `ranking`, `window`,
//! `walk_forward`) so mixed output can be filtered with line tools.

use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::backtest::RunResult;
use crate::domain::error::BacktestError;
use crate::domain::metrics::Metrics;
use crate::optimize::ranking::RankedRun;
use crate::optimize::walk_forward::{WalkForwardReport, WindowResult};
use crate::ports::result_sink::ResultSink;

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record<'a> {
    Run(&'a RunResult),
    Ranking(&'a RankedRun),
    Window(&'a WindowResult),
    WalkForward {
        symbol: &'a str,
        windows: usize,
        trades: usize,
        initial_capital: f64,
        final_equity: f64,
        metrics: &'a Metrics,
    },
}

pub struct JsonLinesSink<W: Write> {
    writer: W,
    lines: usize,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, BacktestError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer, lines: 0 }
    }

    pub fn lines_written(&self) -> usize {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &Record<'_>) -> Result<(), BacktestError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn write_run(&mut self, result: &RunResult) -> Result<(), BacktestError> {
        self.write_record(&Record::Run(result))
    }

    fn write_ranking(&mut self, ranked: &[RankedRun]) -> Result<(), BacktestError> {
        for run in ranked {
            self.write_record(&Record::Ranking(run))?;
        }
        Ok(())
    }

    fn write_walk_forward(&mut self, report: &WalkForwardReport) -> Result<(), BacktestError> {
        for window in &report.windows {
            self.write_record(&Record::Window(window))?;
        }
        self.write_record(&Record::WalkForward {
            symbol: &report.symbol,
            windows: report.windows.len(),
            trades: report.trades.len(),
            initial_capital: report.initial_capital,
            final_equity: report.final_equity(),
            metrics: &report.metrics,
        })
    }

    fn finish(&mut self) -> Result<(), BacktestError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{run_backtest, BacktestConfig};
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::ohlcv::BarSeries;
    use crate::adapters::file_config_adapter::IniConfigParser;
    use crate::optimize::grid::StrategyTemplate;
    use chrono::TimeDelta;

    fn sample_run() -> RunResult {
        let series = BarSeries::new(
            "TEST",
            TimeDelta::days(1),
            make_bars(&[95.0, 99.0, 101.0, 105.0, 98.0, 97.0]),
        );
        let strategy = StrategyTemplate::new(
            "[strategy]\nentry_long = CROSS_ABOVE(close, 100)\nexit = CROSS_BELOW(close, 100)\n",
            IniConfigParser,
        )
        .instantiate(&Default::default())
        .unwrap();
        run_backtest(&series, &strategy, &BacktestConfig::default()).unwrap()
    }

    #[test]
    fn one_line_per_run() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let run = sample_run();
        sink.write_run(&run).unwrap();
        sink.write_run(&run).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.lines_written(), 2);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["record"], "run");
        assert_eq!(value["symbol"], "TEST");
        assert_eq!(value["trades"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn create_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("runs.jsonl");
        let mut sink = JsonLinesSink::create(&path).unwrap();
        sink.write_run(&sample_run()).unwrap();
        sink.finish().unwrap();
        drop(sink);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn infinite_and_undefined_metrics_stay_distinct() {
        let series = BarSeries::new(
            "UP",
            TimeDelta::days(1),
            make_bars(&[95.0, 99.0, 101.0, 105.0, 110.0, 115.0]),
        );
        let strategy = StrategyTemplate::new(
            "[strategy]\nentry_long = CROSS_ABOVE(close, 100)\n",
            IniConfigParser,
        )
        .instantiate(&Default::default())
        .unwrap();
        let winner = run_backtest(&series, &strategy, &BacktestConfig::default()).unwrap();
        assert!(winner.metrics.profit_factor.is_infinite());

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write_run(&winner).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
        assert_eq!(value["metrics"]["profit_factor"], "inf");
        assert_eq!(value["metrics"]["win_rate"], 1.0);
    }
}
