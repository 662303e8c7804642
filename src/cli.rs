//! CLI definition and dispatch.
//!
//! Exit codes: 0 success, 1 I/O or harness failure, 2 configuration error,
//! 4 rule error, 5 data error.

use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

use crate::adapters::csv_bar_source::{parse_timestamp, CsvBarSource};
use crate::adapters::csv_ledger_sink::{format_params, CsvLedgerSink};
use crate::adapters::file_config_adapter::{FileConfigAdapter, IniConfigParser};
use crate::adapters::json_lines_sink::JsonLinesSink;
use crate::domain::backtest::{run_backtest, RunResult};
use crate::domain::config_validation::{
    build_aliases, build_backtest_config, build_strategy, read_string,
};
use crate::domain::error::BacktestError;
use crate::domain::metrics::Metrics;
use crate::domain::ohlcv::BarSeries;
use crate::domain::rule_parser::{self, Aliases};
use crate::optimize::grid::{ParamGrid, StrategyTemplate};
use crate::optimize::harness::{Optimizer, OptimizerConfig};
use crate::optimize::ranking::{rank, RankedRun, RankingConfig};
use crate::optimize::walk_forward::{WalkForward, WalkForwardConfig, WalkForwardReport};
use crate::ports::bar_source::BarSource;
use crate::ports::config_port::ConfigPort;
use crate::ports::result_sink::ResultSink;

#[derive(Parser, Debug)]
#[command(name = "stratforge", about = "Event-driven strategy backtester and optimizer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one strategy over one symbol
    Backtest {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Backtest every assignment of a parameter grid and rank the results
    Optimize {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        output: OutputArgs,
        /// Worker threads (defaults to [optimize] workers, then one per core)
        #[arg(long)]
        workers: Option<usize>,
        /// Ranked runs to print
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Optimize on rolling in-sample windows and evaluate out of sample
    WalkForward {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        output: OutputArgs,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        train_bars: Option<usize>,
        #[arg(long)]
        test_bars: Option<usize>,
        #[arg(long)]
        step_bars: Option<usize>,
    },
    /// Validate a strategy configuration
    Validate {
        #[arg(short, long)]
        strategy: PathBuf,
        /// Engine configuration to validate alongside the strategy
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Engine configuration ([backtest], [optimize], [grid], [walk_forward])
    #[arg(short, long)]
    pub config: PathBuf,
    /// Strategy document; defaults to the configuration file
    #[arg(short, long)]
    pub strategy: Option<PathBuf>,
    /// Overrides [backtest] symbol
    #[arg(long)]
    pub symbol: Option<String>,
    /// Directory holding `{symbol}.csv`; overrides [backtest] data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// First bar timestamp to load; overrides [backtest] start_date
    #[arg(long)]
    pub start: Option<String>,
    /// Last bar timestamp to load; overrides [backtest] end_date
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One JSON record per line, written to the output file
    #[default]
    Jsonl,
    /// Trade, equity and metrics tables, written to the output directory
    Csv,
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Results file (jsonl) or directory (csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Jsonl)]
    pub format: OutputFormat,
}

pub fn run(cli: Cli) -> ExitCode {
    let outcome = match cli.command {
        Command::Backtest { input, output } => run_backtest_command(&input, &output),
        Command::Optimize {
            input,
            output,
            workers,
            top,
        } => run_optimize(&input, &output, workers, top),
        Command::WalkForward {
            input,
            output,
            workers,
            train_bars,
            test_bars,
            step_bars,
        } => run_walk_forward(&input, &output, workers, (train_bars, test_bars, step_bars)),
        Command::Validate { strategy, config } => run_validate(&strategy, config.as_deref()),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, BacktestError> {
    FileConfigAdapter::from_file(path).map_err(|e| BacktestError::ConfigParse {
        file: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn load_template(input: &InputArgs) -> Result<StrategyTemplate, BacktestError> {
    let path = input.strategy.as_ref().unwrap_or(&input.config);
    Ok(StrategyTemplate::new(fs::read_to_string(path)?, IniConfigParser))
}

fn parse_bound(
    value: Option<String>,
    config: &dyn ConfigPort,
    key: &str,
) -> Result<Option<NaiveDateTime>, BacktestError> {
    match value.or_else(|| read_string(config, "backtest", key)) {
        None => Ok(None),
        Some(text) => parse_timestamp(&text).map(Some).ok_or_else(|| {
            BacktestError::ConfigInvalid {
                section: "backtest".into(),
                key: key.into(),
                reason: format!("unrecognised timestamp '{text}'"),
            }
        }),
    }
}

/// Load the bars selected by the command line, falling back to `[backtest]`.
pub fn load_series(input: &InputArgs, config: &dyn ConfigPort) -> Result<BarSeries, BacktestError> {
    let symbol = input
        .symbol
        .clone()
        .or_else(|| read_string(config, "backtest", "symbol"))
        .ok_or_else(|| BacktestError::ConfigMissing {
            section: "backtest".into(),
            key: "symbol".into(),
        })?;
    let data_dir = input
        .data_dir
        .clone()
        .or_else(|| read_string(config, "backtest", "data_dir").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let start = parse_bound(input.start.clone(), config, "start_date")?;
    let end = parse_bound(input.end.clone(), config, "end_date")?;

    let series = CsvBarSource::new(&data_dir).fetch_bars(&symbol, start, end)?;
    info!(symbol = %symbol, bars = series.len(), dir = %data_dir.display(), "loaded series");
    Ok(series)
}

fn open_sink(output: &OutputArgs) -> Result<Option<Box<dyn ResultSink>>, BacktestError> {
    let Some(path) = &output.output else {
        return Ok(None);
    };
    let sink: Box<dyn ResultSink> = match output.format {
        OutputFormat::Jsonl => Box::new(JsonLinesSink::create(path)?),
        OutputFormat::Csv => Box::new(CsvLedgerSink::new(path)?),
    };
    Ok(Some(sink))
}

fn run_backtest_command(input: &InputArgs, output: &OutputArgs) -> Result<(), BacktestError> {
    let config = load_config(&input.config)?;
    let backtest = build_backtest_config(&config)?;
    let strategy = match &input.strategy {
        Some(path) => build_strategy(&load_config(path)?)?,
        None => build_strategy(&config)?,
    };
    let series = load_series(input, &config)?;

    let result = run_backtest(&series, &strategy, &backtest)?;
    print_run(&result);

    if let Some(mut sink) = open_sink(output)? {
        sink.write_run(&result)?;
        sink.finish()?;
    }
    Ok(())
}

fn optimizer_config(
    config: &dyn ConfigPort,
    workers: Option<usize>,
) -> Result<OptimizerConfig, BacktestError> {
    let mut optimizer = OptimizerConfig::from_config(config)?;
    if let Some(n) = workers {
        optimizer.workers = n;
    }
    Ok(optimizer)
}

fn run_optimize(
    input: &InputArgs,
    output: &OutputArgs,
    workers: Option<usize>,
    top: usize,
) -> Result<(), BacktestError> {
    let config = load_config(&input.config)?;
    let backtest = build_backtest_config(&config)?;
    let grid = ParamGrid::from_config(&config)?;
    let ranking = RankingConfig::from_config(&config)?;
    let template = load_template(input)?;
    let series = load_series(input, &config)?;

    let report = Optimizer::new(&template, &grid, &backtest)
        .with_config(optimizer_config(&config, workers)?)
        .run(&series)?;
    let ranked = rank(&report, &ranking);
    print_ranking(&ranked, top);
    println!(
        "{} runs: {} completed, {} failed, {} cancelled",
        report.records.len(),
        report.completed_count(),
        report.failed_count(),
        report.cancelled_count()
    );

    if let Some(mut sink) = open_sink(output)? {
        sink.write_batch(&report)?;
        sink.write_ranking(&ranked)?;
        sink.finish()?;
    }
    Ok(())
}

fn run_walk_forward(
    input: &InputArgs,
    output: &OutputArgs,
    workers: Option<usize>,
    (train_bars, test_bars, step_bars): (Option<usize>, Option<usize>, Option<usize>),
) -> Result<(), BacktestError> {
    let config = load_config(&input.config)?;
    let backtest = build_backtest_config(&config)?;
    let grid = ParamGrid::from_config(&config)?;
    let ranking = RankingConfig::from_config(&config)?;
    let template = load_template(input)?;

    let wf = match (train_bars, test_bars) {
        (Some(train_bars), Some(test_bars)) => WalkForwardConfig {
            train_bars,
            test_bars,
            step_bars,
        },
        _ => {
            let mut wf = WalkForwardConfig::from_config(&config)?;
            wf.train_bars = train_bars.unwrap_or(wf.train_bars);
            wf.test_bars = test_bars.unwrap_or(wf.test_bars);
            wf.step_bars = step_bars.or(wf.step_bars);
            wf
        }
    };
    let series = load_series(input, &config)?;

    let report = WalkForward::new(&template, &grid, &backtest, wf)
        .with_optimizer(optimizer_config(&config, workers)?)
        .with_ranking(ranking)
        .run(&series)?;
    print_walk_forward(&report);

    if let Some(mut sink) = open_sink(output)? {
        sink.write_walk_forward(&report)?;
        sink.finish()?;
    }
    Ok(())
}

fn run_validate(strategy_path: &Path, config_path: Option<&Path>) -> Result<(), BacktestError> {
    eprintln!("Validating strategy: {}", strategy_path.display());
    let adapter = load_config(strategy_path)?;
    let template = StrategyTemplate::new(fs::read_to_string(strategy_path)?, IniConfigParser);
    let placeholders = template.placeholders();

    if let Some(path) = config_path {
        let config = load_config(path)?;
        build_backtest_config(&config)?;
        eprintln!("Engine configuration {} is valid.", path.display());
        if !placeholders.is_empty() {
            let grid = ParamGrid::from_config(&config)?;
            eprintln!("Grid: {} assignments", grid.assignments().len());
        }
    }

    if !placeholders.is_empty() {
        eprintln!("Template placeholders: {}", placeholders.join(", "));
        eprintln!("\nStrategy template parses once parameters are substituted.");
        return Ok(());
    }

    let aliases: Aliases = build_aliases(&adapter)?.into_iter().collect();
    for key in ["entry_long", "entry_short", "exit"] {
        let Some(text) = read_string(&adapter, "strategy", key) else {
            continue;
        };
        eprintln!("\n{key}:");
        match rule_parser::parse_with_aliases(&text, &aliases) {
            Ok(rule) => {
                eprintln!("  Parsed: {}", rule);
                eprintln!("  Raw:    {}", text);
            }
            Err(e) => {
                eprintln!("  error: {}", e.display_with_context(&text));
                return Err(e.into());
            }
        }
    }

    let strategy = build_strategy(&adapter)?;
    let indicators: Vec<String> = strategy
        .required_indicators()
        .iter()
        .map(ToString::to_string)
        .collect();
    eprintln!("\nIndicators: {}", indicators.join(", "));
    eprintln!("Warm-up bars: {}", strategy.warmup_bars());
    eprintln!("\nStrategy configuration is valid.");
    Ok(())
}

fn print_metrics(metrics: &Metrics) {
    for (key, value) in metrics.key_values() {
        println!("  {key:<24}{value:>16.4}");
    }
}

fn print_run(result: &RunResult) {
    println!("{} | {}", result.symbol, result.strategy.name);
    println!(
        "  {:<24}{:>16.2}",
        "final_equity",
        result.final_equity()
    );
    print_metrics(&result.metrics);
    if result.is_insufficient() {
        println!("  (fewer trades than the configured minimum)");
    }
}

fn print_ranking(ranked: &[RankedRun], top: usize) {
    println!(
        "{:>4}  {:<32}{:>10}{:>12}{:>10}{:>10}{:>8}",
        "rank", "params", "score", "return", "sharpe", "max_dd", "trades"
    );
    for run in ranked.iter().filter(|r| r.rank.is_some()).take(top) {
        let Some(m) = &run.metrics else { continue };
        println!(
            "{:>4}  {:<32}{:>10.4}{:>12.4}{:>10.3}{:>10.4}{:>8}",
            run.rank.unwrap_or_default(),
            format_params(&run.params),
            run.score.unwrap_or(f64::NAN),
            m.total_return,
            m.sharpe_ratio,
            m.max_drawdown,
            m.total_trades
        );
    }
    let excluded = ranked.iter().filter(|r| r.exclusion.is_some()).count();
    if excluded > 0 {
        println!("{excluded} runs excluded from ranking");
    }
}

fn print_walk_forward(report: &WalkForwardReport) {
    println!("{} | walk-forward, {} windows", report.symbol, report.windows.len());
    for w in &report.windows {
        let params = w
            .params
            .as_ref()
            .map(format_params)
            .unwrap_or_else(|| "(flat)".to_string());
        println!(
            "  #{:<3} test [{}, {})  {:<32} {:>14.2} -> {:>14.2}",
            w.spec.index, w.spec.test_start, w.spec.test_end, params, w.starting_capital, w.ending_capital
        );
    }
    println!("  {:<24}{:>16.2}", "final_equity", report.final_equity());
    print_metrics(&report.metrics);
}
