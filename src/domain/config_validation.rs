//! Configuration loading and validation.
//!
//! Builds [`StrategyConfig`] and [`BacktestConfig`] from a [`ConfigPort`] and
//! checks every field before a run starts. Numeric keys that are present but
//! unparseable are rejected rather than silently defaulted.

use std::collections::BTreeMap;

use crate::domain::backtest::{BacktestConfig, DEFAULT_MIN_TRADES};
use crate::domain::costs::CostModel;
use crate::domain::error::BacktestError;
use crate::domain::metrics::TRADING_DAYS_PER_YEAR;
use crate::domain::rule::{Operand, Rule};
use crate::domain::rule_parser::{self, Aliases};
use crate::domain::simulator::{FillTiming, DEFAULT_GAP_TOLERANCE};
use crate::domain::strategy::{ExitRules, SizingMethod, StrategyConfig};
use crate::ports::config_port::ConfigPort;

pub const DEFAULT_ATR_PERIOD: usize = 14;

pub(crate) fn invalid(section: &str, key: &str, reason: impl Into<String>) -> BacktestError {
    BacktestError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> BacktestError {
    BacktestError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// Trimmed value of `key`, `None` when absent or blank.
pub fn read_string(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn require_string(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<String, BacktestError> {
    read_string(config, section, key).ok_or_else(|| missing(section, key))
}

pub fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<f64>, BacktestError> {
    match read_string(config, section, key) {
        None => Ok(None),
        Some(s) => match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(invalid(section, key, format!("expected a number, got '{s}'"))),
        },
    }
}

pub fn read_usize(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<usize>, BacktestError> {
    match read_string(config, section, key) {
        None => Ok(None),
        Some(s) => s
            .parse::<usize>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("expected a whole number, got '{s}'"))),
    }
}

pub fn read_bool(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<bool>, BacktestError> {
    match read_string(config, section, key) {
        None => Ok(None),
        Some(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Some(true)),
            "false" | "no" | "0" => Ok(Some(false)),
            _ => Err(invalid(section, key, format!("expected true or false, got '{s}'"))),
        },
    }
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, BacktestError> {
    const S: &str = "backtest";
    let defaults = BacktestConfig::default();

    let fill_timing = match read_string(config, S, "fill_timing").as_deref() {
        None => FillTiming::default(),
        Some(v) => match v.to_lowercase().as_str() {
            "next_open" => FillTiming::NextOpen,
            "signal_close" => FillTiming::SignalClose,
            other => {
                return Err(invalid(
                    S,
                    "fill_timing",
                    format!("unknown fill timing '{other}', expected next_open or signal_close"),
                ));
            }
        },
    };

    let backtest = BacktestConfig {
        initial_capital: read_f64(config, S, "initial_capital")?.unwrap_or(defaults.initial_capital),
        costs: CostModel {
            commission_pct: read_f64(config, S, "commission_pct")?.unwrap_or(0.0),
            slippage_pct: read_f64(config, S, "slippage_pct")?.unwrap_or(0.0),
            impact_pct: read_f64(config, S, "impact_pct")?.unwrap_or(0.0),
            impact_threshold: read_f64(config, S, "impact_threshold")?.unwrap_or(0.0),
        },
        fill_timing,
        allow_shorting: read_bool(config, S, "allow_shorting")?.unwrap_or(false),
        gap_tolerance: read_f64(config, S, "gap_tolerance")?.unwrap_or(DEFAULT_GAP_TOLERANCE),
        periods_per_year: read_f64(config, S, "periods_per_year")?
            .unwrap_or(TRADING_DAYS_PER_YEAR),
        min_trades: read_usize(config, S, "min_trades")?.unwrap_or(DEFAULT_MIN_TRADES),
    };
    backtest.validate()?;
    Ok(backtest)
}

/// Indicator aliases from the `[indicators]` section, e.g. `fast = SMA(5)`.
pub fn build_aliases(config: &dyn ConfigPort) -> Result<BTreeMap<String, Operand>, BacktestError> {
    let mut aliases = BTreeMap::new();
    for (name, expr) in config.get_section("indicators") {
        let operand = rule_parser::parse_operand(&expr, &Aliases::new())?;
        aliases.insert(name, operand);
    }
    Ok(aliases)
}

fn parse_rule(
    config: &dyn ConfigPort,
    key: &str,
    aliases: &Aliases,
) -> Result<Option<Rule>, BacktestError> {
    match read_string(config, "strategy", key) {
        None => Ok(None),
        Some(text) => Ok(Some(rule_parser::parse_with_aliases(&text, aliases)?)),
    }
}

pub fn build_sizing(config: &dyn ConfigPort) -> Result<SizingMethod, BacktestError> {
    const S: &str = "sizing";
    let method = read_string(config, S, "method").unwrap_or_else(|| "fixed_fraction".into());
    match method.to_lowercase().as_str() {
        "fixed_fraction" => Ok(SizingMethod::FixedFraction(
            read_f64(config, S, "fraction")?.unwrap_or(1.0),
        )),
        "fixed_notional" => Ok(SizingMethod::FixedNotional(
            read_f64(config, S, "notional")?.ok_or_else(|| missing(S, "notional"))?,
        )),
        "volatility" => Ok(SizingMethod::VolatilityScaled {
            risk_budget: read_f64(config, S, "risk_budget")?
                .ok_or_else(|| missing(S, "risk_budget"))?,
            atr_period: read_usize(config, S, "atr_period")?.unwrap_or(DEFAULT_ATR_PERIOD),
            atr_multiplier: read_f64(config, S, "atr_multiplier")?.unwrap_or(1.0),
        }),
        other => Err(invalid(
            S,
            "method",
            format!("unknown sizing method '{other}'"),
        )),
    }
}

pub fn build_exit_rules(config: &dyn ConfigPort) -> Result<ExitRules, BacktestError> {
    const S: &str = "exits";
    Ok(ExitRules {
        stop_loss_pct: read_f64(config, S, "stop_loss_pct")?,
        take_profit_pct: read_f64(config, S, "take_profit_pct")?,
        trailing_pct: read_f64(config, S, "trailing_pct")?,
        max_holding_bars: read_usize(config, S, "max_holding_bars")?,
    })
}

/// Assemble and validate a strategy from the `[strategy]`, `[indicators]`,
/// `[sizing]` and `[exits]` sections.
pub fn build_strategy(config: &dyn ConfigPort) -> Result<StrategyConfig, BacktestError> {
    let aliases = build_aliases(config)?;
    let lookup: Aliases = aliases.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

    let strategy = StrategyConfig {
        name: read_string(config, "strategy", "name").unwrap_or_else(|| "Unnamed".to_string()),
        description: read_string(config, "strategy", "description").unwrap_or_default(),
        entry_long: parse_rule(config, "entry_long", &lookup)?,
        entry_short: parse_rule(config, "entry_short", &lookup)?,
        exit: parse_rule(config, "exit", &lookup)?,
        sizing: build_sizing(config)?,
        exits: build_exit_rules(config)?,
        aliases,
    };
    strategy.validate()?;
    Ok(strategy)
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), BacktestError> {
    build_strategy(config).map(|_| ())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), BacktestError> {
    build_backtest_config(config).map(|_| ())
}
