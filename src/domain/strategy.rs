//! Strategy configuration: rules, aliases and risk parameters.
//!
//! Percent-valued fields (`stop_loss_pct` and friends) are in percent units,
//! so `5.0` means 5 %.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::error::BacktestError;
use crate::domain::indicator::IndicatorType;
use crate::domain::rule::{Operand, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SizingMethod {
    /// Fixed notional per entry.
    FixedNotional(f64),
    /// Fraction (0, 1] of current equity.
    FixedFraction(f64),
    /// units = risk_budget / (ATR(atr_period) × atr_multiplier)
    VolatilityScaled {
        risk_budget: f64,
        atr_period: usize,
        atr_multiplier: f64,
    },
}

impl Default for SizingMethod {
    fn default() -> Self {
        SizingMethod::FixedFraction(1.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitRules {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
    pub trailing_pct: Option<f64>,
    pub max_holding_bars: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    pub description: String,
    pub aliases: BTreeMap<String, Operand>,
    pub entry_long: Option<Rule>,
    pub entry_short: Option<Rule>,
    pub exit: Option<Rule>,
    pub sizing: SizingMethod,
    pub exits: ExitRules,
}

impl StrategyConfig {
    /// Rules in signal computation order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        [&self.entry_long, &self.entry_short, &self.exit]
            .into_iter()
            .flatten()
    }

    /// Indicators the rules and the sizing method need, deduplicated.
    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        let mut out: Vec<IndicatorType> = Vec::new();
        for ind in self.rules().flat_map(Rule::indicators) {
            if !out.contains(&ind) {
                out.push(ind);
            }
        }
        if let Some(atr) = self.sizing_indicator() {
            if !out.contains(&atr) {
                out.push(atr);
            }
        }
        out
    }

    pub fn sizing_indicator(&self) -> Option<IndicatorType> {
        match self.sizing {
            SizingMethod::VolatilityScaled { atr_period, .. } => Some(IndicatorType::Atr(atr_period)),
            _ => None,
        }
    }

    /// Bars that must pass before every rule can be evaluated.
    pub fn warmup_bars(&self) -> usize {
        let indicator_warmup = self
            .required_indicators()
            .iter()
            .map(IndicatorType::warmup)
            .max()
            .unwrap_or(0);
        let lookback = self.rules().map(Rule::lookback).max().unwrap_or(0);
        indicator_warmup + lookback
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        let invalid = |key: &str, reason: &str| {
            Err(BacktestError::ConfigInvalid {
                section: "strategy".into(),
                key: key.into(),
                reason: reason.into(),
            })
        };

        if self.entry_long.is_none() && self.entry_short.is_none() {
            return invalid("entry_long", "at least one entry rule is required");
        }
        for ind in self.required_indicators() {
            ind.validate()?;
        }

        match self.sizing {
            SizingMethod::FixedNotional(v) if !(v > 0.0) => {
                return invalid("sizing", "fixed notional must be positive");
            }
            SizingMethod::FixedFraction(f) if !(f > 0.0 && f <= 1.0) => {
                return invalid("sizing", "fraction must be in (0, 1]");
            }
            SizingMethod::VolatilityScaled {
                risk_budget,
                atr_multiplier,
                ..
            } if !(risk_budget > 0.0 && atr_multiplier > 0.0) => {
                return invalid("sizing", "risk budget and ATR multiplier must be positive");
            }
            _ => {}
        }

        let pcts = [
            ("stop_loss_pct", self.exits.stop_loss_pct),
            ("take_profit_pct", self.exits.take_profit_pct),
            ("trailing_pct", self.exits.trailing_pct),
        ];
        for (key, pct) in pcts {
            if let Some(p) = pct {
                if !(p > 0.0 && p < 100.0) {
                    return invalid(key, "must be between 0 and 100 exclusive");
                }
            }
        }
        if self.exits.max_holding_bars == Some(0) {
            return invalid("max_holding_bars", "must be positive");
        }
        Ok(())
    }
}
