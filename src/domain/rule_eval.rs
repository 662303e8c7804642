//! Rule evaluation engine.
//!
//! Rules are evaluated against a [`HistoryView`]: the bars and indicator
//! points up to and including the current bar. Nothing past the current bar
//! is reachable through the view.
//!
//! # Evaluation Semantics
//!
//! - An operand whose indicator point is missing or still warming up is
//!   unknown; a comparison on an unknown operand is unknown, and unknown
//!   evaluates to `false` at the top level (so `NOT` of a warming-up rule is
//!   not true).
//! - `CROSS_ABOVE(a, b)`: `a[t-1] <= b[t-1] && a[t] > b[t]`
//! - `ENTERS(x, lo, hi)`: x outside `[lo, hi]` at t-1 and inside at t
//! - `EXITS(x, lo, hi)`: x inside at t-1 and outside at t
//! - `AND`: false if any child is false, unknown if any child is unknown
//! - `OR`: true if any child is true, unknown if any child is unknown
//! - `CONSECUTIVE(rule, N)`: Child true for N consecutive bars ending at t
//! - `ANY_OF(rule, N)`: Child true at least once in the last N bars

use std::collections::HashMap;

use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::ohlcv::Bar;
use crate::domain::rule::{IndicatorField, IndicatorRef, Operand, Rule};

const EPSILON: f64 = 1e-9;

pub type IndicatorTable = HashMap<IndicatorType, IndicatorSeries>;

/// Bars `[0..=t]` and the indicator points for the same bars.
#[derive(Debug, Clone, Copy)]
pub struct HistoryView<'a> {
    bars: &'a [Bar],
    indicators: &'a IndicatorTable,
}

impl<'a> HistoryView<'a> {
    /// View ending at bar `current`; `None` if `current` is past the data.
    pub fn prefix(bars: &'a [Bar], indicators: &'a IndicatorTable, current: usize) -> Option<Self> {
        let bars = bars.get(..=current)?;
        Some(Self { bars, indicators })
    }

    pub fn current(&self) -> usize {
        self.bars.len() - 1
    }

    pub fn bar(&self, index: usize) -> Option<&'a Bar> {
        self.bars.get(index)
    }

    pub fn indicator_point(&self, indicator: &IndicatorType, index: usize) -> Option<&'a IndicatorPoint> {
        if index >= self.bars.len() {
            return None;
        }
        self.indicators.get(indicator)?.values.get(index)
    }

    /// True when every listed indicator has a valid point at the current bar.
    pub fn ready(&self, indicators: &[IndicatorType]) -> bool {
        let t = self.current();
        indicators
            .iter()
            .all(|ind| self.indicator_point(ind, t).is_some_and(|p| p.valid))
    }
}

/// Evaluate `rule` at the view's current bar.
pub fn evaluate(rule: &Rule, view: &HistoryView<'_>) -> bool {
    eval_at(rule, view, view.current()).unwrap_or(false)
}

fn eval_at(rule: &Rule, view: &HistoryView<'_>, t: usize) -> Option<bool> {
    let value = |op: &Operand, i: usize| resolve_operand(op, view, i);
    match rule {
        Rule::CrossAbove { left, right } => {
            let prev = t.checked_sub(1)?;
            Some(value(left, prev)? <= value(right, prev)? && value(left, t)? > value(right, t)?)
        }
        Rule::CrossBelow { left, right } => {
            let prev = t.checked_sub(1)?;
            Some(value(left, prev)? >= value(right, prev)? && value(left, t)? < value(right, t)?)
        }
        Rule::Enters {
            operand,
            lower,
            upper,
        } => {
            let prev = t.checked_sub(1)?;
            let inside = |v: f64| v >= *lower && v <= *upper;
            Some(!inside(value(operand, prev)?) && inside(value(operand, t)?))
        }
        Rule::Exits {
            operand,
            lower,
            upper,
        } => {
            let prev = t.checked_sub(1)?;
            let inside = |v: f64| v >= *lower && v <= *upper;
            Some(inside(value(operand, prev)?) && !inside(value(operand, t)?))
        }
        Rule::Above { left, right } => Some(value(left, t)? > value(right, t)?),
        Rule::Below { left, right } => Some(value(left, t)? < value(right, t)?),
        Rule::Between {
            operand,
            lower,
            upper,
        } => {
            let v = value(operand, t)?;
            Some(v >= *lower && v <= *upper)
        }
        Rule::Equals { left, right } => Some((value(left, t)? - value(right, t)?).abs() < EPSILON),
        Rule::And(rules) => {
            let mut unknown = false;
            for r in rules {
                match eval_at(r, view, t) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        Rule::Or(rules) => {
            let mut unknown = false;
            for r in rules {
                match eval_at(r, view, t) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown { None } else { Some(false) }
        }
        Rule::Not(rule) => eval_at(rule, view, t).map(|b| !b),
        Rule::Consecutive { rule, count } => {
            let start = (t + 1).checked_sub(*count)?;
            for i in start..=t {
                if !eval_at(rule, view, i)? {
                    return Some(false);
                }
            }
            Some(true)
        }
        Rule::AnyOf { rule, count } => {
            let start = (t + 1).saturating_sub(*count);
            let mut unknown = false;
            for i in start..=t {
                match eval_at(rule, view, i) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown { None } else { Some(false) }
        }
    }
}

/// Confidence in [0, 1] for a rule that is true at the current bar.
///
/// Crossovers and level comparisons measure the relative separation of the
/// two sides; threshold rules measure how far the value sits past the band
/// edge relative to the band width. `AND` takes the weakest child, `OR` the
/// strongest true child. Other nodes carry no measure.
pub fn strength(rule: &Rule, view: &HistoryView<'_>) -> Option<f64> {
    let t = view.current();
    let value = |op: &Operand| resolve_operand(op, view, t);
    match rule {
        Rule::CrossAbove { left, right }
        | Rule::CrossBelow { left, right }
        | Rule::Above { left, right }
        | Rule::Below { left, right } => {
            let (a, b) = (value(left)?, value(right)?);
            if b.abs() < EPSILON {
                return Some(1.0);
            }
            Some(((a - b).abs() / b.abs()).min(1.0))
        }
        Rule::Enters {
            operand,
            lower,
            upper,
        }
        | Rule::Between {
            operand,
            lower,
            upper,
        } => {
            let v = value(operand)?;
            band_ratio((v - lower).min(upper - v).max(0.0), upper - lower)
        }
        Rule::Exits {
            operand,
            lower,
            upper,
        } => {
            let v = value(operand)?;
            let beyond = if v < *lower { lower - v } else { v - upper };
            band_ratio(beyond.max(0.0), upper - lower)
        }
        Rule::And(rules) => rules
            .iter()
            .filter_map(|r| strength(r, view))
            .reduce(f64::min),
        Rule::Or(rules) => rules
            .iter()
            .filter(|r| evaluate(r, view))
            .filter_map(|r| strength(r, view))
            .reduce(f64::max),
        Rule::Equals { .. } | Rule::Not(_) | Rule::Consecutive { .. } | Rule::AnyOf { .. } => None,
    }
}

fn band_ratio(depth: f64, width: f64) -> Option<f64> {
    if width < EPSILON {
        return Some(1.0);
    }
    Some((depth / width).min(1.0))
}

fn resolve_operand(operand: &Operand, view: &HistoryView<'_>, index: usize) -> Option<f64> {
    match operand {
        Operand::Constant(v) => Some(*v),
        Operand::Indicator(ind_ref) => resolve_indicator(ind_ref, view, index),
        price => {
            let bar = view.bar(index)?;
            Some(match price {
                Operand::Open => bar.open,
                Operand::High => bar.high,
                Operand::Low => bar.low,
                Operand::Volume => bar.volume,
                _ => bar.close,
            })
        }
    }
}

fn resolve_indicator(ind_ref: &IndicatorRef, view: &HistoryView<'_>, index: usize) -> Option<f64> {
    let point = view.indicator_point(&ind_ref.indicator_type, index)?;
    if !point.valid {
        return None;
    }
    extract_field(&point.value, ind_ref.field)
}

fn extract_field(value: &IndicatorValue, field: IndicatorField) -> Option<f64> {
    match (value, field) {
        (IndicatorValue::Simple(v), IndicatorField::Value) => Some(*v),
        (IndicatorValue::Macd { line, .. }, IndicatorField::MacdLine) => Some(*line),
        (IndicatorValue::Macd { signal, .. }, IndicatorField::MacdSignal) => Some(*signal),
        (IndicatorValue::Macd { histogram, .. }, IndicatorField::MacdHistogram) => Some(*histogram),
        (IndicatorValue::Bollinger { upper, .. }, IndicatorField::BollingerUpper) => Some(*upper),
        (IndicatorValue::Bollinger { middle, .. }, IndicatorField::BollingerMiddle) => Some(*middle),
        (IndicatorValue::Bollinger { lower, .. }, IndicatorField::BollingerLower) => Some(*lower),
        _ => None,
    }
}
