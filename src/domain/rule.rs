//! Rule AST.
//!
//! - `Operand`: What can be compared (price fields, constants, indicators)
//! - `IndicatorRef`: Reference to an indicator with a specific field
//! - `IndicatorField`: Which field of a multi-value indicator to use
//! - `Rule`: crossover, threshold, level, confluence and bounded temporal nodes
//!
//! Every node looks only at the evaluation bar and bars before it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::indicator::IndicatorType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Open,
    High,
    Low,
    Close,
    Volume,
    Constant(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRef {
    pub indicator_type: IndicatorType,
    pub field: IndicatorField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    CrossAbove {
        left: Operand,
        right: Operand,
    },
    CrossBelow {
        left: Operand,
        right: Operand,
    },
    /// True on the bar where `operand` moves from outside to inside `[lower, upper]`.
    Enters {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    /// True on the bar where `operand` moves from inside to outside `[lower, upper]`.
    Exits {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    Above {
        left: Operand,
        right: Operand,
    },
    Below {
        left: Operand,
        right: Operand,
    },
    Between {
        operand: Operand,
        lower: f64,
        upper: f64,
    },
    Equals {
        left: Operand,
        right: Operand,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
    Consecutive {
        rule: Box<Rule>,
        count: usize,
    },
    AnyOf {
        rule: Box<Rule>,
        count: usize,
    },
}

impl Operand {
    pub fn indicator(&self) -> Option<&IndicatorType> {
        match self {
            Operand::Indicator(r) => Some(&r.indicator_type),
            _ => None,
        }
    }
}

impl Rule {
    /// Every distinct indicator referenced anywhere in the tree, in first-seen order.
    pub fn indicators(&self) -> Vec<IndicatorType> {
        let mut out = Vec::new();
        self.collect_indicators(&mut out);
        out
    }

    fn collect_indicators(&self, out: &mut Vec<IndicatorType>) {
        let mut push = |op: &Operand| {
            if let Some(ind) = op.indicator() {
                if !out.contains(ind) {
                    out.push(ind.clone());
                }
            }
        };
        match self {
            Rule::CrossAbove { left, right }
            | Rule::CrossBelow { left, right }
            | Rule::Above { left, right }
            | Rule::Below { left, right }
            | Rule::Equals { left, right } => {
                push(left);
                push(right);
            }
            Rule::Enters { operand, .. }
            | Rule::Exits { operand, .. }
            | Rule::Between { operand, .. } => push(operand),
            Rule::And(rules) | Rule::Or(rules) => {
                for r in rules {
                    r.collect_indicators(out);
                }
            }
            Rule::Not(rule) | Rule::Consecutive { rule, .. } | Rule::AnyOf { rule, .. } => {
                rule.collect_indicators(out)
            }
        }
    }

    /// How many bars before the evaluation bar the rule reads.
    pub fn lookback(&self) -> usize {
        match self {
            Rule::CrossAbove { .. }
            | Rule::CrossBelow { .. }
            | Rule::Enters { .. }
            | Rule::Exits { .. } => 1,
            Rule::Above { .. } | Rule::Below { .. } | Rule::Between { .. } | Rule::Equals { .. } => 0,
            Rule::And(rules) | Rule::Or(rules) => {
                rules.iter().map(Rule::lookback).max().unwrap_or(0)
            }
            Rule::Not(rule) => rule.lookback(),
            Rule::Consecutive { rule, count } | Rule::AnyOf { rule, count } => {
                rule.lookback() + count.saturating_sub(1)
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Open => write!(f, "open"),
            Operand::High => write!(f, "high"),
            Operand::Low => write!(f, "low"),
            Operand::Close => write!(f, "close"),
            Operand::Volume => write!(f, "volume"),
            Operand::Constant(v) => write!(f, "{}", v),
            Operand::Indicator(r) => match (&r.indicator_type, r.field) {
                (IndicatorType::Macd { fast, slow, signal }, field) => {
                    let name = match field {
                        IndicatorField::MacdSignal => "MACD_SIGNAL",
                        IndicatorField::MacdHistogram => "MACD_HISTOGRAM",
                        _ => "MACD_LINE",
                    };
                    write!(f, "{}({},{},{})", name, fast, slow, signal)
                }
                (
                    IndicatorType::Bollinger {
                        period,
                        stddev_mult_x100,
                    },
                    field,
                ) => {
                    let name = match field {
                        IndicatorField::BollingerUpper => "BOLLINGER_UPPER",
                        IndicatorField::BollingerLower => "BOLLINGER_LOWER",
                        _ => "BOLLINGER_MIDDLE",
                    };
                    write!(f, "{}({},{})", name, period, *stddev_mult_x100 as f64 / 100.0)
                }
                (ind, _) => write!(f, "{}", ind),
            },
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, name: &str, rules: &[Rule]| {
            write!(f, "{}(", name)?;
            for (i, r) in rules.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", r)?;
            }
            write!(f, ")")
        };
        match self {
            Rule::CrossAbove { left, right } => write!(f, "CROSS_ABOVE({}, {})", left, right),
            Rule::CrossBelow { left, right } => write!(f, "CROSS_BELOW({}, {})", left, right),
            Rule::Enters {
                operand,
                lower,
                upper,
            } => write!(f, "ENTERS({}, {}, {})", operand, lower, upper),
            Rule::Exits {
                operand,
                lower,
                upper,
            } => write!(f, "EXITS({}, {}, {})", operand, lower, upper),
            Rule::Above { left, right } => write!(f, "ABOVE({}, {})", left, right),
            Rule::Below { left, right } => write!(f, "BELOW({}, {})", left, right),
            Rule::Between {
                operand,
                lower,
                upper,
            } => write!(f, "BETWEEN({}, {}, {})", operand, lower, upper),
            Rule::Equals { left, right } => write!(f, "EQUALS({}, {})", left, right),
            Rule::And(rules) => join(f, "AND", rules),
            Rule::Or(rules) => join(f, "OR", rules),
            Rule::Not(rule) => write!(f, "NOT({})", rule),
            Rule::Consecutive { rule, count } => write!(f, "CONSECUTIVE({}, {})", rule, count),
            Rule::AnyOf { rule, count } => write!(f, "ANY_OF({}, {})", rule, count),
        }
    }
}
