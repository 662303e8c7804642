//! Parameter grids and strategy templates.
//!
//! A [`ParamGrid`] enumerates parameter assignments; a [`StrategyTemplate`]
//! turns each assignment into a [`StrategyConfig`] by substituting `{name}`
//! placeholders in a strategy document and parsing the result.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::domain::backtest::Params;
use crate::domain::config_validation::{build_strategy, invalid, read_string};
use crate::domain::error::BacktestError;
use crate::domain::strategy::StrategyConfig;
use crate::ports::config_port::{ConfigParser, ConfigPort};

/// Upper bound on the values a single range axis may expand to.
pub const MAX_AXIS_VALUES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamAxis {
    pub name: String,
    pub values: Vec<f64>,
}

/// `lesser < greater` must hold for an assignment to be enumerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Constraint {
    pub lesser: String,
    pub greater: String,
}

impl Constraint {
    /// Parse `"fast < slow"`.
    pub fn parse(text: &str) -> Result<Self, BacktestError> {
        let (lesser, greater) = text
            .split_once('<')
            .map(|(a, b)| (a.trim(), b.trim()))
            .filter(|(a, b)| !a.is_empty() && !b.is_empty())
            .ok_or_else(|| {
                invalid(
                    "optimize",
                    "constraints",
                    format!("expected 'a < b', got '{}'", text.trim()),
                )
            })?;
        Ok(Constraint {
            lesser: lesser.to_lowercase(),
            greater: greater.to_lowercase(),
        })
    }

    pub fn holds(&self, params: &Params) -> bool {
        match (params.get(&self.lesser), params.get(&self.greater)) {
            (Some(a), Some(b)) => a < b,
            _ => true,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} < {}", self.lesser, self.greater)
    }
}

/// Named axes of candidate values plus pairwise constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamGrid {
    axes: Vec<ParamAxis>,
    constraints: Vec<Constraint>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis(mut self, name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        self.axes.push(ParamAxis {
            name: name.to_lowercase(),
            values: values.into_iter().collect(),
        });
        self
    }

    pub fn with_constraint(mut self, lesser: &str, greater: &str) -> Self {
        self.constraints.push(Constraint {
            lesser: lesser.to_lowercase(),
            greater: greater.to_lowercase(),
        });
        self
    }

    pub fn axes(&self) -> &[ParamAxis] {
        &self.axes
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Size of the unconstrained cartesian product.
    pub fn size(&self) -> usize {
        self.axes.iter().map(|a| a.values.len()).product()
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.axes.is_empty() {
            return Err(invalid("grid", "", "grid has no parameters"));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            if axis.values.is_empty() {
                return Err(invalid("grid", &axis.name, "axis has no values"));
            }
            if self.axes[..i].iter().any(|a| a.name == axis.name) {
                return Err(invalid("grid", &axis.name, "duplicate parameter"));
            }
        }
        for c in &self.constraints {
            for name in [&c.lesser, &c.greater] {
                if !self.axes.iter().any(|a| &a.name == name) {
                    return Err(invalid(
                        "optimize",
                        "constraints",
                        format!("constraint '{c}' names unknown parameter '{name}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every assignment satisfying the constraints. The first axis varies
    /// slowest, so the order is stable for a given grid.
    pub fn assignments(&self) -> Vec<Params> {
        if self.axes.is_empty() {
            return Vec::new();
        }
        let mut acc = vec![Params::new()];
        for axis in &self.axes {
            acc = acc
                .iter()
                .flat_map(|partial| {
                    axis.values.iter().map(move |&v| {
                        let mut next = partial.clone();
                        next.insert(axis.name.clone(), v);
                        next
                    })
                })
                .collect();
        }
        acc.retain(|p| self.constraints.iter().all(|c| c.holds(p)));
        acc
    }

    /// Axes from `[grid]` (`name = values`) and constraints from
    /// `[optimize] constraints = a < b, c < d`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, BacktestError> {
        let mut grid = ParamGrid::new();
        for (name, text) in config.get_section("grid") {
            grid.axes.push(parse_axis(&name, &text)?);
        }
        if let Some(text) = read_string(config, "optimize", "constraints") {
            for part in text.split(',').filter(|p| !p.trim().is_empty()) {
                grid.constraints.push(Constraint::parse(part)?);
            }
        }
        grid.validate()?;
        Ok(grid)
    }
}

/// Parse axis values: a list (`5, 10, 20`) or an inclusive range with an
/// optional step (`5..20:5`, step defaults to 1).
pub fn parse_axis(name: &str, text: &str) -> Result<ParamAxis, BacktestError> {
    let bad = |reason: String| invalid("grid", name, reason);
    let number = |s: &str| {
        s.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| bad(format!("'{}' is not a number", s.trim())))
    };

    let values = if let Some((start, rest)) = text.split_once("..") {
        let (end, step) = match rest.split_once(':') {
            Some((end, step)) => (number(end)?, number(step)?),
            None => (number(rest)?, 1.0),
        };
        let start = number(start)?;
        if step <= 0.0 {
            return Err(bad("range step must be positive".into()));
        }
        if end < start {
            return Err(bad(format!("range end {end} is below start {start}")));
        }
        let steps = ((end - start) / step + 1e-9).floor() as usize;
        if steps >= MAX_AXIS_VALUES {
            return Err(bad(format!("range expands to more than {MAX_AXIS_VALUES} values")));
        }
        (0..=steps).map(|i| start + i as f64 * step).collect()
    } else {
        text.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(number)
            .collect::<Result<Vec<f64>, _>>()?
    };

    if values.is_empty() {
        return Err(bad("axis has no values".into()));
    }
    Ok(ParamAxis {
        name: name.to_lowercase(),
        values,
    })
}

/// Strategy document with `{param}` placeholders, plus the parser that reads
/// each rendered document.
#[derive(Debug, Clone)]
pub struct StrategyTemplate {
    source: String,
    parser: Arc<dyn ConfigParser>,
}

impl StrategyTemplate {
    pub fn new(source: impl Into<String>, parser: impl ConfigParser + 'static) -> Self {
        StrategyTemplate {
            source: source.into(),
            parser: Arc::new(parser),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for token in tokens(&self.source) {
            if let Token::Placeholder(name) = token {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Substitute every placeholder. Whole numbers render without a
    /// fractional part so they parse as indicator periods.
    pub fn render(&self, params: &Params) -> Result<String, BacktestError> {
        let mut out = String::with_capacity(self.source.len());
        for token in tokens(&self.source) {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Placeholder(name) => {
                    let value = params
                        .get(name)
                        .or_else(|| params.get(&name.to_lowercase()))
                        .ok_or_else(|| invalid("grid", name, "no value for placeholder"))?;
                    out.push_str(&value.to_string());
                }
            }
        }
        Ok(out)
    }

    pub fn instantiate(&self, params: &Params) -> Result<StrategyConfig, BacktestError> {
        let rendered = self.render(params)?;
        let config = self.parser.parse(&rendered)?;
        build_strategy(config.as_ref())
    }
}

enum Token<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split into literal text and `{identifier}` placeholders. Braces that do
/// not enclose an identifier stay literal.
fn tokens(source: &str) -> Vec<Token<'_>> {
    let mut out = Vec::new();
    let mut rest = source;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                if open > 0 {
                    out.push(Token::Text(&rest[..open]));
                }
                out.push(Token::Placeholder(&after[..close]));
                rest = &after[close + 1..];
            }
            _ => {
                out.push(Token::Text(&rest[..=open]));
                rest = after;
            }
        }
    }
    if !rest.is_empty() {
        out.push(Token::Text(rest));
    }
    out
}
