//! Rule DSL parser.
//!
//! Recursive descent parser for the rule grammar. Converts text to AST with
//! meaningful error messages including character offset, expected/found tokens.
//!
//! ```text
//! rule     := CROSS_ABOVE(op, op) | CROSS_BELOW(op, op)
//!           | ENTERS(op, bound, bound) | EXITS(op, bound, bound)
//!           | ABOVE(op, op) | BELOW(op, op) | EQUALS(op, op)
//!           | BETWEEN(op, bound, bound)
//!           | AND(rule, rule, ...) | OR(rule, rule, ...) | NOT(rule)
//!           | CONSECUTIVE(rule, n) | ANY_OF(rule, n)
//! op       := number | price field | indicator | alias
//! bound    := number | alias bound to a constant
//! ```

use std::collections::HashMap;

use crate::domain::error::ParseError;
use crate::domain::indicator::IndicatorType;
use crate::domain::rule::{IndicatorField, IndicatorRef, Operand, Rule};

/// Names declared in a strategy's indicator section.
pub type Aliases = HashMap<String, Operand>;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    aliases: &'a Aliases,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, aliases: &'a Aliases) -> Self {
        Self {
            input,
            pos: 0,
            aliases,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    /// Identifier characters at the cursor, possibly empty.
    fn ident(&self) -> &'a str {
        let rest = self.remaining();
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        &rest[..end]
    }

    /// Alias lookup; INI keys arrive lowercased, so fall back to that form.
    fn alias(&self, word: &str) -> Option<&'a Operand> {
        if word.is_empty() {
            return None;
        }
        self.aliases
            .get(word)
            .or_else(|| self.aliases.get(&word.to_ascii_lowercase()))
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            self.pos = start;
            return Err(self.error("expected number"));
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        let num_str = &self.input[start..self.pos];
        if num_str.is_empty() {
            return Err(self.error("expected integer"));
        }
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    /// Comma-separated integers up to the closing paren.
    fn parse_int_args(&mut self, count: usize) -> Result<Vec<usize>, ParseError> {
        let mut args = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                self.expect_char(',')?;
            }
            args.push(self.parse_integer()?);
        }
        self.expect_char(')')?;
        Ok(args)
    }

    fn parse_indicator(&mut self, name: &str) -> Result<Operand, ParseError> {
        let (indicator_type, field) = match name {
            "SMA" | "EMA" | "WMA" | "RSI" | "ROC" | "ATR" | "STDDEV" => {
                let period = self.parse_int_args(1)?[0];
                let ind = match name {
                    "SMA" => IndicatorType::Sma(period),
                    "EMA" => IndicatorType::Ema(period),
                    "WMA" => IndicatorType::Wma(period),
                    "RSI" => IndicatorType::Rsi(period),
                    "ROC" => IndicatorType::Roc(period),
                    "ATR" => IndicatorType::Atr(period),
                    _ => IndicatorType::Stddev(period),
                };
                (ind, IndicatorField::Value)
            }
            "MACD_LINE" | "MACD_SIGNAL" | "MACD_HISTOGRAM" => {
                let args = self.parse_int_args(3)?;
                let field = match name {
                    "MACD_LINE" => IndicatorField::MacdLine,
                    "MACD_SIGNAL" => IndicatorField::MacdSignal,
                    _ => IndicatorField::MacdHistogram,
                };
                let ind = IndicatorType::Macd {
                    fast: args[0],
                    slow: args[1],
                    signal: args[2],
                };
                (ind, field)
            }
            "BOLLINGER_UPPER" | "BOLLINGER_MIDDLE" | "BOLLINGER_LOWER" => {
                let period = self.parse_integer()?;
                self.expect_char(',')?;
                let mult = self.parse_number()?;
                self.expect_char(')')?;
                let field = match name {
                    "BOLLINGER_UPPER" => IndicatorField::BollingerUpper,
                    "BOLLINGER_MIDDLE" => IndicatorField::BollingerMiddle,
                    _ => IndicatorField::BollingerLower,
                };
                let ind = IndicatorType::Bollinger {
                    period,
                    stddev_mult_x100: (mult * 100.0).round().max(0.0) as u32,
                };
                (ind, field)
            }
            _ => return Err(self.error(format!("expected indicator, found '{}'", name))),
        };
        Ok(Operand::Indicator(IndicatorRef {
            indicator_type,
            field,
        }))
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            return Ok(Operand::Constant(self.parse_number()?));
        }

        let start = self.pos;
        let word = self.ident();
        if word.is_empty() {
            return Err(self.error(format!("expected operand, found '{}'", self.peek_word())));
        }
        let price = match word {
            "open" => Some(Operand::Open),
            "high" => Some(Operand::High),
            "low" => Some(Operand::Low),
            "close" => Some(Operand::Close),
            "volume" => Some(Operand::Volume),
            _ => None,
        };
        if let Some(op) = price {
            self.pos += word.len();
            return Ok(op);
        }

        if self.remaining()[word.len()..].starts_with('(') {
            self.pos += word.len() + 1;
            return self.parse_indicator(word).map_err(|mut e| {
                if e.message.starts_with("expected indicator") {
                    e.position = start;
                }
                e
            });
        }

        if let Some(op) = self.alias(word) {
            self.pos += word.len();
            return Ok(op.clone());
        }

        Err(self.error(format!("expected operand, found '{}'", word)))
    }

    fn parse_bound(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let word = self.ident();
        if let Some(op) = self.alias(word) {
            return match op {
                Operand::Constant(v) => {
                    self.pos += word.len();
                    Ok(*v)
                }
                _ => Err(self.error(format!("alias '{}' is not a constant", word))),
            };
        }
        self.parse_number()
    }

    fn parse_pair(&mut self) -> Result<(Operand, Operand), ParseError> {
        self.expect_char('(')?;
        let left = self.parse_operand()?;
        self.expect_char(',')?;
        let right = self.parse_operand()?;
        self.expect_char(')')?;
        Ok((left, right))
    }

    fn parse_band(&mut self) -> Result<(Operand, f64, f64), ParseError> {
        self.expect_char('(')?;
        let operand = self.parse_operand()?;
        self.expect_char(',')?;
        let lower = self.parse_bound()?;
        self.expect_char(',')?;
        let upper = self.parse_bound()?;
        if lower > upper {
            return Err(self.error(format!("lower bound {} exceeds upper bound {}", lower, upper)));
        }
        self.expect_char(')')?;
        Ok((operand, lower, upper))
    }

    fn parse_rule_list(&mut self, keyword: &str) -> Result<Vec<Rule>, ParseError> {
        self.expect_char('(')?;
        let mut rules = vec![self.parse_rule()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
            rules.push(self.parse_rule()?);
        }
        if rules.len() < 2 {
            return Err(self.error(format!("{} requires at least 2 rules", keyword)));
        }
        Ok(rules)
    }

    fn parse_counted(&mut self) -> Result<(Box<Rule>, usize), ParseError> {
        self.expect_char('(')?;
        let rule = self.parse_rule()?;
        self.expect_char(',')?;
        let count = self.parse_integer()?;
        if count == 0 {
            return Err(self.error("count must be positive"));
        }
        self.expect_char(')')?;
        Ok((Box::new(rule), count))
    }

    fn parse_rule(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();

        const KEYWORDS: [&str; 13] = [
            "CROSS_ABOVE",
            "CROSS_BELOW",
            "ENTERS",
            "EXITS",
            "ABOVE",
            "BELOW",
            "EQUALS",
            "BETWEEN",
            "AND",
            "OR",
            "NOT",
            "CONSECUTIVE",
            "ANY_OF",
        ];
        let Some(keyword) = KEYWORDS.into_iter().find(|k| self.peek_keyword(k)) else {
            let word = self.peek_word();
            return Err(self.error(format!("expected rule, found '{}'", word)));
        };
        self.pos += keyword.len();

        let rule = match keyword {
            "CROSS_ABOVE" => {
                let (left, right) = self.parse_pair()?;
                Rule::CrossAbove { left, right }
            }
            "CROSS_BELOW" => {
                let (left, right) = self.parse_pair()?;
                Rule::CrossBelow { left, right }
            }
            "ABOVE" => {
                let (left, right) = self.parse_pair()?;
                Rule::Above { left, right }
            }
            "BELOW" => {
                let (left, right) = self.parse_pair()?;
                Rule::Below { left, right }
            }
            "EQUALS" => {
                let (left, right) = self.parse_pair()?;
                Rule::Equals { left, right }
            }
            "ENTERS" => {
                let (operand, lower, upper) = self.parse_band()?;
                Rule::Enters {
                    operand,
                    lower,
                    upper,
                }
            }
            "EXITS" => {
                let (operand, lower, upper) = self.parse_band()?;
                Rule::Exits {
                    operand,
                    lower,
                    upper,
                }
            }
            "BETWEEN" => {
                let (operand, lower, upper) = self.parse_band()?;
                Rule::Between {
                    operand,
                    lower,
                    upper,
                }
            }
            "AND" => Rule::And(self.parse_rule_list("AND")?),
            "OR" => Rule::Or(self.parse_rule_list("OR")?),
            "NOT" => {
                self.expect_char('(')?;
                let rule = self.parse_rule()?;
                self.expect_char(')')?;
                Rule::Not(Box::new(rule))
            }
            "CONSECUTIVE" => {
                let (rule, count) = self.parse_counted()?;
                Rule::Consecutive { rule, count }
            }
            _ => {
                let (rule, count) = self.parse_counted()?;
                Rule::AnyOf { rule, count }
            }
        };
        Ok(rule)
    }

    fn finish<T>(&mut self, value: T) -> Result<T, ParseError> {
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "unexpected input after rule: '{}'",
                self.remaining()
            )));
        }
        Ok(value)
    }
}

pub fn parse(input: &str) -> Result<Rule, ParseError> {
    parse_with_aliases(input, &Aliases::new())
}

/// Parse a rule whose operands may name entries of `aliases`.
pub fn parse_with_aliases(input: &str, aliases: &Aliases) -> Result<Rule, ParseError> {
    let mut parser = Parser::new(input, aliases);
    let rule = parser.parse_rule()?;
    parser.finish(rule)
}

/// Parse a single operand, e.g. the right-hand side of an alias definition.
pub fn parse_operand(input: &str, aliases: &Aliases) -> Result<Operand, ParseError> {
    let mut parser = Parser::new(input, aliases);
    let operand = parser.parse_operand()?;
    parser.finish(operand)
}
