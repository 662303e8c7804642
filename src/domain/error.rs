//! Domain error types.

/// A parse error with position information for rule parsing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let caret = " ".repeat(self.position) + "^";
        format!(
            "{input}\n{caret}\n{err}",
            input = input,
            caret = caret,
            err = self
        )
    }
}

/// Top-level error type for stratforge.
#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    RuleParse(#[from] ParseError),

    #[error("invalid rule: {reason}")]
    RuleInvalid { reason: String },

    #[error("invalid parameter for {indicator}: {reason}")]
    InvalidParameter { indicator: String, reason: String },

    #[error("data quality error in {symbol}: {reason}")]
    DataQuality { symbol: String, reason: String },

    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("data source error: {reason}")]
    DataSource { reason: String },

    #[error("optimization error: {reason}")]
    Optimization { reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BacktestError {
    /// Configuration-class errors abort a single run before execution starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BacktestError::ConfigParse { .. }
                | BacktestError::ConfigMissing { .. }
                | BacktestError::ConfigInvalid { .. }
                | BacktestError::RuleParse(_)
                | BacktestError::RuleInvalid { .. }
                | BacktestError::InvalidParameter { .. }
        )
    }
}

impl From<&BacktestError> for std::process::ExitCode {
    fn from(err: &BacktestError) -> Self {
        let code: u8 = match err {
            BacktestError::Io(_)
            | BacktestError::Csv(_)
            | BacktestError::Json(_)
            | BacktestError::DataSource { .. }
            | BacktestError::Optimization { .. } => 1,
            BacktestError::ConfigParse { .. }
            | BacktestError::ConfigMissing { .. }
            | BacktestError::ConfigInvalid { .. }
            | BacktestError::InvalidParameter { .. } => 2,
            BacktestError::RuleParse(_) | BacktestError::RuleInvalid { .. } => 4,
            BacktestError::NoData { .. } | BacktestError::DataQuality { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_caret_points_at_position() {
        let err = ParseError {
            message: "expected ')'".into(),
            position: 4,
        };
        let shown = err.display_with_context("SMA(5");
        let lines: Vec<&str> = shown.lines().collect();
        assert_eq!(lines[0], "SMA(5");
        assert_eq!(lines[1], "    ^");
        assert!(lines[2].contains("position 4"));
    }

    #[test]
    fn configuration_family() {
        let err = BacktestError::InvalidParameter {
            indicator: "SMA(0)".into(),
            reason: "period must be positive".into(),
        };
        assert!(err.is_configuration());

        let err = BacktestError::DataQuality {
            symbol: "SPY".into(),
            reason: "non-monotonic timestamp".into(),
        };
        assert!(!err.is_configuration());
    }

    #[test]
    fn rule_parse_converts_from_parse_error() {
        let err: BacktestError = ParseError {
            message: "boom".into(),
            position: 0,
        }
        .into();
        assert!(matches!(err, BacktestError::RuleParse(_)));
        assert!(err.is_configuration());
    }
}
