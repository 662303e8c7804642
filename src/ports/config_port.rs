//! Configuration access port traits.
//!
//! Section and key names are matched case-insensitively by the INI adapter.

use std::fmt::Debug;

use crate::domain::error::BacktestError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// Every `key = value` pair of a section, sorted by key. Keys without a
    /// value are skipped.
    fn get_section(&self, section: &str) -> Vec<(String, String)>;
}

/// Turns configuration text into a [`ConfigPort`]. Strategy templates use it
/// to parse each rendered parameter assignment, possibly from many threads.
pub trait ConfigParser: Debug + Send + Sync {
    fn parse(&self, text: &str) -> Result<Box<dyn ConfigPort>, BacktestError>;
}
