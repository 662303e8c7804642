//! Core domain types and logic.

pub mod ohlcv;
pub mod data_quality;
pub mod indicator;
pub mod rule;
pub mod rule_parser;
pub mod rule_eval;
pub mod signal;
pub mod strategy;
pub mod costs;
pub mod sizing;
pub mod position;
pub mod portfolio;
pub mod simulator;
pub mod metrics;
pub mod backtest;
pub mod config_validation;
pub mod error;
