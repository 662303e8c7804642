//! Concrete adapter implementations for ports.

pub mod csv_bar_source;
pub mod csv_ledger_sink;
pub mod file_config_adapter;
pub mod json_lines_sink;
