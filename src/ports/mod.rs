//! Port traits the domain talks to: bar data in, configuration in, results out.

pub mod bar_source;
pub mod config_port;
pub mod result_sink;
