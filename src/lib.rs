//! stratforge: event-driven single-asset backtesting with parameter search.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], batch search and walk-forward
//! validation in [`optimize`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod optimize;
pub mod cli;
