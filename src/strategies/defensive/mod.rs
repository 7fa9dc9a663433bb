//! Defensive Strategy Module
//!
//! Flat bias for high-volatility regimes, with an optional small counter-trend probe.

pub mod config;
pub mod strategy;

pub use config::DefensiveConfig;
pub use strategy::{DefensiveState, DefensiveStrategy};
