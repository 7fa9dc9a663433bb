//! Trend Following Strategy Module
//!
//! Rides the sign of the normalized trend slope. Used for both trending regimes.

pub mod config;
pub mod strategy;

pub use config::TrendFollowingConfig;
pub use strategy::{TrendFollowingStrategy, TrendState};
