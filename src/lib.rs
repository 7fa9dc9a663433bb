//! Regime-adaptive decision engine
//!
//! Classifies the market regime of an instrument from recent bars, routes to the
//! strategy mapped to that regime, and bounds its signal with a risk policy
//! before anything reaches execution. The same pipeline replays over history in
//! the backtester.

pub mod backtest;
pub mod config;
pub mod data;
pub mod decision;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod regime;
pub mod risk;
pub mod snapshot;
pub mod strategies;
pub mod types;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use regime::{classify, Regime, RegimeThresholds};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use strategies::{Strategy, StrategyKind, StrategyRegistry};
pub use types::*;
