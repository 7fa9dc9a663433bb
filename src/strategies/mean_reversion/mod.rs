//! Mean Reversion Strategy Module
//!
//! Fades displacement from the window midpoint while the market is ranging.

pub mod config;
pub mod strategy;

pub use config::MeanReversionConfig;
pub use strategy::{MeanReversionState, MeanReversionStrategy};
