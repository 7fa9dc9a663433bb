//! Configuration management
//!
//! Loads the JSON configuration file and turns it into validated core types.
//! Every section has defaults, so a config file only needs the keys it changes.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backtest::{BacktestConfig, Backtester};
use crate::regime::RegimeThresholds;
use crate::risk::RiskPolicy;
use crate::strategies::StrategiesConfig;
use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub risk: RiskPolicy,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub backtest: BacktestSettings,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Backtest settings for the core engine
    pub fn to_backtest_config(&self) -> BacktestConfig {
        BacktestConfig {
            window: self.engine.window,
            thresholds: self.engine.thresholds,
            policy: self.risk.clone(),
            initial_equity: self.trading.initial_capital,
            fee_rate: self.exchange.taker_fee,
            slippage: self.exchange.assumed_slippage,
            max_holding_bars: self.backtest.max_holding_bars,
            regime_flip_exit: self.backtest.regime_flip_exit,
            periods_per_year: self.backtest.periods_per_year,
        }
    }

    /// Backtester over the standard regime → strategy mapping
    pub fn backtester(&self) -> Result<Backtester> {
        Backtester::standard(self.to_backtest_config(), &self.strategies)
            .context("Invalid backtest configuration")
    }
}

/// Exchange cost model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_taker_fee")]
    pub taker_fee: f64,
    #[serde(default = "default_slippage")]
    pub assumed_slippage: f64,
}

fn default_taker_fee() -> f64 { 0.001 }
fn default_slippage() -> f64 { 0.0005 }

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            taker_fee: default_taker_fee(), // 0.1%
            assumed_slippage: default_slippage(),
        }
    }
}

/// Trading configuration
///
/// Currency-agnostic: `initial_capital` only has to be in the same currency as
/// the price data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
}
fn default_initial_capital() -> f64 { 10_000.0 }

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: default_symbols(),
            initial_capital: default_initial_capital(),
        }
    }
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Snapshot window, bar interval and classifier thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    /// Bar interval label, also used to find data files (`{symbol}_{timeframe}.csv`)
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default)]
    pub thresholds: RegimeThresholds,
}

fn default_window() -> usize { 20 }
fn default_timeframe() -> String { "1d".to_string() }

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            window: default_window(),
            timeframe: default_timeframe(),
            thresholds: RegimeThresholds::default(),
        }
    }
}

/// Backtest-only settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    #[serde(default)]
    pub max_holding_bars: Option<usize>,
    #[serde(default)]
    pub regime_flip_exit: bool,
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

fn default_data_dir() -> String { "data".to_string() }
fn default_results_dir() -> String { "results".to_string() }
fn default_periods_per_year() -> f64 { 365.0 }

impl Default for BacktestSettings {
    fn default() -> Self {
        BacktestSettings {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            max_holding_bars: None,
            regime_flip_exit: false,
            periods_per_year: default_periods_per_year(),
        }
    }
}

impl BacktestSettings {
    /// Where results go when no output path is given:
    /// `{results_dir}/backtest_{timestamp}.json`
    pub fn default_output_path(&self, now: NaiveDateTime) -> PathBuf {
        Path::new(&self.results_dir).join(format!(
            "backtest_{}.json",
            now.format("%Y-%m-%d_%H-%M-%S")
        ))
    }
}
