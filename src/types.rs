//! Core data types used across the decision pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, EngineResult};
use crate::regime::Regime;

/// Validation errors for bar data
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One OHLCV sample for a fixed time interval. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Create a new bar with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        let bar = Self::new_unchecked(datetime, open, high, low, close, volume);
        bar.validate()?;
        Ok(bar)
    }

    /// Create a bar without validation (for trusted sources or when validation is done separately)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate the bar data
    pub fn validate(&self) -> Result<(), BarValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(BarValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(BarValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Check the strictly-increasing timestamp invariant of a bar series.
///
/// Gaps are allowed; duplicated or out-of-order timestamps are not.
pub fn validate_series(bars: &[Bar]) -> EngineResult<()> {
    for (i, pair) in bars.windows(2).enumerate() {
        if pair[1].datetime <= pair[0].datetime {
            return Err(EngineError::NonMonotonicTimestamps {
                index: i + 1,
                previous: pair[0].datetime,
                current: pair[1].datetime,
            });
        }
    }
    Ok(())
}

/// Trading pair symbol using Arc<str> for cheap cloning
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directional recommendation of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// The tradable side, or `None` for `Flat`
    pub fn side(self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::Flat => None,
        }
    }

    pub fn is_flat(self) -> bool {
        self == Direction::Flat
    }
}

/// Side of an order intent or an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Side::Long => Direction::Long,
            Side::Short => Direction::Short,
        }
    }
}

/// Protective price levels a strategy may attach to its signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

/// A strategy's raw recommendation, consumed immediately by the risk manager
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    /// Conviction in [0, 1]
    pub confidence: f64,
    /// Fraction of the maximum allowed position, in [0, 1]
    pub size_fraction: f64,
    pub exits: Option<ExitLevels>,
}

impl Signal {
    pub fn new(direction: Direction, confidence: f64, size_fraction: f64) -> Self {
        Self {
            direction,
            confidence: confidence.clamp(0.0, 1.0),
            size_fraction: size_fraction.clamp(0.0, 1.0),
            exits: None,
        }
    }

    pub fn flat() -> Self {
        Self::new(Direction::Flat, 0.0, 0.0)
    }

    pub fn with_exits(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.exits = Some(ExitLevels {
            stop_loss,
            take_profit,
        });
        self
    }
}

/// Open position state owned by the backtest engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_index: usize,
    /// Margin committed to the position
    pub notional: f64,
    pub leverage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub regime_at_entry: Regime,
    pub unrealized_pnl: f64,
}

impl Position {
    /// Market exposure (notional × leverage)
    pub fn exposure(&self) -> f64 {
        self.notional * self.leverage
    }

    /// Gross PnL if the position were closed at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        self.side.sign() * (price - self.entry_price) / self.entry_price * self.exposure()
    }

    /// Mark to market at `price`
    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = self.pnl_at(price);
    }

    pub fn bars_held(&self, index: usize) -> usize {
        index.saturating_sub(self.entry_index)
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    OppositeSignal,
    /// The regime turned against the position
    RegimeFlip,
    TimeStop,
    EndOfData,
}

/// Completed trade record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub notional: f64,
    pub leverage: f64,
    pub pnl: f64,
    pub fees: f64,
    pub net_pnl: f64,
    pub regime_at_entry: Regime,
    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    /// Return on margin in percent
    pub fn return_pct(&self) -> f64 {
        if self.notional == 0.0 {
            return 0.0;
        }
        self.net_pnl / self.notional * 100.0
    }

    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

/// Summary statistics of a backtest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Percent
    pub total_return: f64,
    /// Percent, peak to trough
    pub max_drawdown: f64,
    /// Percent
    pub win_rate: f64,
    /// Mean over std of per-bar equity returns, annualized by `periods_per_year`
    pub sharpe_ratio: f64,
    /// Gross wins over gross losses; `None` when there are no losing trades
    pub profit_factor: Option<f64>,
    /// Average net PnL per trade
    pub expectancy: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub total_fees: f64,
}
