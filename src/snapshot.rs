//! Market snapshot builder
//!
//! Turns a bar series into trailing-window indicator bundles. A snapshot at index
//! `t` depends only on bars `t + 1 - W ..= t`, so rebuilding from the same bars
//! always yields the same snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::indicators::{highest, lowest, mean, ols_slope, realized_volatility};
use crate::Bar;

/// Mean close below this cannot be used to normalize indicators
const MIN_NORMALIZER: f64 = 1e-9;

/// Indicator bundle over a trailing window of bars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Index of the last bar of the window
    pub index: usize,
    pub datetime: DateTime<Utc>,
    pub close: f64,
    /// Sample std-dev of log returns over the window
    pub volatility: f64,
    /// OLS slope of close per bar, divided by mean close
    pub trend_slope: f64,
    /// (max high - min low) / mean close
    pub range_width: f64,
    /// (max high + min low) / 2
    pub midpoint: f64,
    pub mean_close: f64,
}

impl Snapshot {
    /// Signed distance of the close from the window midpoint, relative to mean close
    pub fn displacement(&self) -> f64 {
        (self.close - self.midpoint) / self.mean_close
    }
}

/// Builds snapshots over a fixed window length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotBuilder {
    window: usize,
}

impl SnapshotBuilder {
    pub fn new(window: usize) -> EngineResult<Self> {
        if window < 2 {
            return Err(EngineError::InvalidConfig(format!(
                "snapshot window must be >= 2, got {}",
                window
            )));
        }
        Ok(Self { window })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// First index at which a snapshot can be built
    pub fn first_index(&self) -> usize {
        self.window - 1
    }

    /// Build the snapshot whose window ends at `index`
    pub fn build_at(&self, bars: &[Bar], index: usize) -> EngineResult<Snapshot> {
        if index >= bars.len() {
            return Err(EngineError::IndexOutOfRange {
                index,
                len: bars.len(),
            });
        }
        if index + 1 < self.window {
            return Err(EngineError::InsufficientHistory {
                index,
                window: self.window,
                available: index + 1,
            });
        }

        let window = &bars[index + 1 - self.window..=index];
        let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
        let highs: Vec<f64> = window.iter().map(|b| b.high).collect();
        let lows: Vec<f64> = window.iter().map(|b| b.low).collect();

        let bad = |indicator: &'static str| EngineError::BadIndicator { index, indicator };

        let mean_close = mean(&closes);
        if !mean_close.is_finite() || mean_close.abs() < MIN_NORMALIZER {
            return Err(bad("mean_close"));
        }

        let volatility = realized_volatility(&closes);
        if !volatility.is_finite() {
            return Err(bad("volatility"));
        }

        let trend_slope = ols_slope(&closes).map(|s| s / mean_close).unwrap_or(f64::NAN);
        if !trend_slope.is_finite() {
            return Err(bad("trend_slope"));
        }

        let max_high = highest(&highs);
        let min_low = lowest(&lows);
        let range_width = (max_high - min_low) / mean_close;
        if !range_width.is_finite() {
            return Err(bad("range_width"));
        }
        let midpoint = (max_high + min_low) / 2.0;

        let last = &bars[index];
        if !last.close.is_finite() {
            return Err(bad("close"));
        }

        Ok(Snapshot {
            index,
            datetime: last.datetime,
            close: last.close,
            volatility,
            trend_slope,
            range_width,
            midpoint,
            mean_close,
        })
    }

    /// Lazy snapshot sequence, one item per index from `W - 1` to the end
    pub fn snapshots<'a>(&self, bars: &'a [Bar]) -> Snapshots<'a> {
        Snapshots {
            builder: *self,
            bars,
            next: self.first_index(),
        }
    }
}

/// Iterator returned by [`SnapshotBuilder::snapshots`].
///
/// Items are `Err` only for bar-local failures (`BadIndicator`); iteration continues
/// past them.
#[derive(Debug, Clone)]
pub struct Snapshots<'a> {
    builder: SnapshotBuilder,
    bars: &'a [Bar],
    next: usize,
}

impl Iterator for Snapshots<'_> {
    type Item = EngineResult<Snapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.bars.len() {
            return None;
        }
        let item = self.builder.build_at(self.bars, self.next);
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bars.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Snapshots<'_> {}
