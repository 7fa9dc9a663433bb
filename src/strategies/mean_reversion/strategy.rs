//! Mean Reversion Strategy
//!
//! ## Logic
//! - Close above the window midpoint: SHORT, expecting a return to the middle
//! - Close below the midpoint: LONG
//! - Close on the midpoint, or range narrower than `min_range_width`: FLAT
//!
//! Confidence grows with range width: a wider range leaves more room between
//! the edges and the midpoint target.

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::strategies::Strategy;
use crate::{Direction, Signal};

use super::config::MeanReversionConfig;

/// Last side faded and how many midpoint crossings have been seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionState {
    pub last_side: Direction,
    pub crossings: usize,
}

impl Default for MeanReversionState {
    fn default() -> Self {
        Self {
            last_side: Direction::Flat,
            crossings: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeanReversionStrategy {
    config: MeanReversionConfig,
    min_range_width: f64,
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig, min_range_width: f64) -> Self {
        Self {
            config,
            min_range_width,
        }
    }

    pub fn config(&self) -> &MeanReversionConfig {
        &self.config
    }

    pub fn min_range_width(&self) -> f64 {
        self.min_range_width
    }
}

impl Strategy for MeanReversionStrategy {
    type State = MeanReversionState;

    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn generate(&self, snapshot: &Snapshot, state: &MeanReversionState) -> (Signal, MeanReversionState) {
        if snapshot.range_width < self.min_range_width {
            return (Signal::flat(), state.clone());
        }

        let direction = if snapshot.close > snapshot.midpoint {
            Direction::Short
        } else if snapshot.close < snapshot.midpoint {
            Direction::Long
        } else {
            Direction::Flat
        };

        if direction.is_flat() {
            return (Signal::flat(), state.clone());
        }

        let crossed = !state.last_side.is_flat() && state.last_side != direction;
        let crossings = if crossed {
            tracing::debug!(
                "Midpoint crossing at bar {} (close {:.4}, midpoint {:.4})",
                snapshot.index,
                snapshot.close,
                snapshot.midpoint
            );
            state.crossings + 1
        } else {
            state.crossings
        };

        let confidence = if self.config.full_confidence_range > 0.0 {
            (snapshot.range_width / self.config.full_confidence_range).min(1.0)
        } else {
            1.0
        };

        let close = snapshot.close;
        let stop = match direction {
            Direction::Long => close * (1.0 - self.config.stop_pct),
            _ => close * (1.0 + self.config.stop_pct),
        };
        let mut signal = Signal::new(direction, confidence, confidence);
        if self.config.target_midpoint {
            signal = signal.with_exits(stop, snapshot.midpoint);
        }

        (
            signal,
            MeanReversionState {
                last_side: direction,
                crossings,
            },
        )
    }
}
