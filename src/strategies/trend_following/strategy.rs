//! Trend Following Strategy
//!
//! Direction follows the sign of the trend slope. Confidence is the slope
//! magnitude relative to `trend_strong × full_confidence_multiple`, capped at 1.0,
//! so a trend just clearing the classifier threshold trades small and a steep one
//! trades full size.

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::strategies::Strategy;
use crate::{Direction, Signal};

use super::config::TrendFollowingConfig;

/// Direction currently ridden and for how many consecutive calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendState {
    pub riding: Direction,
    pub bars_riding: usize,
}

impl Default for TrendState {
    fn default() -> Self {
        Self {
            riding: Direction::Flat,
            bars_riding: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrendFollowingStrategy {
    config: TrendFollowingConfig,
    trend_strong: f64,
}

impl TrendFollowingStrategy {
    pub fn new(config: TrendFollowingConfig, trend_strong: f64) -> Self {
        Self {
            config,
            trend_strong,
        }
    }

    pub fn config(&self) -> &TrendFollowingConfig {
        &self.config
    }

    pub fn trend_strong(&self) -> f64 {
        self.trend_strong
    }

    fn confidence(&self, slope: f64) -> f64 {
        let scale = self.trend_strong * self.config.full_confidence_multiple;
        if scale <= 0.0 {
            return 1.0;
        }
        (slope.abs() / scale).min(1.0)
    }
}

impl Strategy for TrendFollowingStrategy {
    type State = TrendState;

    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn generate(&self, snapshot: &Snapshot, state: &TrendState) -> (Signal, TrendState) {
        let slope = snapshot.trend_slope;
        let direction = if slope > 0.0 {
            Direction::Long
        } else if slope < 0.0 {
            Direction::Short
        } else {
            Direction::Flat
        };

        if direction.is_flat() {
            return (Signal::flat(), TrendState::default());
        }

        let mut confidence = self.confidence(slope);
        let reversed = matches!(
            (state.riding, direction),
            (Direction::Long, Direction::Short) | (Direction::Short, Direction::Long)
        );
        if reversed {
            tracing::debug!(
                "Trend reversal at bar {}: {:?} -> {:?}",
                snapshot.index,
                state.riding,
                direction
            );
            confidence *= self.config.reversal_discount;
        }

        let bars_riding = if state.riding == direction {
            state.bars_riding + 1
        } else {
            1
        };

        let mut signal = Signal::new(direction, confidence, confidence);
        if self.config.use_exits {
            let close = snapshot.close;
            signal = match direction {
                Direction::Long => signal.with_exits(
                    close * (1.0 - self.config.stop_pct),
                    close * (1.0 + self.config.target_pct),
                ),
                _ => signal.with_exits(
                    close * (1.0 + self.config.stop_pct),
                    close * (1.0 - self.config.target_pct),
                ),
            };
        }

        (
            signal,
            TrendState {
                riding: direction,
                bars_riding,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;

    fn snapshot(trend_slope: f64) -> Snapshot {
        Snapshot {
            index: 30,
            datetime: Utc::now(),
            close: 200.0,
            volatility: 0.01,
            trend_slope,
            range_width: 0.05,
            midpoint: 195.0,
            mean_close: 195.0,
        }
    }

    fn strategy() -> TrendFollowingStrategy {
        TrendFollowingStrategy::new(TrendFollowingConfig::default(), 0.01)
    }

    #[test]
    fn test_direction_follows_slope_sign() {
        let s = strategy();
        let (up, _) = s.generate(&snapshot(0.02), &TrendState::default());
        let (down, _) = s.generate(&snapshot(-0.02), &TrendState::default());
        let (flat, _) = s.generate(&snapshot(0.0), &TrendState::default());

        assert_eq!(up.direction, Direction::Long);
        assert_eq!(down.direction, Direction::Short);
        assert_eq!(flat.direction, Direction::Flat);
    }

    #[test]
    fn test_confidence_scales_and_saturates() {
        let s = strategy();
        let (at_threshold, _) = s.generate(&snapshot(0.01), &TrendState::default());
        let (steeper, _) = s.generate(&snapshot(0.02), &TrendState::default());
        let (extreme, _) = s.generate(&snapshot(0.5), &TrendState::default());

        assert_relative_eq!(at_threshold.confidence, 1.0 / 3.0, epsilon = 1e-12);
        assert!(steeper.confidence > at_threshold.confidence);
        assert_eq!(extreme.confidence, 1.0);
    }

    #[test]
    fn test_exit_levels_bracket_the_close() {
        let s = strategy();
        let (long, _) = s.generate(&snapshot(0.02), &TrendState::default());
        let exits = long.exits.unwrap();
        assert_relative_eq!(exits.stop_loss, 196.0);
        assert_relative_eq!(exits.take_profit, 208.0);

        let (short, _) = s.generate(&snapshot(-0.02), &TrendState::default());
        let exits = short.exits.unwrap();
        assert!(exits.stop_loss > 200.0 && exits.take_profit < 200.0);
    }

    #[test]
    fn test_reversal_is_discounted_once() {
        let s = strategy();
        let (_, riding_up) = s.generate(&snapshot(0.03), &TrendState::default());
        assert_eq!(riding_up.bars_riding, 1);

        let (first_down, state) = s.generate(&snapshot(-0.03), &riding_up);
        assert_relative_eq!(first_down.confidence, 0.5);

        let (second_down, state) = s.generate(&snapshot(-0.03), &state);
        assert_eq!(second_down.confidence, 1.0);
        assert_eq!(state.bars_riding, 2);
    }
}
