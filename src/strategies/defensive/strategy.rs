//! Defensive Strategy
//!
//! Stays flat unless a strong move invites a small probe against it. Probe
//! confidence never exceeds `max_confidence`, which keeps it at or below most
//! risk policies' confidence floors.

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::strategies::Strategy;
use crate::{Direction, Signal};

use super::config::DefensiveConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefensiveState {
    /// Calls left before another probe is allowed
    pub cooldown_remaining: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefensiveStrategy {
    config: DefensiveConfig,
}

impl DefensiveStrategy {
    pub fn new(config: DefensiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DefensiveConfig {
        &self.config
    }
}

impl Strategy for DefensiveStrategy {
    type State = DefensiveState;

    fn name(&self) -> &'static str {
        "defensive"
    }

    fn generate(&self, snapshot: &Snapshot, state: &DefensiveState) -> (Signal, DefensiveState) {
        if state.cooldown_remaining > 0 {
            return (
                Signal::flat(),
                DefensiveState {
                    cooldown_remaining: state.cooldown_remaining - 1,
                },
            );
        }

        let slope = snapshot.trend_slope;
        if !self.config.probe_enabled || slope.abs() < self.config.probe_min_slope {
            return (Signal::flat(), state.clone());
        }

        // against the move
        let direction = if slope > 0.0 {
            Direction::Short
        } else {
            Direction::Long
        };
        let close = snapshot.close;
        let pct = self.config.probe_exit_pct;
        let (stop, target) = match direction {
            Direction::Long => (close * (1.0 - pct), close * (1.0 + pct)),
            _ => (close * (1.0 + pct), close * (1.0 - pct)),
        };

        let signal = Signal::new(
            direction,
            self.config.max_confidence,
            self.config.probe_size_fraction,
        )
        .with_exits(stop, target);

        (
            signal,
            DefensiveState {
                cooldown_remaining: self.config.probe_cooldown_bars,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(trend_slope: f64) -> Snapshot {
        Snapshot {
            index: 40,
            datetime: Utc::now(),
            close: 50.0,
            volatility: 0.09,
            trend_slope,
            range_width: 0.2,
            midpoint: 48.0,
            mean_close: 49.0,
        }
    }

    #[test]
    fn test_flat_without_strong_move() {
        let s = DefensiveStrategy::new(DefensiveConfig::default());
        let (signal, state) = s.generate(&snapshot(0.005), &DefensiveState::default());
        assert_eq!(signal.direction, Direction::Flat);
        assert_eq!(state.cooldown_remaining, 0);
    }

    #[test]
    fn test_probe_is_counter_trend_and_capped() {
        let s = DefensiveStrategy::new(DefensiveConfig::default());
        let (signal, state) = s.generate(&snapshot(0.05), &DefensiveState::default());

        assert_eq!(signal.direction, Direction::Short);
        assert!(signal.confidence <= 0.2);
        assert!(signal.size_fraction <= 0.1);
        assert_eq!(state.cooldown_remaining, 5);
    }

    #[test]
    fn test_cooldown_after_probe() {
        let s = DefensiveStrategy::new(DefensiveConfig {
            probe_cooldown_bars: 2,
            ..Default::default()
        });
        let (_, state) = s.generate(&snapshot(-0.05), &DefensiveState::default());
        let (first, state) = s.generate(&snapshot(-0.05), &state);
        let (second, state) = s.generate(&snapshot(-0.05), &state);
        let (third, _) = s.generate(&snapshot(-0.05), &state);

        assert_eq!(first.direction, Direction::Flat);
        assert_eq!(second.direction, Direction::Flat);
        assert_eq!(third.direction, Direction::Long);
    }

    #[test]
    fn test_probes_can_be_disabled() {
        let s = DefensiveStrategy::new(DefensiveConfig {
            probe_enabled: false,
            ..Default::default()
        });
        let (signal, _) = s.generate(&snapshot(0.5), &DefensiveState::default());
        assert_eq!(signal.direction, Direction::Flat);
    }
}
