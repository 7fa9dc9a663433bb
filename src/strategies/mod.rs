//! Trading Strategies Module
//!
//! One strategy per regime, as a closed set of variants behind a single
//! `generate` capability. Strategy state is never stored inside a strategy: the
//! caller owns it and threads it from one call to the next, one state per
//! registry entry and instrument.

pub mod defensive;
pub mod mean_reversion;
pub mod trend_following;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::regime::{Regime, RegimeThresholds};
use crate::snapshot::Snapshot;
use crate::Signal;

pub use defensive::{DefensiveConfig, DefensiveState, DefensiveStrategy};
pub use mean_reversion::{MeanReversionConfig, MeanReversionState, MeanReversionStrategy};
pub use trend_following::{TrendFollowingConfig, TrendFollowingStrategy, TrendState};

/// Trading strategy trait
pub trait Strategy: Send + Sync {
    /// Strategy-private state carried by the caller between calls
    type State: Clone + Default + PartialEq + std::fmt::Debug;

    fn name(&self) -> &'static str;

    /// Produce a signal and the state to pass into the next call.
    /// Must be deterministic in `(snapshot, state)`.
    fn generate(&self, snapshot: &Snapshot, state: &Self::State) -> (Signal, Self::State);
}

/// The closed set of strategy variants
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyKind {
    TrendFollowing(TrendFollowingStrategy),
    MeanReversion(MeanReversionStrategy),
    Defensive(DefensiveStrategy),
}

/// State of any strategy variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyState {
    TrendFollowing(TrendState),
    MeanReversion(MeanReversionState),
    Defensive(DefensiveState),
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::TrendFollowing(s) => s.name(),
            StrategyKind::MeanReversion(s) => s.name(),
            StrategyKind::Defensive(s) => s.name(),
        }
    }

    pub fn initial_state(&self) -> StrategyState {
        match self {
            StrategyKind::TrendFollowing(_) => StrategyState::TrendFollowing(TrendState::default()),
            StrategyKind::MeanReversion(_) => StrategyState::MeanReversion(MeanReversionState::default()),
            StrategyKind::Defensive(_) => StrategyState::Defensive(DefensiveState::default()),
        }
    }

    /// Dispatch to the variant. A state belonging to another variant is replaced
    /// by a fresh one.
    pub fn generate(&self, snapshot: &Snapshot, state: &StrategyState) -> (Signal, StrategyState) {
        match (self, state) {
            (StrategyKind::TrendFollowing(s), StrategyState::TrendFollowing(st)) => {
                let (signal, next) = s.generate(snapshot, st);
                (signal, StrategyState::TrendFollowing(next))
            }
            (StrategyKind::MeanReversion(s), StrategyState::MeanReversion(st)) => {
                let (signal, next) = s.generate(snapshot, st);
                (signal, StrategyState::MeanReversion(next))
            }
            (StrategyKind::Defensive(s), StrategyState::Defensive(st)) => {
                let (signal, next) = s.generate(snapshot, st);
                (signal, StrategyState::Defensive(next))
            }
            (kind, _) => {
                tracing::warn!(
                    "State does not belong to strategy {}, starting from a fresh state",
                    kind.name()
                );
                kind.generate(snapshot, &kind.initial_state())
            }
        }
    }
}

/// Parameters of all strategy variants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub trend_following: TrendFollowingConfig,
    #[serde(default)]
    pub mean_reversion: MeanReversionConfig,
    #[serde(default)]
    pub defensive: DefensiveConfig,
}

impl StrategiesConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.trend_following.validate()?;
        self.mean_reversion.validate()?;
        self.defensive.validate()
    }
}

/// Mapping from every regime to exactly one strategy. Regimes registered
/// together share one entry, and with it one carried state.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRegistry {
    entries: Vec<StrategyKind>,
    /// Entry index, by `Regime::index`
    slots: Vec<usize>,
}

impl StrategyRegistry {
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Default mapping: one trend-following entry shared by both trends,
    /// mean-reversion for ranging, defensive for high volatility. Strategy
    /// parameters are validated first.
    pub fn standard(thresholds: &RegimeThresholds, config: &StrategiesConfig) -> EngineResult<Self> {
        config.validate()?;

        let trend = TrendFollowingStrategy::new(config.trend_following.clone(), thresholds.trend_strong);
        StrategyRegistry::builder()
            .register_shared(
                &[Regime::TrendingUp, Regime::TrendingDown],
                StrategyKind::TrendFollowing(trend),
            )
            .register(
                Regime::Ranging,
                StrategyKind::MeanReversion(MeanReversionStrategy::new(
                    config.mean_reversion.clone(),
                    thresholds.range_tight,
                )),
            )
            .register(
                Regime::HighVolatility,
                StrategyKind::Defensive(DefensiveStrategy::new(config.defensive.clone())),
            )
            .build()
    }

    pub fn get(&self, regime: Regime) -> &StrategyKind {
        &self.entries[self.slots[regime.index()]]
    }

    /// Number of distinct strategy entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Fresh state for every entry
    pub fn initial_states(&self) -> RegimeStates {
        RegimeStates {
            slots: self.slots.clone(),
            states: self.entries.iter().map(StrategyKind::initial_state).collect(),
        }
    }

    /// Run the regime's strategy against its carried state, updating it in place
    pub fn generate(&self, regime: Regime, snapshot: &Snapshot, states: &mut RegimeStates) -> Signal {
        let strategy = self.get(regime);
        let (signal, next) = strategy.generate(snapshot, states.get(regime));
        states.set(regime, next);
        signal
    }
}

#[derive(Debug, Default)]
pub struct StrategyRegistryBuilder {
    entries: Vec<StrategyKind>,
    slots: HashMap<Regime, usize>,
}

impl StrategyRegistryBuilder {
    /// Map `regime` to `strategy`, replacing any earlier mapping
    pub fn register(self, regime: Regime, strategy: StrategyKind) -> Self {
        self.register_shared(&[regime], strategy)
    }

    /// Map several regimes to one entry whose state they share
    pub fn register_shared(mut self, regimes: &[Regime], strategy: StrategyKind) -> Self {
        let slot = self.entries.len();
        self.entries.push(strategy);
        for &regime in regimes {
            self.slots.insert(regime, slot);
        }
        self
    }

    /// Fails with `UnhandledRegime` if any regime is left unmapped. Entries no
    /// regime points at any more are dropped.
    pub fn build(self) -> EngineResult<StrategyRegistry> {
        let mut pending: Vec<Option<StrategyKind>> = self.entries.into_iter().map(Some).collect();
        let mut renumbered: HashMap<usize, usize> = HashMap::new();
        let mut entries = Vec::new();
        let mut slots = Vec::with_capacity(Regime::ALL.len());

        for regime in Regime::ALL {
            let registered = *self
                .slots
                .get(&regime)
                .ok_or(EngineError::UnhandledRegime(regime))?;
            let slot = match renumbered.get(&registered) {
                Some(&slot) => slot,
                None => {
                    let strategy = pending[registered]
                        .take()
                        .ok_or(EngineError::UnhandledRegime(regime))?;
                    entries.push(strategy);
                    renumbered.insert(registered, entries.len() - 1);
                    entries.len() - 1
                }
            };
            slots.push(slot);
        }

        Ok(StrategyRegistry { entries, slots })
    }
}

/// Per-entry strategy states for one instrument. Only a registry creates one,
/// so there is always a state for every regime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegimeStates {
    #[serde(skip)]
    slots: Vec<usize>,
    states: Vec<StrategyState>,
}

impl RegimeStates {
    pub fn get(&self, regime: Regime) -> &StrategyState {
        &self.states[self.slots[regime.index()]]
    }

    pub fn set(&mut self, regime: Regime, state: StrategyState) {
        self.states[self.slots[regime.index()]] = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;
    use chrono::Utc;

    fn snapshot(trend_slope: f64) -> Snapshot {
        Snapshot {
            index: 20,
            datetime: Utc::now(),
            close: 100.0,
            volatility: 0.01,
            trend_slope,
            range_width: 0.03,
            midpoint: 99.0,
            mean_close: 100.0,
        }
    }

    #[test]
    fn test_missing_regime_fails_at_build() {
        let config = StrategiesConfig::default();
        let err = StrategyRegistry::builder()
            .register(
                Regime::TrendingUp,
                StrategyKind::TrendFollowing(TrendFollowingStrategy::new(
                    config.trend_following.clone(),
                    0.01,
                )),
            )
            .register(
                Regime::Ranging,
                StrategyKind::MeanReversion(MeanReversionStrategy::new(
                    config.mean_reversion.clone(),
                    0.005,
                )),
            )
            .build()
            .unwrap_err();

        assert_eq!(err, EngineError::UnhandledRegime(Regime::TrendingDown));
    }

    #[test]
    fn test_standard_registry_maps_every_regime() {
        let registry =
            StrategyRegistry::standard(&RegimeThresholds::default(), &StrategiesConfig::default()).unwrap();

        assert_eq!(registry.get(Regime::TrendingUp).name(), "trend_following");
        assert_eq!(registry.get(Regime::TrendingDown).name(), "trend_following");
        assert_eq!(registry.get(Regime::Ranging).name(), "mean_reversion");
        assert_eq!(registry.get(Regime::HighVolatility).name(), "defensive");
    }

    #[test]
    fn test_states_are_per_entry() {
        let registry =
            StrategyRegistry::standard(&RegimeThresholds::default(), &StrategiesConfig::default()).unwrap();
        assert_eq!(registry.entry_count(), 3);
        let mut states = registry.initial_states();

        let signal = registry.generate(Regime::TrendingUp, &snapshot(0.02), &mut states);
        assert_eq!(signal.direction, Direction::Long);

        // both trends moved together, the other entries did not
        let fresh = registry.initial_states();
        assert_ne!(states.get(Regime::TrendingUp), fresh.get(Regime::TrendingUp));
        assert_eq!(states.get(Regime::TrendingDown), states.get(Regime::TrendingUp));
        assert_eq!(states.get(Regime::Ranging), fresh.get(Regime::Ranging));
        assert_eq!(states.get(Regime::HighVolatility), fresh.get(Regime::HighVolatility));
    }

    #[test]
    fn test_trend_flip_is_discounted_through_registry() {
        let registry =
            StrategyRegistry::standard(&RegimeThresholds::default(), &StrategiesConfig::default()).unwrap();
        let mut states = registry.initial_states();

        // beyond trend_strong 0.01 * multiple 3: saturated
        let up = registry.generate(Regime::TrendingUp, &snapshot(0.05), &mut states);
        assert_eq!(up.direction, Direction::Long);
        assert_eq!(up.confidence, 1.0);

        let down = registry.generate(Regime::TrendingDown, &snapshot(-0.05), &mut states);
        assert_eq!(down.direction, Direction::Short);
        assert_eq!(down.confidence, 0.5);

        // second bar of the new trend is no longer discounted
        let again = registry.generate(Regime::TrendingDown, &snapshot(-0.05), &mut states);
        assert_eq!(again.confidence, 1.0);
    }

    #[test]
    fn test_separate_registrations_keep_separate_states() {
        let config = StrategiesConfig::default();
        let trend = || {
            StrategyKind::TrendFollowing(TrendFollowingStrategy::new(config.trend_following.clone(), 0.01))
        };
        let registry = StrategyRegistry::builder()
            .register(Regime::TrendingUp, trend())
            .register(Regime::TrendingDown, trend())
            .register(Regime::Ranging, trend())
            .register(Regime::HighVolatility, trend())
            // replaced mapping leaves its entry orphaned
            .register(
                Regime::HighVolatility,
                StrategyKind::Defensive(DefensiveStrategy::new(config.defensive.clone())),
            )
            .build()
            .unwrap();
        assert_eq!(registry.entry_count(), 4);
        assert_eq!(registry.get(Regime::HighVolatility).name(), "defensive");

        let mut states = registry.initial_states();
        registry.generate(Regime::TrendingUp, &snapshot(0.02), &mut states);
        assert_eq!(
            states.get(Regime::TrendingDown),
            registry.initial_states().get(Regime::TrendingDown)
        );
    }

    #[test]
    fn test_standard_registry_validates_strategy_config() {
        let thresholds = RegimeThresholds::default();
        let assert_invalid = |config: StrategiesConfig| {
            assert!(matches!(
                StrategyRegistry::standard(&thresholds, &config),
                Err(EngineError::InvalidConfig(_))
            ));
        };

        let mut config = StrategiesConfig::default();
        config.trend_following.full_confidence_multiple = -1.0;
        assert_invalid(config);

        let mut config = StrategiesConfig::default();
        config.trend_following.stop_pct = 1.0;
        assert_invalid(config);

        let mut config = StrategiesConfig::default();
        config.trend_following.reversal_discount = 1.5;
        assert_invalid(config);

        let mut config = StrategiesConfig::default();
        config.mean_reversion.stop_pct = 1.2;
        assert_invalid(config);

        let mut config = StrategiesConfig::default();
        config.mean_reversion.full_confidence_range = 0.0;
        assert_invalid(config);

        let mut config = StrategiesConfig::default();
        config.defensive.max_confidence = 2.0;
        assert_invalid(config);

        let mut config = StrategiesConfig::default();
        config.defensive.probe_exit_pct = f64::NAN;
        assert_invalid(config);

        assert!(StrategiesConfig::default().validate().is_ok());
    }

    #[test]
    fn test_mismatched_state_is_replaced() {
        let registry =
            StrategyRegistry::standard(&RegimeThresholds::default(), &StrategiesConfig::default()).unwrap();
        let strategy = registry.get(Regime::TrendingUp);
        let foreign = StrategyState::Defensive(DefensiveState::default());

        let (signal, next) = strategy.generate(&snapshot(0.02), &foreign);
        assert_eq!(signal.direction, Direction::Long);
        assert!(matches!(next, StrategyState::TrendFollowing(_)));
    }
}
