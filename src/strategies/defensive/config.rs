//! Defensive Configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Configuration for Defensive Strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefensiveConfig {
    /// Emit counter-trend probes at all (default: true)
    #[serde(default = "default_probe_enabled")]
    pub probe_enabled: bool,

    /// Minimum |trend slope| before probing against it (default: 0.02)
    #[serde(default = "default_probe_min_slope")]
    pub probe_min_slope: f64,

    /// Hard cap on signal confidence (default: 0.15)
    #[serde(default = "default_max_confidence")]
    pub max_confidence: f64,

    /// Size fraction of a probe (default: 0.1)
    #[serde(default = "default_probe_size_fraction")]
    pub probe_size_fraction: f64,

    /// Calls to stay flat after a probe (default: 5)
    #[serde(default = "default_probe_cooldown_bars")]
    pub probe_cooldown_bars: usize,

    /// Stop and target distance of a probe as a fraction of the close (default: 0.01)
    #[serde(default = "default_probe_exit_pct")]
    pub probe_exit_pct: f64,
}

fn default_probe_enabled() -> bool { true }
fn default_probe_min_slope() -> f64 { 0.02 }
fn default_max_confidence() -> f64 { 0.15 }
fn default_probe_size_fraction() -> f64 { 0.1 }
fn default_probe_cooldown_bars() -> usize { 5 }
fn default_probe_exit_pct() -> f64 { 0.01 }

impl Default for DefensiveConfig {
    fn default() -> Self {
        Self {
            probe_enabled: default_probe_enabled(),
            probe_min_slope: default_probe_min_slope(),
            max_confidence: default_max_confidence(),
            probe_size_fraction: default_probe_size_fraction(),
            probe_cooldown_bars: default_probe_cooldown_bars(),
            probe_exit_pct: default_probe_exit_pct(),
        }
    }
}

impl DefensiveConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !(self.probe_min_slope >= 0.0 && self.probe_min_slope.is_finite()) {
            return invalid(format!(
                "defensive.probe_min_slope must be >= 0, got {}",
                self.probe_min_slope
            ));
        }
        if !(0.0..=1.0).contains(&self.max_confidence) {
            return invalid(format!(
                "defensive.max_confidence must be in [0, 1], got {}",
                self.max_confidence
            ));
        }
        if !(0.0..=1.0).contains(&self.probe_size_fraction) {
            return invalid(format!(
                "defensive.probe_size_fraction must be in [0, 1], got {}",
                self.probe_size_fraction
            ));
        }
        if !(self.probe_exit_pct > 0.0 && self.probe_exit_pct < 1.0) {
            return invalid(format!(
                "defensive.probe_exit_pct must be in (0, 1), got {}",
                self.probe_exit_pct
            ));
        }
        Ok(())
    }
}
