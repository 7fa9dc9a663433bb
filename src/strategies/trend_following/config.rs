//! Trend Following Configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Configuration for Trend Following Strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendFollowingConfig {
    /// Slope, in multiples of `trend_strong`, at which confidence saturates (default: 3.0)
    #[serde(default = "default_full_confidence_multiple")]
    pub full_confidence_multiple: f64,

    /// Confidence factor on the first bar after the trend flips side (default: 0.5)
    #[serde(default = "default_reversal_discount")]
    pub reversal_discount: f64,

    /// Stop loss distance as a fraction of the close (default: 0.02)
    #[serde(default = "default_stop_pct")]
    pub stop_pct: f64,

    /// Take profit distance as a fraction of the close (default: 0.04)
    #[serde(default = "default_target_pct")]
    pub target_pct: f64,

    /// Attach stop/take levels to signals (default: true)
    #[serde(default = "default_use_exits")]
    pub use_exits: bool,
}

fn default_full_confidence_multiple() -> f64 { 3.0 }
fn default_reversal_discount() -> f64 { 0.5 }
fn default_stop_pct() -> f64 { 0.02 }
fn default_target_pct() -> f64 { 0.04 }
fn default_use_exits() -> bool { true }

impl Default for TrendFollowingConfig {
    fn default() -> Self {
        Self {
            full_confidence_multiple: default_full_confidence_multiple(),
            reversal_discount: default_reversal_discount(),
            stop_pct: default_stop_pct(),
            target_pct: default_target_pct(),
            use_exits: default_use_exits(),
        }
    }
}

impl TrendFollowingConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !(self.full_confidence_multiple > 0.0 && self.full_confidence_multiple.is_finite()) {
            return invalid(format!(
                "trend_following.full_confidence_multiple must be positive, got {}",
                self.full_confidence_multiple
            ));
        }
        if !(0.0..=1.0).contains(&self.reversal_discount) {
            return invalid(format!(
                "trend_following.reversal_discount must be in [0, 1], got {}",
                self.reversal_discount
            ));
        }
        if !(self.stop_pct > 0.0 && self.stop_pct < 1.0) {
            return invalid(format!(
                "trend_following.stop_pct must be in (0, 1), got {}",
                self.stop_pct
            ));
        }
        if !(self.target_pct > 0.0 && self.target_pct.is_finite()) {
            return invalid(format!(
                "trend_following.target_pct must be positive, got {}",
                self.target_pct
            ));
        }
        Ok(())
    }
}
