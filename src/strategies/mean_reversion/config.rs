//! Mean Reversion Configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Configuration for Mean Reversion Strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    /// Range width at which confidence saturates (default: 0.04)
    #[serde(default = "default_full_confidence_range")]
    pub full_confidence_range: f64,

    /// Stop loss distance beyond the close as a fraction (default: 0.015)
    #[serde(default = "default_stop_pct")]
    pub stop_pct: f64,

    /// Target the window midpoint as take profit (default: true)
    #[serde(default = "default_target_midpoint")]
    pub target_midpoint: bool,
}

fn default_full_confidence_range() -> f64 { 0.04 }
fn default_stop_pct() -> f64 { 0.015 }
fn default_target_midpoint() -> bool { true }

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            full_confidence_range: default_full_confidence_range(),
            stop_pct: default_stop_pct(),
            target_midpoint: default_target_midpoint(),
        }
    }
}

impl MeanReversionConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.full_confidence_range > 0.0 && self.full_confidence_range.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "mean_reversion.full_confidence_range must be positive, got {}",
                self.full_confidence_range
            )));
        }
        if !(self.stop_pct > 0.0 && self.stop_pct < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "mean_reversion.stop_pct must be in (0, 1), got {}",
                self.stop_pct
            )));
        }
        Ok(())
    }
}
