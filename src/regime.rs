//! Market regime classification
//!
//! A fixed, inspectable rule set. Precedence is volatility, then trend, then
//! ranging as the fallback; a threshold is met on equality.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::snapshot::Snapshot;

/// Classified market condition governing strategy choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    TrendingUp,
    TrendingDown,
    Ranging,
    HighVolatility,
}

impl Regime {
    pub const ALL: [Regime; 4] = [
        Regime::TrendingUp,
        Regime::TrendingDown,
        Regime::Ranging,
        Regime::HighVolatility,
    ];

    /// Position in [`Regime::ALL`]
    pub fn index(self) -> usize {
        match self {
            Regime::TrendingUp => 0,
            Regime::TrendingDown => 1,
            Regime::Ranging => 2,
            Regime::HighVolatility => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Regime::TrendingUp => "TRENDING_UP",
            Regime::TrendingDown => "TRENDING_DOWN",
            Regime::Ranging => "RANGING",
            Regime::HighVolatility => "HIGH_VOLATILITY",
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    /// Volatility at or above this is HIGH_VOLATILITY
    #[serde(default = "default_vol_high")]
    pub vol_high: f64,
    /// |normalized slope| at or above this is a trend
    #[serde(default = "default_trend_strong")]
    pub trend_strong: f64,
    /// Narrowest range worth mean-reverting inside
    #[serde(default = "default_range_tight")]
    pub range_tight: f64,
}

fn default_vol_high() -> f64 { 0.05 }
fn default_trend_strong() -> f64 { 0.01 }
fn default_range_tight() -> f64 { 0.005 }

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            vol_high: default_vol_high(),
            trend_strong: default_trend_strong(),
            range_tight: default_range_tight(),
        }
    }
}

impl RegimeThresholds {
    pub fn new(vol_high: f64, trend_strong: f64, range_tight: f64) -> Self {
        Self {
            vol_high,
            trend_strong,
            range_tight,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let fields = [
            ("vol_high", self.vol_high),
            ("trend_strong", self.trend_strong),
            ("range_tight", self.range_tight),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "threshold {} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Map a snapshot to exactly one regime
pub fn classify(snapshot: &Snapshot, thresholds: &RegimeThresholds) -> Regime {
    if snapshot.volatility >= thresholds.vol_high {
        Regime::HighVolatility
    } else if snapshot.trend_slope.abs() >= thresholds.trend_strong {
        if snapshot.trend_slope > 0.0 {
            Regime::TrendingUp
        } else {
            Regime::TrendingDown
        }
    } else {
        Regime::Ranging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn snapshot(volatility: f64, trend_slope: f64) -> Snapshot {
        Snapshot {
            index: 10,
            datetime: Utc::now(),
            close: 100.0,
            volatility,
            trend_slope,
            range_width: 0.02,
            midpoint: 100.0,
            mean_close: 100.0,
        }
    }

    fn thresholds() -> RegimeThresholds {
        RegimeThresholds::new(0.05, 0.01, 0.005)
    }

    #[test]
    fn test_precedence_volatility_first() {
        // strong trend but volatility at threshold: volatility wins
        assert_eq!(classify(&snapshot(0.05, 0.5), &thresholds()), Regime::HighVolatility);
        assert_eq!(classify(&snapshot(0.08, -0.5), &thresholds()), Regime::HighVolatility);
    }

    #[test]
    fn test_trend_threshold_is_inclusive() {
        assert_eq!(classify(&snapshot(0.01, 0.01), &thresholds()), Regime::TrendingUp);
        assert_eq!(classify(&snapshot(0.01, -0.01), &thresholds()), Regime::TrendingDown);
        assert_eq!(classify(&snapshot(0.01, 0.0099), &thresholds()), Regime::Ranging);
    }

    #[test]
    fn test_ranging_fallback() {
        assert_eq!(classify(&snapshot(0.0, 0.0), &thresholds()), Regime::Ranging);
        assert_eq!(classify(&snapshot(0.0499, 0.0), &thresholds()), Regime::Ranging);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(thresholds().validate().is_ok());
        assert!(RegimeThresholds::new(0.0, 0.01, 0.005).validate().is_err());
        assert!(RegimeThresholds::new(0.05, f64::NAN, 0.005).validate().is_err());
    }

    #[test]
    fn test_regime_serializes_screaming_case() {
        let json = serde_json::to_string(&Regime::HighVolatility).unwrap();
        assert_eq!(json, "\"HIGH_VOLATILITY\"");
        assert_eq!(Regime::TrendingDown.to_string(), "TRENDING_DOWN");
    }

    proptest! {
        #[test]
        fn prop_classification_is_total_and_ordered(
            vol in 0.0f64..0.2,
            slope in -0.1f64..0.1,
        ) {
            let t = thresholds();
            let regime = classify(&snapshot(vol, slope), &t);
            prop_assert_eq!(regime, classify(&snapshot(vol, slope), &t));
            if vol >= t.vol_high {
                prop_assert_eq!(regime, Regime::HighVolatility);
            } else if slope.abs() >= t.trend_strong {
                prop_assert!(matches!(regime, Regime::TrendingUp | Regime::TrendingDown));
            } else {
                prop_assert_eq!(regime, Regime::Ranging);
            }
        }
    }
}
