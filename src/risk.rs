//! Risk management
//!
//! Turns a raw strategy signal into a bounded order intent, or a rejection with a
//! reason code. Assessment is a pure function of `(signal, account, policy)`: it
//! keeps no state and never talks to execution.
//!
//! Sizing:
//! ```text
//! notional = equity * size_fraction * max_position_fraction
//! open_exposure + notional * leverage <= equity * max_leverage
//! ```
//! `notional` is the margin committed; exposure is notional times leverage.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::{Direction, Side, Signal};

/// Leverage at or above this is never allowed, whatever the configuration says
pub const LEVERAGE_CEILING: f64 = 20.0;

/// Risk policy with builder-style setters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// Upper bound on leverage; must be below [`LEVERAGE_CEILING`]
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    /// Leverage requested for new intents, clipped to `max_leverage`
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    /// Smallest notional worth submitting
    #[serde(default = "default_min_trade_notional")]
    pub min_trade_notional: f64,
    /// Share of equity a full-size signal may commit
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,
    /// Signals below this confidence are rejected; equality passes
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Realized loss, as a share of equity at the start of the period, that
    /// blocks new intents until the period rolls over (e.g., 0.05 = 5%)
    #[serde(default)]
    pub max_drawdown: Option<f64>,
}

fn default_max_leverage() -> f64 { 5.0 }
fn default_leverage() -> f64 { 3.0 }
fn default_min_trade_notional() -> f64 { 10.0 }
fn default_max_position_fraction() -> f64 { 0.20 }
fn default_min_confidence() -> f64 { 0.20 }

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            leverage: default_leverage(),
            min_trade_notional: default_min_trade_notional(),
            max_position_fraction: default_max_position_fraction(),
            min_confidence: default_min_confidence(),
            max_drawdown: None,
        }
    }
}

impl RiskPolicy {
    /// Set the leverage cap
    pub fn with_max_leverage(mut self, max_leverage: f64) -> Self {
        self.max_leverage = max_leverage;
        self
    }

    /// Set the leverage applied to new intents
    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    /// Set the minimum trade notional
    pub fn with_min_trade_notional(mut self, notional: f64) -> Self {
        self.min_trade_notional = notional;
        self
    }

    /// Set the maximum share of equity per position (e.g., 0.2 = 20%)
    pub fn with_max_position_fraction(mut self, fraction: f64) -> Self {
        self.max_position_fraction = fraction;
        self
    }

    /// Set the confidence floor
    pub fn with_min_confidence(mut self, confidence: f64) -> Self {
        self.min_confidence = confidence;
        self
    }

    /// Enable the per-period drawdown guard
    pub fn with_max_drawdown(mut self, fraction: f64) -> Self {
        self.max_drawdown = Some(fraction);
        self
    }

    /// Reject policies that must never reach a run
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !self.max_leverage.is_finite() || self.max_leverage <= 0.0 {
            return invalid(format!("max_leverage must be positive, got {}", self.max_leverage));
        }
        if self.max_leverage >= LEVERAGE_CEILING {
            return invalid(format!(
                "max_leverage must be below {}x, got {}",
                LEVERAGE_CEILING, self.max_leverage
            ));
        }
        if !self.leverage.is_finite() || self.leverage <= 0.0 || self.leverage > self.max_leverage {
            return invalid(format!(
                "leverage must be in (0, {}], got {}",
                self.max_leverage, self.leverage
            ));
        }
        if !self.min_trade_notional.is_finite() || self.min_trade_notional < 0.0 {
            return invalid(format!(
                "min_trade_notional must be >= 0, got {}",
                self.min_trade_notional
            ));
        }
        if !(self.max_position_fraction > 0.0 && self.max_position_fraction <= 1.0) {
            return invalid(format!(
                "max_position_fraction must be in (0, 1], got {}",
                self.max_position_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return invalid(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            ));
        }
        if let Some(limit) = self.max_drawdown {
            if !(limit > 0.0 && limit <= 1.0) {
                return invalid(format!("max_drawdown must be in (0, 1], got {}", limit));
            }
        }
        Ok(())
    }

    /// Validate and build the risk manager
    pub fn build(self) -> EngineResult<RiskManager> {
        RiskManager::new(self)
    }
}

/// Account figures the risk check needs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: f64,
    /// Exposure (notional × leverage) already open
    pub open_exposure: f64,
    /// Realized PnL since the start of the current period (a trading day in
    /// the backtester); negative when losing
    #[serde(default)]
    pub period_pnl: f64,
}

impl AccountState {
    pub fn new(equity: f64) -> Self {
        Self {
            equity,
            open_exposure: 0.0,
            period_pnl: 0.0,
        }
    }

    pub fn with_open_exposure(mut self, exposure: f64) -> Self {
        self.open_exposure = exposure;
        self
    }

    pub fn with_period_pnl(mut self, pnl: f64) -> Self {
        self.period_pnl = pnl;
        self
    }

    /// Realized loss as a share of the equity the period started with
    fn period_drawdown(&self) -> f64 {
        if self.period_pnl >= 0.0 {
            return 0.0;
        }
        let start_equity = self.equity - self.period_pnl;
        if start_equity > 0.0 {
            -self.period_pnl / start_equity
        } else {
            f64::INFINITY
        }
    }
}

/// Risk-bounded, execution-ready trade instruction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub side: Side,
    pub leverage: f64,
    /// Margin committed
    pub notional: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Confidence of the originating signal
    pub confidence: f64,
}

impl OrderIntent {
    pub fn exposure(&self) -> f64 {
        self.notional * self.leverage
    }
}

/// Reason code attached to a rejected signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// The strategy recommended no position
    FlatSignal,
    LowConfidence,
    /// Realized loss for the period reached `max_drawdown`
    DrawdownLimit,
    BelowMinimum,
    LeverageCap,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::FlatSignal => "FLAT_SIGNAL",
            RejectReason::LowConfidence => "LOW_CONFIDENCE",
            RejectReason::DrawdownLimit => "DRAWDOWN_LIMIT",
            RejectReason::BelowMinimum => "BELOW_MINIMUM",
            RejectReason::LeverageCap => "LEVERAGE_CAP",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a risk check. Rejection is an expected result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Assessment {
    Order(OrderIntent),
    Rejected(RejectReason),
}

impl Assessment {
    pub fn intent(&self) -> Option<&OrderIntent> {
        match self {
            Assessment::Order(intent) => Some(intent),
            Assessment::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self {
            Assessment::Order(_) => None,
            Assessment::Rejected(reason) => Some(*reason),
        }
    }
}

/// Assess a signal against a policy. Does not validate the policy (use
/// [`RiskManager`] for that), but never emits leverage at or above
/// [`LEVERAGE_CEILING`] whatever the policy holds.
pub fn assess(signal: &Signal, account: &AccountState, policy: &RiskPolicy) -> Assessment {
    let side = match signal.direction {
        Direction::Long => Side::Long,
        Direction::Short => Side::Short,
        Direction::Flat => return Assessment::Rejected(RejectReason::FlatSignal),
    };

    // NaN confidence falls through to rejection as well
    if !(signal.confidence >= policy.min_confidence) {
        return Assessment::Rejected(RejectReason::LowConfidence);
    }

    if let Some(limit) = policy.max_drawdown {
        let drawdown = account.period_drawdown();
        if drawdown >= limit {
            tracing::debug!(
                "Drawdown limit: period loss {:.2}% >= {:.2}%",
                drawdown * 100.0,
                limit * 100.0
            );
            return Assessment::Rejected(RejectReason::DrawdownLimit);
        }
    }

    let leverage = policy.leverage.min(policy.max_leverage);
    if !(leverage > 0.0 && leverage < LEVERAGE_CEILING && policy.max_leverage < LEVERAGE_CEILING) {
        tracing::debug!(
            "Leverage cap: policy leverage {} / max {} outside (0, {})",
            policy.leverage,
            policy.max_leverage,
            LEVERAGE_CEILING
        );
        return Assessment::Rejected(RejectReason::LeverageCap);
    }
    let size_fraction = signal.size_fraction.clamp(0.0, 1.0);
    let mut notional = account.equity * size_fraction * policy.max_position_fraction;

    let exposure_room = account.equity * policy.max_leverage - account.open_exposure;
    let max_notional = exposure_room / leverage;
    if !(max_notional > 0.0) {
        tracing::debug!(
            "Leverage cap: equity={:.2}, open_exposure={:.2}, no room left",
            account.equity,
            account.open_exposure
        );
        return Assessment::Rejected(RejectReason::LeverageCap);
    }
    if notional > max_notional {
        tracing::debug!(
            "Leverage cap limiting notional: requested={:.2}, allowed={:.2}",
            notional,
            max_notional
        );
        notional = max_notional;
    }

    if !(notional >= policy.min_trade_notional) {
        return Assessment::Rejected(RejectReason::BelowMinimum);
    }

    let (stop_loss, take_profit) = match signal.exits {
        Some(exits) => (Some(exits.stop_loss), Some(exits.take_profit)),
        None => (None, None),
    };

    Assessment::Order(OrderIntent {
        side,
        leverage,
        notional,
        stop_loss,
        take_profit,
        confidence: signal.confidence,
    })
}

/// Risk manager holding a validated policy
#[derive(Debug, Clone, PartialEq)]
pub struct RiskManager {
    policy: RiskPolicy,
}

impl RiskManager {
    /// Fails with `InvalidConfig` if the policy is unusable
    pub fn new(policy: RiskPolicy) -> EngineResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    pub fn assess(&self, signal: &Signal, account: &AccountState) -> Assessment {
        assess(signal, account, &self.policy)
    }
}
