//! Decision records
//!
//! Every live decision produces one immutable, hash-sealed record: the market
//! context, the regime and strategy output, and the risk outcome. The hash covers
//! all other fields, so any later edit to a stored record is detectable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::regime::Regime;
use crate::risk::{Assessment, RejectReason};
use crate::{Direction, Signal, Symbol};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// sha256 of `symbol:timeframe:timestamp`
    pub decision_id: String,
    pub timestamp: DateTime<Utc>,

    pub symbol: Symbol,
    pub timeframe: String,
    pub price: f64,

    pub regime: Regime,
    pub strategy: String,
    pub direction: Direction,
    /// Rounded to 4 decimals
    pub confidence: f64,

    /// `None` until a risk outcome is attached
    pub approved: Option<bool>,
    pub notional: Option<f64>,
    pub leverage: Option<f64>,
    pub rejection_reason: Option<RejectReason>,

    pub decision_hash: Option<String>,
}

impl DecisionRecord {
    /// Create a sealed record before risk evaluation
    pub fn new(
        symbol: Symbol,
        timeframe: impl Into<String>,
        timestamp: DateTime<Utc>,
        price: f64,
        regime: Regime,
        strategy: &str,
        signal: &Signal,
    ) -> Self {
        let timeframe = timeframe.into();
        let raw_id = format!(
            "{}:{}:{}",
            symbol,
            timeframe,
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let record = Self {
            decision_id: sha256_hex(raw_id.as_bytes()),
            timestamp,
            symbol,
            timeframe,
            price,
            regime,
            strategy: strategy.to_string(),
            direction: signal.direction,
            confidence: (signal.confidence * 10_000.0).round() / 10_000.0,
            approved: None,
            notional: None,
            leverage: None,
            rejection_reason: None,
            decision_hash: None,
        };
        record.sealed()
    }

    /// A copy carrying the risk outcome, re-sealed
    pub fn with_risk_outcome(&self, assessment: &Assessment) -> Self {
        let mut updated = self.clone();
        match assessment {
            Assessment::Order(intent) => {
                updated.approved = Some(true);
                updated.notional = Some(intent.notional);
                updated.leverage = Some(intent.leverage);
                updated.rejection_reason = None;
            }
            Assessment::Rejected(reason) => {
                updated.approved = Some(false);
                updated.notional = None;
                updated.leverage = None;
                updated.rejection_reason = Some(*reason);
            }
        }
        updated.sealed()
    }

    /// Hash of every field except the hash itself
    pub fn compute_hash(&self) -> String {
        let unsealed = Self {
            decision_hash: None,
            ..self.clone()
        };
        // serde_json::Value objects keep keys sorted, giving a canonical encoding
        let canonical = serde_json::to_value(&unsealed)
            .map(|value| value.to_string())
            .unwrap_or_default();
        sha256_hex(canonical.as_bytes())
    }

    /// Whether the stored hash matches the record's contents
    pub fn verify(&self) -> bool {
        self.decision_hash.as_deref() == Some(self.compute_hash().as_str())
    }

    fn sealed(mut self) -> Self {
        self.decision_hash = Some(self.compute_hash());
        self
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
