//! Error types for the decision pipeline
//!
//! Risk rejections are deliberately absent here: a rejected signal is a normal
//! outcome and is modelled as [`crate::risk::Assessment::Rejected`].

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::regime::Regime;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Not enough bars end at the requested index to fill the window.
    /// Recoverable: the caller can wait for more data.
    #[error("insufficient history at bar {index}: window of {window} needs {window} bars, {available} available")]
    InsufficientHistory {
        index: usize,
        window: usize,
        available: usize,
    },

    #[error("bar index {index} is out of range for a series of {len} bars")]
    IndexOutOfRange { index: usize, len: usize },

    /// A regime has no strategy mapped. Fatal at configuration time.
    #[error("no strategy registered for regime {0}")]
    UnhandledRegime(Regime),

    /// An indicator came out non-finite for a single bar.
    #[error("indicator `{indicator}` is not finite at bar {index}")]
    BadIndicator {
        index: usize,
        indicator: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bar {index} timestamp {current} is not after previous bar timestamp {previous}")]
    NonMonotonicTimestamps {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

impl EngineError {
    /// Whether the error only concerns a single bar and a run may continue past it.
    pub fn is_bar_local(&self) -> bool {
        matches!(self, EngineError::BadIndicator { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
