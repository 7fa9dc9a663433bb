//! Live decision engine
//!
//! Runs one pass of the pipeline on the most recent bars of a single instrument:
//! snapshot, regime, strategy, risk. Strategy state is carried between calls.
//! Approved intents are handed to an [`ExecutionAdapter`] and never waited on.

use crate::decision::DecisionRecord;
use crate::error::EngineResult;
use crate::regime::{classify, Regime, RegimeThresholds};
use crate::risk::{AccountState, Assessment, OrderIntent, RiskManager, RiskPolicy};
use crate::snapshot::SnapshotBuilder;
use crate::strategies::{RegimeStates, StrategiesConfig, StrategyRegistry};
use crate::{Bar, Signal, Symbol};

/// Execution boundary. Submission is fire-and-forget: fills, retries and
/// exchange errors are the adapter's business.
pub trait ExecutionAdapter {
    fn submit(&mut self, symbol: &Symbol, intent: &OrderIntent);
}

/// Adapter that only logs what it would send
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunAdapter;

impl ExecutionAdapter for DryRunAdapter {
    fn submit(&mut self, symbol: &Symbol, intent: &OrderIntent) {
        tracing::info!(
            "[dry-run] {} {:?} notional={:.2} leverage={}x sl={:?} tp={:?}",
            symbol,
            intent.side,
            intent.notional,
            intent.leverage,
            intent.stop_loss,
            intent.take_profit
        );
    }
}

/// Result of one live step
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub regime: Regime,
    pub signal: Signal,
    pub assessment: Assessment,
    pub record: DecisionRecord,
}

pub struct DecisionEngine<A: ExecutionAdapter> {
    symbol: Symbol,
    timeframe: String,
    builder: SnapshotBuilder,
    thresholds: RegimeThresholds,
    registry: StrategyRegistry,
    risk_manager: RiskManager,
    states: RegimeStates,
    adapter: A,
}

impl<A: ExecutionAdapter> DecisionEngine<A> {
    /// Engine over the standard registry, built from `thresholds`
    pub fn standard(
        symbol: Symbol,
        timeframe: impl Into<String>,
        window: usize,
        thresholds: RegimeThresholds,
        strategies: &StrategiesConfig,
        policy: RiskPolicy,
        adapter: A,
    ) -> EngineResult<Self> {
        let registry = StrategyRegistry::standard(&thresholds, strategies)?;
        Self::new(symbol, timeframe, window, thresholds, registry, policy, adapter)
    }

    /// Validates everything before the first bar arrives. `registry` must have
    /// been built from the same `thresholds`.
    pub fn new(
        symbol: Symbol,
        timeframe: impl Into<String>,
        window: usize,
        thresholds: RegimeThresholds,
        registry: StrategyRegistry,
        policy: RiskPolicy,
        adapter: A,
    ) -> EngineResult<Self> {
        let builder = SnapshotBuilder::new(window)?;
        thresholds.validate()?;
        let risk_manager = RiskManager::new(policy)?;
        let states = registry.initial_states();

        Ok(Self {
            symbol,
            timeframe: timeframe.into(),
            builder,
            thresholds,
            registry,
            risk_manager,
            states,
            adapter,
        })
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn states(&self) -> &RegimeStates {
        &self.states
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Decide on the last bar of `bars`.
    ///
    /// `InsufficientHistory` and `BadIndicator` leave strategy state untouched,
    /// so the caller can simply retry on the next bar.
    pub fn on_bars(&mut self, bars: &[Bar], account: &AccountState) -> EngineResult<Decision> {
        let index = bars.len().saturating_sub(1);
        let snapshot = self.builder.build_at(bars, index)?;

        let regime = classify(&snapshot, &self.thresholds);
        let strategy = self.registry.get(regime).name();
        let signal = self.registry.generate(regime, &snapshot, &mut self.states);
        let assessment = self.risk_manager.assess(&signal, account);

        let record = DecisionRecord::new(
            self.symbol.clone(),
            self.timeframe.as_str(),
            snapshot.datetime,
            snapshot.close,
            regime,
            strategy,
            &signal,
        )
        .with_risk_outcome(&assessment);

        match &assessment {
            Assessment::Order(intent) => {
                tracing::info!(
                    "{} {} -> {:?} conf={:.3} notional={:.2}",
                    self.symbol,
                    regime,
                    intent.side,
                    intent.confidence,
                    intent.notional
                );
                self.adapter.submit(&self.symbol, intent);
            }
            Assessment::Rejected(reason) => {
                tracing::debug!("{} {} -> rejected: {}", self.symbol, regime, reason);
            }
        }

        Ok(Decision {
            regime,
            signal,
            assessment,
            record,
        })
    }
}
