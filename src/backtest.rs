//! Backtesting engine
//!
//! Replays the decision pipeline bar by bar with fee and slippage modeling.
//! A run is an explicit state machine: [`RunPhase::Initial`] until the first
//! step, [`RunPhase::Running`] while bars remain, [`RunPhase::Complete`] after
//! the last bar has been processed and any open position force-closed.
//!
//! Decisions made on bar `t` fill at bar `t + 1`'s open, so a signal never trades
//! on the close it was computed from.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::indicators;
use crate::regime::{classify, Regime, RegimeThresholds};
use crate::risk::{AccountState, Assessment, OrderIntent, RejectReason, RiskManager, RiskPolicy};
use crate::snapshot::SnapshotBuilder;
use crate::strategies::{RegimeStates, StrategiesConfig, StrategyRegistry};
use crate::{
    validate_series, Bar, ClosedTrade, ExitReason, PerformanceMetrics, Position, Side, Symbol,
};

/// Everything a backtest needs besides the bars and the strategies
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub window: usize,
    pub thresholds: RegimeThresholds,
    pub policy: RiskPolicy,
    pub initial_equity: f64,
    /// Charged on exposure at entry and at exit
    pub fee_rate: f64,
    /// Adverse price slippage as a fraction
    pub slippage: f64,
    /// Close positions held this many bars; `None` disables the time stop
    pub max_holding_bars: Option<usize>,
    /// Close positions once the regime turns against them
    pub regime_flip_exit: bool,
    /// Sharpe annualization factor (365 for daily crypto bars)
    pub periods_per_year: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            window: 20,
            thresholds: RegimeThresholds::default(),
            policy: RiskPolicy::default(),
            initial_equity: 10_000.0,
            fee_rate: 0.001,
            slippage: 0.0005,
            max_holding_bars: None,
            regime_flip_exit: false,
            periods_per_year: 365.0,
        }
    }
}

impl BacktestConfig {
    fn validate_settings(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if !self.initial_equity.is_finite() || self.initial_equity <= 0.0 {
            return invalid(format!("initial_equity must be positive, got {}", self.initial_equity));
        }
        if !(0.0..1.0).contains(&self.fee_rate) {
            return invalid(format!("fee_rate must be in [0, 1), got {}", self.fee_rate));
        }
        if !(0.0..1.0).contains(&self.slippage) {
            return invalid(format!("slippage must be in [0, 1), got {}", self.slippage));
        }
        if self.max_holding_bars == Some(0) {
            return invalid("max_holding_bars must be at least 1".to_string());
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            return invalid(format!(
                "periods_per_year must be positive, got {}",
                self.periods_per_year
            ));
        }
        Ok(())
    }
}

/// A bar on which no decision was made because an indicator was not finite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedBar {
    pub index: usize,
    pub datetime: DateTime<Utc>,
    pub indicator: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub trades: Vec<ClosedTrade>,
    pub metrics: PerformanceMetrics,
    pub skipped_bars: Vec<SkippedBar>,
    /// Rejection counts by reason
    pub rejections: BTreeMap<RejectReason, usize>,
}

/// Backtest engine. Validated at construction; immutable while runs execute.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: BacktestConfig,
    builder: SnapshotBuilder,
    registry: StrategyRegistry,
    risk_manager: RiskManager,
}

impl Backtester {
    /// Backtester over the standard registry, built from the same thresholds
    /// the run classifies with
    pub fn standard(config: BacktestConfig, strategies: &StrategiesConfig) -> EngineResult<Self> {
        let registry = StrategyRegistry::standard(&config.thresholds, strategies)?;
        Self::new(config, registry)
    }

    /// Fails with `InvalidConfig` before any bar is seen.
    ///
    /// Strategies in `registry` that take a threshold (trend-following's
    /// `trend_strong`, mean-reversion's range floor) must have been built from
    /// `config.thresholds`; [`Backtester::standard`] guarantees it.
    pub fn new(config: BacktestConfig, registry: StrategyRegistry) -> EngineResult<Self> {
        let builder = SnapshotBuilder::new(config.window)?;
        config.thresholds.validate()?;
        let risk_manager = RiskManager::new(config.policy.clone())?;
        config.validate_settings()?;

        Ok(Self {
            config,
            builder,
            registry,
            risk_manager,
        })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Prepare a run over `bars` without processing any of them
    pub fn start<'a>(&'a self, bars: &'a [Bar]) -> EngineResult<BacktestRun<'a>> {
        let window = self.builder.window();
        if bars.len() < window {
            return Err(EngineError::InsufficientHistory {
                index: bars.len().saturating_sub(1),
                window,
                available: bars.len(),
            });
        }
        validate_series(bars)?;

        Ok(BacktestRun {
            engine: self,
            bars,
            phase: RunPhase::Initial,
            cursor: self.builder.first_index(),
            states: self.registry.initial_states(),
            position: None,
            pending: None,
            realized_equity: self.config.initial_equity,
            period_day: None,
            period_pnl: 0.0,
            equity_curve: Vec::with_capacity(bars.len()),
            trades: Vec::new(),
            skipped_bars: Vec::new(),
            rejections: BTreeMap::new(),
        })
    }

    /// Run a full backtest on a single instrument
    pub fn run(&self, bars: &[Bar]) -> EngineResult<BacktestResult> {
        let mut run = self.start(bars)?;
        while run.phase() != RunPhase::Complete {
            run.step()?;
        }
        let result = run.finish();

        tracing::info!(
            "Backtest complete: {} bars, {} trades, {} skipped, return {:.2}%",
            bars.len(),
            result.trades.len(),
            result.skipped_bars.len(),
            result.metrics.total_return
        );
        Ok(result)
    }

    /// Backtest independent instruments in parallel, each with its own strategy state
    pub fn run_many(
        &self,
        data: &HashMap<Symbol, Vec<Bar>>,
    ) -> BTreeMap<Symbol, EngineResult<BacktestResult>> {
        tracing::info!("Backtesting {} instruments", data.len());

        data.par_iter()
            .map(|(symbol, bars)| {
                let result = self.run(bars);
                if let Err(e) = &result {
                    tracing::warn!("{}: backtest failed: {}", symbol, e);
                }
                (symbol.clone(), result)
            })
            .collect()
    }

    fn calculate_metrics(
        &self,
        trades: &[ClosedTrade],
        equity_curve: &[(DateTime<Utc>, f64)],
    ) -> PerformanceMetrics {
        let Some(&(_, final_equity)) = equity_curve.last() else {
            return PerformanceMetrics::default();
        };

        let initial_equity = self.config.initial_equity;
        let total_return = (final_equity - initial_equity) / initial_equity * 100.0;

        let winning: Vec<&ClosedTrade> = trades.iter().filter(|t| t.is_win()).collect();
        let losing: Vec<&ClosedTrade> = trades.iter().filter(|t| !t.is_win()).collect();

        let win_rate = if trades.is_empty() {
            0.0
        } else {
            winning.len() as f64 / trades.len() as f64 * 100.0
        };

        let gross_profits: f64 = winning.iter().map(|t| t.net_pnl).sum();
        let gross_losses: f64 = losing.iter().map(|t| t.net_pnl.abs()).sum();
        let profit_factor = (gross_losses > 0.0).then(|| gross_profits / gross_losses);

        let avg_win = if winning.is_empty() {
            0.0
        } else {
            gross_profits / winning.len() as f64
        };
        let avg_loss = if losing.is_empty() {
            0.0
        } else {
            gross_losses / losing.len() as f64
        };
        let largest_win = winning.iter().map(|t| t.net_pnl).fold(0.0, f64::max);
        let largest_loss = losing.iter().map(|t| t.net_pnl).fold(0.0, f64::min);

        let expectancy = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.net_pnl).sum::<f64>() / trades.len() as f64
        };
        let total_fees = trades.iter().map(|t| t.fees).sum();

        let mut peak = initial_equity;
        let mut max_dd: f64 = 0.0;
        for &(_, equity) in equity_curve {
            if equity > peak {
                peak = equity;
            }
            if peak > 0.0 {
                max_dd = max_dd.max((peak - equity) / peak);
            }
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .filter(|w| w[0].1 != 0.0)
            .map(|w| (w[1].1 - w[0].1) / w[0].1)
            .collect();
        let sharpe_ratio = if returns.len() >= 2 {
            let std_dev = indicators::sample_std_dev(&returns);
            if std_dev > 0.0 {
                indicators::mean(&returns) / std_dev * self.config.periods_per_year.sqrt()
            } else {
                0.0
            }
        } else {
            0.0
        };

        PerformanceMetrics {
            total_return,
            max_drawdown: max_dd * 100.0,
            win_rate,
            sharpe_ratio,
            profit_factor,
            expectancy,
            total_trades: trades.len(),
            winning_trades: winning.len(),
            losing_trades: losing.len(),
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            total_fees,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Initial,
    Running,
    Complete,
}

/// What a single step did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A decision was made on this bar. `assessment` is `None` while a position is open.
    Decided {
        index: usize,
        regime: Regime,
        assessment: Option<Assessment>,
    },
    /// An indicator was not finite; nothing changed except the equity curve
    Skipped { index: usize },
    /// The run had already completed
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingEntry {
    intent: OrderIntent,
    regime: Regime,
}

/// An in-progress backtest over one bar series
#[derive(Debug)]
pub struct BacktestRun<'a> {
    engine: &'a Backtester,
    bars: &'a [Bar],
    phase: RunPhase,
    cursor: usize,
    states: RegimeStates,
    position: Option<Position>,
    pending: Option<PendingEntry>,
    /// Initial equity plus realized net PnL, less fees on the open leg
    realized_equity: f64,
    /// UTC day the drawdown guard is currently counting
    period_day: Option<NaiveDate>,
    /// Net PnL of trades closed during `period_day`
    period_pnl: f64,
    equity_curve: Vec<(DateTime<Utc>, f64)>,
    trades: Vec<ClosedTrade>,
    skipped_bars: Vec<SkippedBar>,
    rejections: BTreeMap<RejectReason, usize>,
}

impl<'a> BacktestRun<'a> {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn states(&self) -> &RegimeStates {
        &self.states
    }

    /// Index of the next bar to process
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Process one bar
    pub fn step(&mut self) -> EngineResult<StepOutcome> {
        if self.phase == RunPhase::Complete {
            return Ok(StepOutcome::Finished);
        }
        self.phase = RunPhase::Running;

        let index = self.cursor;
        let bars = self.bars;
        let last = bars.len() - 1;
        let bar = &bars[index];

        let day = bar.datetime.date_naive();
        if self.period_day != Some(day) {
            self.period_day = Some(day);
            self.period_pnl = 0.0;
        }

        let outcome = match self.engine.builder.build_at(bars, index) {
            Ok(snapshot) => {
                self.fill_pending(index);

                let regime = classify(&snapshot, &self.engine.config.thresholds);
                let signal = self
                    .engine
                    .registry
                    .generate(regime, &snapshot, &mut self.states);

                tracing::debug!(
                    "Bar {} ({}): regime={}, signal={:?} conf={:.3}",
                    index,
                    bar.datetime,
                    regime,
                    signal.direction,
                    signal.confidence
                );

                self.check_exits(index, regime, signal.direction.side());

                let assessment = if self.position.is_none() {
                    let account =
                        AccountState::new(self.realized_equity).with_period_pnl(self.period_pnl);
                    let assessment = self.engine.risk_manager.assess(&signal, &account);
                    match assessment {
                        Assessment::Order(intent) if index < last => {
                            self.pending = Some(PendingEntry { intent, regime });
                        }
                        Assessment::Order(intent) => {
                            tracing::warn!(
                                "Dropping {:?} intent on final bar {} (notional {:.2})",
                                intent.side,
                                index,
                                intent.notional
                            );
                        }
                        Assessment::Rejected(reason) => {
                            *self.rejections.entry(reason).or_insert(0) += 1;
                        }
                    }
                    Some(assessment)
                } else {
                    None
                };

                if index == last {
                    if let Some(pos) = self.position.take() {
                        let exit_price = self.slipped_exit(pos.side, bar.close);
                        self.close_position(pos, exit_price, index, ExitReason::EndOfData);
                    }
                }

                let unrealized = match self.position.as_mut() {
                    Some(pos) => {
                        pos.mark(bar.close);
                        pos.unrealized_pnl
                    }
                    None => 0.0,
                };
                self.equity_curve
                    .push((bar.datetime, self.realized_equity + unrealized));

                StepOutcome::Decided {
                    index,
                    regime,
                    assessment,
                }
            }
            Err(EngineError::BadIndicator { indicator, .. }) => {
                tracing::warn!(
                    "Skipping bar {} ({}): indicator `{}` is not finite",
                    index,
                    bar.datetime,
                    indicator
                );
                if let Some(pending) = self.pending.take() {
                    tracing::warn!(
                        "Cancelled pending {:?} entry scheduled for bar {}",
                        pending.intent.side,
                        index
                    );
                }
                self.skipped_bars.push(SkippedBar {
                    index,
                    datetime: bar.datetime,
                    indicator: indicator.to_string(),
                });

                if index == last {
                    if let Some(pos) = self.position.take() {
                        // final close is unusable; exit at the last mark
                        let mark = if pos.exposure() > 0.0 {
                            pos.entry_price
                                * (1.0 + pos.side.sign() * pos.unrealized_pnl / pos.exposure())
                        } else {
                            pos.entry_price
                        };
                        self.close_position(pos, mark, index, ExitReason::EndOfData);
                    }
                }

                let carried = match self.equity_curve.last() {
                    Some(&(_, equity)) if self.position.is_some() => equity,
                    _ => self.realized_equity,
                };
                self.equity_curve.push((bar.datetime, carried));

                StepOutcome::Skipped { index }
            }
            Err(e) => return Err(e),
        };

        if index == last {
            self.phase = RunPhase::Complete;
        } else {
            self.cursor += 1;
        }
        Ok(outcome)
    }

    /// Finish the run and compute metrics, stepping through any remaining bars
    pub fn finish(mut self) -> BacktestResult {
        while self.phase != RunPhase::Complete {
            if let Err(e) = self.step() {
                tracing::error!("Backtest aborted at bar {}: {}", self.cursor, e);
                break;
            }
        }

        let metrics = self
            .engine
            .calculate_metrics(&self.trades, &self.equity_curve);
        BacktestResult {
            equity_curve: self.equity_curve,
            trades: self.trades,
            metrics,
            skipped_bars: self.skipped_bars,
            rejections: self.rejections,
        }
    }

    fn fill_pending(&mut self, index: usize) {
        let Some(PendingEntry { intent, regime }) = self.pending.take() else {
            return;
        };
        let bars = self.bars;
        let bar = &bars[index];
        let slippage = self.engine.config.slippage;
        let entry_price = bar.open * (1.0 + intent.side.sign() * slippage);
        let entry_fee = intent.exposure() * self.engine.config.fee_rate;
        self.realized_equity -= entry_fee;

        tracing::debug!(
            "Filled {:?} at {:.4} (bar {}), notional {:.2} @ {}x",
            intent.side,
            entry_price,
            index,
            intent.notional,
            intent.leverage
        );

        self.position = Some(Position {
            side: intent.side,
            entry_price,
            entry_time: bar.datetime,
            entry_index: index,
            notional: intent.notional,
            leverage: intent.leverage,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            regime_at_entry: regime,
            unrealized_pnl: 0.0,
        });
    }

    /// Stop-loss, take-profit, regime flip, opposite signal, then time stop
    fn check_exits(&mut self, index: usize, regime: Regime, signal_side: Option<Side>) {
        let Some(pos) = self.position.take() else {
            return;
        };
        let bars = self.bars;
        let bar = &bars[index];

        if let Some((price, reason)) = level_exit(&pos, bar) {
            let price = match reason {
                ExitReason::StopLoss => self.slipped_exit(pos.side, price),
                _ => price,
            };
            self.close_position(pos, price, index, reason);
            return;
        }

        if self.engine.config.regime_flip_exit && regime_flip(&pos, regime) {
            let price = self.slipped_exit(pos.side, bar.close);
            self.close_position(pos, price, index, ExitReason::RegimeFlip);
            return;
        }

        if signal_side == Some(pos.side.opposite()) {
            let price = self.slipped_exit(pos.side, bar.close);
            self.close_position(pos, price, index, ExitReason::OppositeSignal);
            return;
        }

        if let Some(max_bars) = self.engine.config.max_holding_bars {
            if pos.bars_held(index) >= max_bars {
                let price = self.slipped_exit(pos.side, bar.close);
                self.close_position(pos, price, index, ExitReason::TimeStop);
                return;
            }
        }

        self.position = Some(pos);
    }

    fn slipped_exit(&self, side: Side, price: f64) -> f64 {
        price * (1.0 - side.sign() * self.engine.config.slippage)
    }

    fn close_position(&mut self, pos: Position, exit_price: f64, index: usize, reason: ExitReason) {
        let fee_rate = self.engine.config.fee_rate;
        let pnl = pos.pnl_at(exit_price);
        let entry_fee = pos.exposure() * fee_rate;
        let exit_fee = pos.exposure() * fee_rate;
        let fees = entry_fee + exit_fee;
        let net_pnl = pnl - fees;

        // entry fee was taken at fill
        self.realized_equity += pnl - exit_fee;
        self.period_pnl += net_pnl;

        tracing::debug!(
            "Closed {:?} at {:.4} (bar {}): {:?}, net pnl {:.2}",
            pos.side,
            exit_price,
            index,
            reason,
            net_pnl
        );

        self.trades.push(ClosedTrade {
            side: pos.side,
            entry_time: pos.entry_time,
            exit_time: self.bars[index].datetime,
            entry_price: pos.entry_price,
            exit_price,
            notional: pos.notional,
            leverage: pos.leverage,
            pnl,
            fees,
            net_pnl,
            regime_at_entry: pos.regime_at_entry,
            exit_reason: reason,
        });
    }
}

/// Protective level touched within `bar`, with the price it executes at.
/// Gaps through a level fill at the open; the stop wins when both levels touch.
fn level_exit(pos: &Position, bar: &Bar) -> Option<(f64, ExitReason)> {
    match pos.side {
        Side::Long => {
            if let Some(stop) = pos.stop_loss {
                if bar.low <= stop {
                    return Some((bar.open.min(stop), ExitReason::StopLoss));
                }
            }
            if let Some(take) = pos.take_profit {
                if bar.high >= take {
                    return Some((bar.open.max(take), ExitReason::TakeProfit));
                }
            }
        }
        Side::Short => {
            if let Some(stop) = pos.stop_loss {
                if bar.high >= stop {
                    return Some((bar.open.max(stop), ExitReason::StopLoss));
                }
            }
            if let Some(take) = pos.take_profit {
                if bar.low <= take {
                    return Some((bar.open.min(take), ExitReason::TakeProfit));
                }
            }
        }
    }
    None
}

/// Whether `regime` has turned against an open position: a trend against its
/// side, or a range when it was entered on a trend
fn regime_flip(pos: &Position, regime: Regime) -> bool {
    match (pos.side, regime) {
        (Side::Long, Regime::TrendingDown) | (Side::Short, Regime::TrendingUp) => true,
        (_, Regime::Ranging) => matches!(
            pos.regime_at_entry,
            Regime::TrendingUp | Regime::TrendingDown
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::defensive::{DefensiveConfig, DefensiveStrategy};
    use crate::strategies::{
        MeanReversionConfig, StrategiesConfig, StrategyKind, TrendFollowingConfig,
    };
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn bar_at(i: usize, close: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i as i64);
        Bar::new_unchecked(t, close, close * 1.001, close * 0.999, close, 1_000.0)
    }

    fn hourly(i: usize, close: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64);
        Bar::new_unchecked(t, close, close * 1.001, close * 0.999, close, 1_000.0)
    }

    fn rising(n: usize, growth: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| bar_at(i, 100.0 * (1.0 + growth).powi(i as i32)))
            .collect()
    }

    fn config() -> BacktestConfig {
        BacktestConfig {
            window: 10,
            thresholds: RegimeThresholds::new(0.05, 0.01, 0.005),
            ..Default::default()
        }
    }

    fn backtester(config: BacktestConfig) -> Backtester {
        let registry = StrategyRegistry::standard(&config.thresholds, &StrategiesConfig::default())
            .unwrap();
        Backtester::new(config, registry).unwrap()
    }

    fn position(side: Side, stop: f64, take: f64) -> Position {
        Position {
            side,
            entry_price: 100.0,
            entry_time: bar_at(0, 100.0).datetime,
            entry_index: 0,
            notional: 1_000.0,
            leverage: 2.0,
            stop_loss: Some(stop),
            take_profit: Some(take),
            regime_at_entry: Regime::TrendingUp,
            unrealized_pnl: 0.0,
        }
    }

    #[test]
    fn test_invalid_configuration_rejected_up_front() {
        let registry = StrategyRegistry::standard(
            &RegimeThresholds::default(),
            &StrategiesConfig::default(),
        )
        .unwrap();

        let bad_window = BacktestConfig { window: 1, ..config() };
        assert!(Backtester::new(bad_window, registry.clone()).is_err());

        let bad_policy = BacktestConfig {
            policy: RiskPolicy::default().with_max_leverage(25.0),
            ..config()
        };
        assert!(matches!(
            Backtester::new(bad_policy, registry.clone()),
            Err(EngineError::InvalidConfig(_))
        ));

        let bad_equity = BacktestConfig { initial_equity: 0.0, ..config() };
        assert!(Backtester::new(bad_equity, registry).is_err());
    }

    #[test]
    fn test_short_series_rejected() {
        let bt = backtester(config());
        let err = bt.run(&rising(9, 0.01)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientHistory { available: 9, .. }));

        // exactly W bars is one step
        let result = bt.run(&rising(10, 0.01)).unwrap();
        assert_eq!(result.equity_curve.len(), 1);
    }

    #[test]
    fn test_state_machine_phases() {
        let bt = backtester(config());
        let bars = rising(12, 0.015);
        let mut run = bt.start(&bars).unwrap();

        assert_eq!(run.phase(), RunPhase::Initial);
        assert_eq!(run.cursor(), 9);
        run.step().unwrap();
        assert_eq!(run.phase(), RunPhase::Running);
        run.step().unwrap();
        run.step().unwrap();
        assert_eq!(run.phase(), RunPhase::Complete);
        assert_eq!(run.step().unwrap(), StepOutcome::Finished);

        let result = run.finish();
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn test_rising_series_trades_long_and_closes_at_end() {
        let bt = backtester(config());
        let result = bt.run(&rising(40, 0.015)).unwrap();

        assert!(!result.trades.is_empty());
        assert!(result.trades.iter().all(|t| t.side == Side::Long));
        assert!(result.trades.iter().all(|t| t.regime_at_entry == Regime::TrendingUp));
        assert!(result.metrics.total_return > 0.0);
        assert_eq!(result.equity_curve.len(), 31);
    }

    #[test]
    fn test_fills_at_next_open_with_fees() {
        let cfg = BacktestConfig {
            slippage: 0.0,
            fee_rate: 0.001,
            ..config()
        };
        let bt = backtester(cfg);
        let bars = rising(12, 0.015);
        let mut run = bt.start(&bars).unwrap();

        run.step().unwrap();
        assert!(run.position().is_none());
        run.step().unwrap();
        let pos = run.position().unwrap();
        assert_eq!(pos.entry_index, 10);
        assert_relative_eq!(pos.entry_price, bars[10].open);

        let result = run.finish();
        let trade = &result.trades[0];
        assert_eq!(trade.exit_reason, ExitReason::EndOfData);
        assert_relative_eq!(trade.fees, 2.0 * trade.notional * trade.leverage * 0.001, epsilon = 1e-9);
        let final_equity = result.equity_curve.last().unwrap().1;
        assert_relative_eq!(final_equity, 10_000.0 + trade.net_pnl, epsilon = 1e-6);
    }

    #[test]
    fn test_flat_registry_records_rejections() {
        let flat = StrategyKind::Defensive(DefensiveStrategy::new(DefensiveConfig {
            probe_enabled: false,
            ..Default::default()
        }));
        let registry = StrategyRegistry::builder()
            .register(Regime::TrendingUp, flat.clone())
            .register(Regime::TrendingDown, flat.clone())
            .register(Regime::Ranging, flat.clone())
            .register(Regime::HighVolatility, flat)
            .build()
            .unwrap();
        let bt = Backtester::new(config(), registry).unwrap();
        let result = bt.run(&rising(15, 0.01)).unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.rejections.get(&RejectReason::FlatSignal), Some(&6));
        assert_eq!(result.metrics.total_return, 0.0);
        assert_eq!(result.metrics.profit_factor, None);
    }

    #[test]
    fn test_stop_wins_when_both_levels_touch() {
        let pos = position(Side::Long, 95.0, 105.0);
        let wide = Bar::new_unchecked(bar_at(1, 100.0).datetime, 100.0, 106.0, 94.0, 100.0, 1.0);
        assert_eq!(level_exit(&pos, &wide), Some((95.0, ExitReason::StopLoss)));

        let up = Bar::new_unchecked(bar_at(1, 100.0).datetime, 100.0, 106.0, 99.0, 104.0, 1.0);
        assert_eq!(level_exit(&pos, &up), Some((105.0, ExitReason::TakeProfit)));
    }

    #[test]
    fn test_gap_through_stop_fills_at_open() {
        let pos = position(Side::Short, 105.0, 95.0);
        let gap = Bar::new_unchecked(bar_at(1, 110.0).datetime, 110.0, 112.0, 108.0, 111.0, 1.0);
        assert_eq!(level_exit(&pos, &gap), Some((110.0, ExitReason::StopLoss)));

        let calm = Bar::new_unchecked(bar_at(1, 100.0).datetime, 100.0, 101.0, 99.0, 100.0, 1.0);
        assert_eq!(level_exit(&pos, &calm), None);
    }

    #[test]
    fn test_time_stop() {
        let cfg = BacktestConfig {
            max_holding_bars: Some(1),
            ..config()
        };
        let bt = backtester(cfg);
        let result = bt.run(&rising(30, 0.015)).unwrap();

        assert!(result
            .trades
            .iter()
            .any(|t| t.exit_reason == ExitReason::TimeStop));
    }

    #[test]
    fn test_standard_constructor_uses_run_thresholds() {
        let cfg = BacktestConfig {
            thresholds: RegimeThresholds::new(0.05, 0.02, 0.008),
            ..config()
        };
        let bt = Backtester::standard(cfg, &StrategiesConfig::default()).unwrap();

        match bt.registry().get(Regime::TrendingDown) {
            StrategyKind::TrendFollowing(s) => assert_eq!(s.trend_strong(), 0.02),
            other => panic!("unexpected strategy {}", other.name()),
        }
        match bt.registry().get(Regime::Ranging) {
            StrategyKind::MeanReversion(s) => assert_eq!(s.min_range_width(), 0.008),
            other => panic!("unexpected strategy {}", other.name()),
        }

        let mut bad = StrategiesConfig::default();
        bad.trend_following.stop_pct = 2.0;
        assert!(matches!(
            Backtester::standard(config(), &bad),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_opposite_signal_closes_at_slipped_close() {
        // alternates 100.8 / 99.2: ranging, close flips sides of the midpoint every bar
        let bars: Vec<Bar> = (0..20)
            .map(|i| bar_at(i, if i % 2 == 0 { 100.8 } else { 99.2 }))
            .collect();
        let strategies = StrategiesConfig {
            mean_reversion: MeanReversionConfig {
                target_midpoint: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let cfg = BacktestConfig {
            thresholds: RegimeThresholds::new(0.05, 0.05, 0.005),
            ..config()
        };
        let bt = Backtester::standard(cfg, &strategies).unwrap();
        let result = bt.run(&bars).unwrap();

        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        assert_eq!(trade.regime_at_entry, Regime::Ranging);
        assert_eq!(trade.exit_reason, ExitReason::OppositeSignal);
        assert_eq!(trade.exit_time, bars[10].datetime);
        assert_relative_eq!(trade.exit_price, bars[10].close * (1.0 - 0.0005), epsilon = 1e-9);

        let flips = result
            .trades
            .iter()
            .filter(|t| t.exit_reason == ExitReason::OppositeSignal)
            .count();
        assert!(flips >= 5);
    }

    #[test]
    fn test_regime_flip_rule() {
        let long = position(Side::Long, 90.0, 110.0);
        assert!(regime_flip(&long, Regime::TrendingDown));
        assert!(regime_flip(&long, Regime::Ranging));
        assert!(!regime_flip(&long, Regime::TrendingUp));
        assert!(!regime_flip(&long, Regime::HighVolatility));

        let faded = Position {
            regime_at_entry: Regime::Ranging,
            ..position(Side::Short, 110.0, 90.0)
        };
        assert!(!regime_flip(&faded, Regime::Ranging));
        assert!(regime_flip(&faded, Regime::TrendingUp));
        assert!(!regime_flip(&faded, Regime::TrendingDown));
    }

    #[test]
    fn test_regime_flip_exit() {
        // trend then a dead-flat plateau
        let mut bars = rising(25, 0.015);
        let top = bars[24].close;
        bars.extend((25..45).map(|i| bar_at(i, top)));

        let strategies = StrategiesConfig {
            trend_following: TrendFollowingConfig {
                use_exits: false,
                ..Default::default()
            },
            ..Default::default()
        };

        let enabled = BacktestConfig {
            regime_flip_exit: true,
            ..config()
        };
        let result = Backtester::standard(enabled, &strategies)
            .unwrap()
            .run(&bars)
            .unwrap();
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        assert_eq!(trade.regime_at_entry, Regime::TrendingUp);
        assert_eq!(trade.exit_reason, ExitReason::RegimeFlip);
        let exit_bar = bars.iter().find(|b| b.datetime == trade.exit_time).unwrap();
        assert_relative_eq!(trade.exit_price, exit_bar.close * (1.0 - 0.0005), epsilon = 1e-9);

        let disabled = Backtester::standard(config(), &strategies)
            .unwrap()
            .run(&bars)
            .unwrap();
        assert!(disabled
            .trades
            .iter()
            .all(|t| t.exit_reason != ExitReason::RegimeFlip));
    }

    #[test]
    fn test_drawdown_guard_blocks_rest_of_day() {
        // every round trip loses: 4% fees on exposure against ~1.4% of price gain
        let cfg = BacktestConfig {
            fee_rate: 0.02,
            max_holding_bars: Some(1),
            policy: RiskPolicy::default().with_max_drawdown(0.001),
            ..config()
        };
        let bt = backtester(cfg.clone());

        let intraday: Vec<Bar> = (0..20)
            .map(|i| hourly(i, 100.0 * 1.015f64.powi(i as i32)))
            .collect();
        let result = bt.run(&intraday).unwrap();
        assert_eq!(result.trades.len(), 1);
        assert!(result.trades[0].net_pnl < 0.0);
        assert!(result.rejections[&RejectReason::DrawdownLimit] >= 1);

        // daily bars: the loss only blocks the day it was realized
        let daily = rising(20, 0.015);
        let result = bt.run(&daily).unwrap();
        assert!(result.trades.len() > 1);
        assert!(result.rejections.contains_key(&RejectReason::DrawdownLimit));

        let unguarded = BacktestConfig {
            policy: RiskPolicy::default(),
            ..cfg
        };
        let result = backtester(unguarded).run(&intraday).unwrap();
        assert!(result.trades.len() > 1);
        assert!(!result.rejections.contains_key(&RejectReason::DrawdownLimit));
    }

    #[test]
    fn test_run_many_is_per_instrument() {
        let bt = backtester(config());
        let mut data = HashMap::new();
        data.insert(Symbol::new("BTCUSDT"), rising(30, 0.015));
        data.insert(Symbol::new("ETHUSDT"), rising(5, 0.015));

        let results = bt.run_many(&data);
        assert_eq!(results.len(), 2);
        assert!(results[&Symbol::new("BTCUSDT")].is_ok());
        assert!(results[&Symbol::new("ETHUSDT")].is_err());
        assert_eq!(
            results[&Symbol::new("BTCUSDT")].as_ref().unwrap(),
            &bt.run(&rising(30, 0.015)).unwrap()
        );
    }
}
