//! Decide command: one dry-run decision per symbol on its latest bars

use anyhow::{Context, Result};
use regime_engine::engine::{DecisionEngine, DryRunAdapter};
use regime_engine::risk::AccountState;
use regime_engine::{data, Config};
use tracing::{info, warn};

pub fn run(config_path: String, equity_override: Option<f64>) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let equity = equity_override.unwrap_or(config.trading.initial_capital);
    let account = AccountState::new(equity);

    let data = data::load_multi_symbol(
        &config.backtest.data_dir,
        &config.trading.symbols(),
        &config.engine.timeframe,
    )?;

    let mut symbols: Vec<_> = data.keys().cloned().collect();
    symbols.sort();

    for symbol in symbols {
        let Some(bars) = data.get(&symbol) else {
            continue;
        };

        let mut engine = DecisionEngine::standard(
            symbol.clone(),
            config.engine.timeframe.as_str(),
            config.engine.window,
            config.engine.thresholds,
            &config.strategies,
            config.risk.clone(),
            DryRunAdapter,
        )
        .context("Invalid engine configuration")?;

        match engine.on_bars(bars, &account) {
            Ok(decision) => {
                let json = serde_json::to_string_pretty(&decision.record)
                    .context("Failed to serialize decision record")?;
                println!("{}", json);
            }
            Err(e) => warn!("{}: no decision ({})", symbol, e),
        }
    }

    Ok(())
}
