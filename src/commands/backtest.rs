//! Backtest command implementation

use anyhow::{Context, Result};
use itertools::Itertools;
use regime_engine::backtest::BacktestResult;
use regime_engine::{data, Config};
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub fn run(
    config_path: String,
    capital_override: Option<f64>,
    output: Option<PathBuf>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(capital) = capital_override {
        info!("Overriding initial capital to: {:.2}", capital);
        config.trading.initial_capital = capital;
    }

    info!("Loading data from: {}", config.backtest.data_dir);
    let symbols = config.trading.symbols();
    debug!("Symbols: {:?}", symbols);

    let data = data::load_multi_symbol(
        &config.backtest.data_dir,
        &symbols,
        &config.engine.timeframe,
    )?;
    info!("Loaded data for {} symbols", data.len());

    let backtester = config.backtester()?;

    info!("Running backtest...");
    let results = backtester.run_many(&data);

    let mut completed = Vec::new();
    for (symbol, result) in results {
        match result {
            Ok(result) => {
                print_result(symbol.as_str(), config.trading.initial_capital, &result);
                completed.push((symbol, result));
            }
            Err(e) => warn!("{}: skipped ({})", symbol, e),
        }
    }

    if completed.is_empty() {
        anyhow::bail!("No symbol produced a backtest result");
    }

    let path = output.unwrap_or_else(|| {
        config
            .backtest
            .default_output_path(chrono::Local::now().naive_local())
    });
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let by_symbol: std::collections::BTreeMap<_, _> = completed.into_iter().collect();
    let json = serde_json::to_string_pretty(&by_symbol).context("Failed to serialize results")?;
    std::fs::write(&path, json)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;
    info!("Results written to: {}", path.display());

    info!("Backtest completed successfully");
    Ok(())
}

fn print_result(symbol: &str, initial_capital: f64, result: &BacktestResult) {
    let m = &result.metrics;
    let profit_factor = m
        .profit_factor
        .map(|pf| format!("{:.2}", pf))
        .unwrap_or_else(|| "n/a".to_string());
    let rejections = if result.rejections.is_empty() {
        "none".to_string()
    } else {
        result
            .rejections
            .iter()
            .map(|(reason, count)| format!("{}={}", reason, count))
            .join(", ")
    };

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {}", symbol);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.2}", initial_capital);
    println!("Total Return:       {:.2}%", m.total_return);
    println!("Sharpe Ratio:       {:.2}", m.sharpe_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {}", profit_factor);
    println!("Expectancy:         {:.2}", m.expectancy);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Total Fees:         {:.2}", m.total_fees);
    println!("Skipped Bars:       {}", result.skipped_bars.len());
    println!("Rejections:         {}", rejections);
    println!("{}", "=".repeat(60));
}
