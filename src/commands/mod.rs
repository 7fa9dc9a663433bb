pub mod backtest;
pub mod decide;
