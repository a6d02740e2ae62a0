// src/main.rs
use intraday_trade::backtest::data::load_candles_csv;
use intraday_trade::backtest::engine::BacktestEngine;
use intraday_trade::config::{BasketMode, Config};
use intraday_trade::domain::errors::{AppError, AppResult};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration: file if given, environment otherwise
    let config = match env::var("CONFIG_FILE") {
        Ok(path) => Config::from_file(path)?,
        Err(_) => Config::from_env()?,
    };

    // Initialize logging
    config.init_logging()?;

    log::info!("Starting intraday_trade v{}", env!("CARGO_PKG_VERSION"));

    let symbol = env::var("SYMBOL").unwrap_or_else(|_| {
        config
            .strategy
            .tickers
            .first()
            .cloned()
            .unwrap_or_else(|| "SPY".to_string())
    });

    let candles_path = env::var("CANDLES_CSV").map_err(|_| {
        AppError::Config(
            "CANDLES_CSV must point at a candle file (timestamp_ms,open,high,low,close,volume)"
                .to_string(),
        )
    })?;
    let candles = load_candles_csv(&candles_path, &symbol, &config.strategy.timeframe)?;

    // Basket histories live next to the main file as <SYMBOL>.csv
    let basket_symbols: Vec<String> = match config.strategy.basket_mode {
        BasketMode::Sector => config.strategy.sector_weights.keys().cloned().collect(),
        BasketMode::MegaCap => config.strategy.megacap_symbols.clone(),
    };
    let basket_dir = env::var("BASKET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(&candles_path)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default()
        });

    let mut basket = HashMap::new();
    for basket_symbol in basket_symbols {
        let path = basket_dir.join(format!("{}.csv", basket_symbol));
        if !path.exists() {
            log::warn!(
                "No basket history for {} at {} (member excluded)",
                basket_symbol,
                path.display()
            );
            continue;
        }
        let series = load_candles_csv(&path, &basket_symbol, &config.strategy.timeframe)?;
        basket.insert(basket_symbol, series);
    }

    // Run the replay
    let engine = BacktestEngine::new(config);
    let report = engine.run(&symbol, &candles, &basket)?;

    let output_dir = env::var("OUTPUT_DIR").map(PathBuf::from).unwrap_or_default();
    if !output_dir.as_os_str().is_empty() {
        std::fs::create_dir_all(&output_dir)?;
    }
    let analysis_path = output_dir.join(format!("{}_analysis.csv", symbol));
    let trades_path = output_dir.join(format!("{}_trades.csv", symbol));
    report.write_analysis_csv(&analysis_path)?;
    report.write_trades_csv(&trades_path)?;

    log::info!("Analysis table: {}", analysis_path.display());
    log::info!("Trade table: {}", trades_path.display());

    let summary = &report.summary;
    log::info!("=== Backtest Summary: {} ===", symbol);
    log::info!("  Total trades:  {}", summary.total_trades);
    log::info!("  Win rate:      {:.2}%", summary.win_rate);
    log::info!("  Profit factor: {:.2}", summary.profit_factor);
    log::info!("  Max drawdown:  {:.2}%", summary.max_drawdown);
    log::info!("  Final equity:  {:.2}", summary.final_equity);
    match &summary.best_method {
        Some(method) => log::info!("  Best trailing method: {}", method),
        None => log::info!("  Best trailing method: n/a (no trades)"),
    }

    Ok(())
}
