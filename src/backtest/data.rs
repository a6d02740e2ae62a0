// src/backtest/data.rs
use crate::domain::errors::{AppError, AppResult};
use crate::domain::models::Candle;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CandleRow {
    timestamp_ms: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

/// Load a candle history from a CSV file with columns
/// `timestamp_ms,open,high,low,close,volume`. Rows must be in ascending
/// timestamp order; out-of-order rows are rejected.
pub fn load_candles_csv<P: AsRef<Path>>(
    path: P,
    symbol: &str,
    timeframe: &str,
) -> AppResult<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).map_err(|e| {
        AppError::Config(format!(
            "Failed to open candle file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    let mut candles = Vec::new();
    let mut last_ts = i64::MIN;
    for (line, row) in reader.deserialize::<CandleRow>().enumerate() {
        let row = row.map_err(|e| {
            AppError::Config(format!(
                "Bad candle row {} in {}: {}",
                line + 2,
                path.as_ref().display(),
                e
            ))
        })?;
        if row.timestamp_ms <= last_ts {
            return Err(AppError::Config(format!(
                "Out-of-order candle at row {} in {}",
                line + 2,
                path.as_ref().display()
            )));
        }
        last_ts = row.timestamp_ms;
        candles.push(Candle::new(
            symbol,
            timeframe,
            row.timestamp_ms,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume,
        ));
    }

    log::info!(
        "Loaded {} candles for {} from {}",
        candles.len(),
        symbol,
        path.as_ref().display()
    );
    Ok(candles)
}
