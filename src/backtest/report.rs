// src/backtest/report.rs
use crate::domain::errors::{AppError, AppResult};
use crate::domain::models::TrailingMethod;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One row per evaluated candle. The schema is stable: downstream analysis
/// tooling reads these columns by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleRecord {
    pub candle_idx: usize,
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub ema_trend: Option<f64>,
    pub ema_trail: Option<f64>,
    pub bb_width: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub atr: Option<f64>,
    pub basket_aligned: bool,
    pub basket_direction: String,
    pub basket_score: f64,
    pub compression_detected: bool,
    pub compression_direction: String,
    pub compression_signals: u8,
    pub momentum_ok: bool,
    pub trend_ok: bool,
    pub entry_ok: bool,
    pub trade_entered: bool,
    pub skip_reason: Option<String>,
    pub equity: f64,
}

/// One row per simulated trade (one per trailing method per entry signal).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub method: String,
    pub direction: String,
    pub entry_idx: usize,
    pub entry_time_ms: i64,
    pub entry_price: f64,
    pub exit_idx: usize,
    pub exit_time_ms: i64,
    pub exit_price: f64,
    pub exit_reason: String,
    pub pnl_pct: f64,
    pub pnl_dollars: f64,
}

/// Per-method aggregate statistics over a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodStats {
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub equity_curve: Vec<f64>,
}

impl MethodStats {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            equity_curve: vec![initial_equity],
            ..Self::default()
        }
    }

    pub fn record(&mut self, pnl_dollars: f64) {
        if pnl_dollars > 0.0 {
            self.winning_trades += 1;
            self.gross_profit += pnl_dollars;
        } else {
            self.losing_trades += 1;
            self.gross_loss += pnl_dollars.abs();
        }
        let last = self.equity_curve.last().copied().unwrap_or_default();
        self.equity_curve.push(last + pnl_dollars);
    }

    pub fn total_trades(&self) -> usize {
        self.winning_trades + self.losing_trades
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.total_trades();
        if total == 0 {
            return 0.0;
        }
        self.winning_trades as f64 / total as f64 * 100.0
    }

    pub fn profit_factor(&self) -> f64 {
        self.gross_profit / self.gross_loss.max(1.0)
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve.last().copied().unwrap_or_default()
    }

    pub fn max_drawdown(&self) -> f64 {
        let mut max_dd: f64 = 0.0;
        let mut peak = self.equity_curve.first().copied().unwrap_or_default();
        for &equity in &self.equity_curve {
            if equity > peak {
                peak = equity;
            } else if peak > 0.0 {
                max_dd = max_dd.max((peak - equity) / peak * 100.0);
            }
        }
        max_dd
    }
}

/// Headline results for the best-performing trailing method.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub final_equity: f64,
    pub best_method: Option<String>,
}

#[derive(Debug)]
pub struct BacktestReport {
    pub symbol: String,
    pub records: Vec<CandleRecord>,
    pub trades: Vec<TradeRecord>,
    pub method_stats: BTreeMap<String, MethodStats>,
    pub best_method: Option<TrailingMethod>,
    pub summary: BacktestSummary,
}

impl BacktestReport {
    /// Write the per-candle analysis table.
    pub fn write_analysis_csv<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        write_csv(path, &self.records)
    }

    /// Write the per-trade table.
    pub fn write_trades_csv<P: AsRef<Path>>(&self, path: P) -> AppResult<()> {
        write_csv(path, &self.trades)
    }
}

fn write_csv<P: AsRef<Path>, T: Serialize>(path: P, rows: &[T]) -> AppResult<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())
        .map_err(|e| AppError::Config(format!("Failed to create CSV writer: {}", e)))?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| AppError::Config(format!("Failed to write CSV row: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| AppError::Config(format!("Failed to flush CSV: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_stats_track_wins_and_losses() {
        let mut stats = MethodStats::new(10_000.0);
        stats.record(500.0);
        stats.record(-200.0);
        stats.record(300.0);

        assert_eq!(stats.total_trades(), 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate() - 66.6667).abs() < 0.01);
        assert!((stats.profit_factor() - 800.0 / 200.0).abs() < 1e-9);
        assert!((stats.final_equity() - 10_600.0).abs() < 1e-9);
    }

    #[test]
    fn max_drawdown_measures_peak_to_trough() {
        let mut stats = MethodStats::new(10_000.0);
        stats.record(1_000.0); // 11_000 peak
        stats.record(-2_200.0); // 8_800 trough: 20% drawdown
        stats.record(3_000.0);

        assert!((stats.max_drawdown() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_survives_zero_losses() {
        let mut stats = MethodStats::new(10_000.0);
        stats.record(250.0);
        // Loss floor of 1 keeps the ratio finite
        assert!((stats.profit_factor() - 250.0).abs() < 1e-9);
    }
}
