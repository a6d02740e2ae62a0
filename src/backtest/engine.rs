// src/backtest/engine.rs
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::backtest::report::{
    BacktestReport, BacktestSummary, CandleRecord, MethodStats, TradeRecord,
};
use crate::config::{BasketMode, Config};
use crate::domain::errors::AppResult;
use crate::domain::models::{
    BasketMember, Candle, Direction, ExitReason, SkipReason, Trade, TrailingMethod,
    TrailingStopState,
};
use crate::trading::engine::SignalEngine;
use crate::trading::exits::ExitEvaluator;
use crate::trading::session::SessionSchedule;
use crate::trading::{alignment, compression, trailing};
use std::collections::{BTreeMap, HashMap};

const INITIAL_EQUITY: f64 = 10_000.0;

#[derive(Debug, Clone, Copy)]
struct SimulatedExit {
    exit_idx: usize,
    exit_price: f64,
    reason: ExitReason,
}

/// Deterministic historical replay. Single-threaded by construction: one
/// pass over the candle array, evaluating the same cascade, exit and
/// trailing code the live driver runs, against the candle prefix visible at
/// each tick. Every entered trade is simulated once per trailing method and
/// the best-performing method by profit factor is reported for the run.
pub struct BacktestEngine {
    config: Config,
    engine: SignalEngine,
    session: SessionSchedule,
}

impl BacktestEngine {
    pub fn new(config: Config) -> Self {
        Self {
            engine: SignalEngine::new(&config.strategy),
            session: SessionSchedule::new(config.session.clone()),
            config,
        }
    }

    pub fn run(
        &self,
        symbol: &str,
        candles: &[Candle],
        basket: &HashMap<String, Vec<Candle>>,
    ) -> AppResult<BacktestReport> {
        let cfg = &self.config.strategy;
        let n = candles.len();
        let exits = ExitEvaluator::new(cfg.clone(), self.session.clone());

        let warmup = cfg.warmup_candles.min(n / 10);
        log::info!(
            "Backtesting {} over {} candles (warmup {})",
            symbol,
            n,
            warmup
        );

        let mut records: Vec<CandleRecord> = Vec::with_capacity(n);
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut method_stats: BTreeMap<String, MethodStats> = TrailingMethod::ALL
            .iter()
            .map(|m| (m.to_string(), MethodStats::new(INITIAL_EQUITY)))
            .collect();
        let mut equity = INITIAL_EQUITY;

        for i in 0..n {
            let prefix = &candles[..=i];
            let candle = &candles[i];
            let ts = candle.timestamp_ms;
            let snapshot = IndicatorSnapshot::compute(prefix, cfg);
            let mut record = self.base_record(i, candle, &snapshot, equity);

            if i < warmup {
                record.skip_reason = Some(SkipReason::Warmup.to_string());
                records.push(record);
                continue;
            }
            if i + 1 >= n {
                record.skip_reason = Some(ExitReason::EndOfData.to_string());
                records.push(record);
                continue;
            }
            if !self.session.entry_allowed(ts) {
                record.skip_reason = Some(SkipReason::SessionClosed.to_string());
                records.push(record);
                continue;
            }

            let members = self.classify_basket(basket, ts);
            let signal = self.engine.evaluate(symbol, prefix, &snapshot, &members, ts);

            record.basket_aligned = signal.alignment.aligned;
            record.basket_direction = signal.alignment.direction.to_string();
            record.basket_score = signal.alignment.score;
            record.compression_detected = signal.compression.detected;
            record.compression_direction = signal.compression.direction.to_string();
            record.compression_signals = signal.compression.signal_count;
            record.momentum_ok = signal.momentum_ok;
            record.trend_ok = signal.trend_ok;
            record.entry_ok = signal.entry_ok;
            record.skip_reason = signal.skip_reason.map(|r| r.to_string());

            if signal.passed() {
                record.trade_entered = true;
                let direction = signal.direction;
                let entry_price = candle.close_f64();

                let mut best: Option<TradeRecord> = None;
                for method in TrailingMethod::ALL {
                    let sim = self.simulate_trade(symbol, candles, i, direction, method, &exits);
                    let pnl_pct = match direction {
                        Direction::Bullish => (sim.exit_price - entry_price) / entry_price * 100.0,
                        _ => (entry_price - sim.exit_price) / entry_price * 100.0,
                    };
                    let pnl_dollars = pnl_pct / 100.0 * equity;

                    let trade = TradeRecord {
                        symbol: symbol.to_string(),
                        method: method.to_string(),
                        direction: direction.to_string(),
                        entry_idx: i,
                        entry_time_ms: ts,
                        entry_price,
                        exit_idx: sim.exit_idx,
                        exit_time_ms: candles[sim.exit_idx].timestamp_ms,
                        exit_price: sim.exit_price,
                        exit_reason: sim.reason.to_string(),
                        pnl_pct,
                        pnl_dollars,
                    };

                    if let Some(stats) = method_stats.get_mut(&trade.method) {
                        stats.record(pnl_dollars);
                    }
                    let better = best
                        .as_ref()
                        .map(|b| trade.pnl_dollars > b.pnl_dollars)
                        .unwrap_or(true);
                    if better {
                        best = Some(trade);
                    }
                }

                if let Some(best) = best {
                    equity += best.pnl_dollars;
                    record.equity = equity;
                    trades.push(best);
                }
            }

            records.push(record);
        }

        let best_method = self.pick_best_method(&method_stats);
        let summary = self.summarize(&method_stats, best_method);
        log::info!(
            "Backtest for {} complete: {} trade signal(s), best method {:?}",
            symbol,
            trades.len(),
            summary.best_method
        );

        Ok(BacktestReport {
            symbol: symbol.to_string(),
            records,
            trades,
            method_stats,
            best_method,
            summary,
        })
    }

    fn base_record(
        &self,
        idx: usize,
        candle: &Candle,
        snapshot: &IndicatorSnapshot,
        equity: f64,
    ) -> CandleRecord {
        CandleRecord {
            candle_idx: idx,
            timestamp_ms: candle.timestamp_ms,
            open: candle.open_f64(),
            high: candle.high_f64(),
            low: candle.low_f64(),
            close: candle.close_f64(),
            volume: candle.volume_f64(),
            vwap: snapshot.vwap,
            ema_trend: snapshot.ema,
            ema_trail: snapshot.ema_trail,
            bb_width: snapshot.bb_width,
            stoch_k: snapshot.stoch_k,
            stoch_d: snapshot.stoch_d,
            atr: snapshot.atr,
            basket_aligned: false,
            basket_direction: Direction::Neutral.to_string(),
            basket_score: 0.0,
            compression_detected: false,
            compression_direction: Direction::Neutral.to_string(),
            compression_signals: 0,
            momentum_ok: false,
            trend_ok: false,
            entry_ok: false,
            trade_entered: false,
            skip_reason: None,
            equity,
        }
    }

    /// Classify every basket member from its candle history up to the tick.
    /// Members whose history is still shorter than the classification window
    /// are excluded from the vote.
    fn classify_basket(
        &self,
        basket: &HashMap<String, Vec<Candle>>,
        ts: i64,
    ) -> Vec<BasketMember> {
        let cfg = &self.config.strategy;
        let mut members = Vec::new();

        for (symbol, series) in basket {
            let visible = series.partition_point(|c| c.timestamp_ms <= ts);
            let closes: Vec<f64> = series[..visible].iter().map(|c| c.close_f64()).collect();

            let weight = match cfg.basket_mode {
                BasketMode::Sector => Some(*cfg.sector_weights.get(symbol).unwrap_or(&0.0)),
                BasketMode::MegaCap => None,
            };

            if let Some(status) = alignment::classify_member(&closes, cfg.member_delta) {
                members.push(BasketMember {
                    symbol: symbol.clone(),
                    weight,
                    status,
                });
            }
        }
        members
    }

    /// Walk one trade forward under a single trailing method, using the same
    /// exit evaluator and trailing rules as live execution. The hold is
    /// capped at `max_hold_bars`; running off either cap or the data closes
    /// at that candle's close.
    fn simulate_trade(
        &self,
        symbol: &str,
        candles: &[Candle],
        start_idx: usize,
        direction: Direction,
        method: TrailingMethod,
        exits: &ExitEvaluator,
    ) -> SimulatedExit {
        let cfg = &self.config.strategy;
        let n = candles.len();
        let entry_prefix = &candles[..=start_idx];
        let entry_price = candles[start_idx].close_f64();
        let entry_ts = candles[start_idx].timestamp_ms;

        let entry_snapshot = IndicatorSnapshot::compute(entry_prefix, cfg);
        let seed = trailing::seed_stop(
            method,
            direction,
            entry_prefix,
            &entry_snapshot,
            entry_price,
            cfg,
        )
        .unwrap_or(match direction {
            Direction::Bullish => entry_price * 0.99,
            _ => entry_price * 1.01,
        });

        let mut trade = Trade::pending(
            format!("sim-{}-{}", start_idx, method),
            symbol,
            direction,
            cfg.contracts_per_trade,
            entry_ts,
            method,
        );
        trade.fill(
            entry_ts,
            entry_price,
            TrailingStopState::new(method, seed, entry_price),
        );

        let end = (start_idx + cfg.max_hold_bars).min(n - 1);
        for j in (start_idx + 1)..=end {
            let prefix = &candles[..=j];
            let snapshot = IndicatorSnapshot::compute(prefix, cfg);
            let comp = compression::detect(prefix, &snapshot, cfg);
            if !comp.detected {
                trade.compression_cleared = true;
            }

            let ts = candles[j].timestamp_ms;
            if let Some(reason) = exits.evaluate(&trade, prefix, &snapshot, &comp, ts) {
                let exit_price = match reason {
                    ExitReason::StopLoss => trade.stop.current_stop,
                    _ => snapshot.close,
                };
                return SimulatedExit {
                    exit_idx: j,
                    exit_price,
                    reason,
                };
            }

            trade.stop.update_watermark(snapshot.close, direction);
            if let Some(candidate) =
                trailing::candidate_stop(method, direction, prefix, &snapshot, cfg)
            {
                trade.stop.tighten(candidate, direction);
            }
        }

        SimulatedExit {
            exit_idx: end,
            exit_price: candles[end].close_f64(),
            reason: ExitReason::EndOfData,
        }
    }

    fn pick_best_method(
        &self,
        method_stats: &BTreeMap<String, MethodStats>,
    ) -> Option<TrailingMethod> {
        let mut best: Option<(TrailingMethod, f64)> = None;
        for method in TrailingMethod::ALL {
            let stats = match method_stats.get(&method.to_string()) {
                Some(stats) if stats.total_trades() > 0 => stats,
                _ => continue,
            };
            let pf = stats.profit_factor();
            if best.map(|(_, best_pf)| pf > best_pf).unwrap_or(true) {
                best = Some((method, pf));
            }
        }
        best.map(|(method, _)| method)
    }

    fn summarize(
        &self,
        method_stats: &BTreeMap<String, MethodStats>,
        best_method: Option<TrailingMethod>,
    ) -> BacktestSummary {
        match best_method.and_then(|m| method_stats.get(&m.to_string())) {
            Some(stats) => BacktestSummary {
                win_rate: stats.win_rate(),
                profit_factor: stats.profit_factor(),
                max_drawdown: stats.max_drawdown(),
                total_trades: stats.total_trades(),
                winning_trades: stats.winning_trades,
                losing_trades: stats.losing_trades,
                gross_profit: stats.gross_profit,
                gross_loss: stats.gross_loss,
                final_equity: stats.final_equity(),
                best_method: best_method.map(|m| m.to_string()),
            },
            None => BacktestSummary {
                win_rate: 0.0,
                profit_factor: 0.0,
                max_drawdown: 0.0,
                total_trades: 0,
                winning_trades: 0,
                losing_trades: 0,
                gross_profit: 0.0,
                gross_loss: 0.0,
                final_equity: INITIAL_EQUITY,
                best_method: None,
            },
        }
    }
}
