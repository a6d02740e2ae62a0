// src/trading/exits.rs
use crate::analysis::heiken_ashi;
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::config::StrategyConfig;
use crate::domain::models::{Candle, CompressionResult, Direction, ExitReason, Trade};
use crate::trading::session::SessionSchedule;

const MINUTE_MS: i64 = 60_000;

/// Priority-ordered exit checks for an open trade. The first condition that
/// fires wins the tick; nothing below it is evaluated.
#[derive(Debug, Clone)]
pub struct ExitEvaluator {
    config: StrategyConfig,
    session: SessionSchedule,
}

impl ExitEvaluator {
    pub fn new(config: StrategyConfig, session: SessionSchedule) -> Self {
        Self { config, session }
    }

    pub fn evaluate(
        &self,
        trade: &Trade,
        candles: &[Candle],
        snapshot: &IndicatorSnapshot,
        compression: &CompressionResult,
        now_ms: i64,
    ) -> Option<ExitReason> {
        let candle = candles.last()?;

        // 1. Stop price touched
        let stop = trade.stop.current_stop;
        let stop_hit = match trade.direction {
            Direction::Bullish => candle.low_f64() <= stop,
            Direction::Bearish => candle.high_f64() >= stop,
            Direction::Neutral => false,
        };
        if stop_hit {
            return Some(ExitReason::StopLoss);
        }

        // 2. Opposing Heiken-Ashi reversal, suppressed near breakeven so a
        //    flat open doesn't whipsaw straight back out
        let profit_pct = trade.profit_pct(snapshot.close);
        let reversal_armed = profit_pct >= self.config.min_profit_before_exit_pct
            || profit_pct <= -self.config.loss_guard_pct;
        if reversal_armed && heiken_ashi::reversal_against(candles, trade.direction) {
            return Some(ExitReason::HeikenAshiReversal);
        }

        // 3. Stochastic extreme crossing against the position
        if let (Some(k), Some(d), Some(k_prev), Some(d_prev)) = (
            snapshot.stoch_k,
            snapshot.stoch_d,
            snapshot.stoch_k_prev,
            snapshot.stoch_d_prev,
        ) {
            let crossed = match trade.direction {
                Direction::Bullish => {
                    k > self.config.stoch_exit_overbought && k_prev > d_prev && k < d
                }
                Direction::Bearish => {
                    k < self.config.stoch_exit_oversold && k_prev < d_prev && k > d
                }
                Direction::Neutral => false,
            };
            if crossed {
                return Some(ExitReason::StochasticReversal);
            }
        }

        // 4. Close against both VWAP and EMA simultaneously
        if let (Some(vwap), Some(ema)) = (snapshot.vwap, snapshot.ema) {
            let against = match trade.direction {
                Direction::Bullish => snapshot.close < vwap && snapshot.close < ema,
                Direction::Bearish => snapshot.close > vwap && snapshot.close > ema,
                Direction::Neutral => false,
            };
            if against {
                return Some(ExitReason::VwapEmaCross);
            }
        }

        // 5. Re-entry into a fresh compression zone. The zone the trade
        //    broke out of doesn't count: compression must clear first.
        if compression.detected && trade.compression_cleared {
            return Some(ExitReason::CompressionReentry);
        }

        // 6. Failsafe holding-time limit
        if now_ms - trade.entry_time_ms >= self.config.failsafe_minutes * MINUTE_MS {
            return Some(ExitReason::Failsafe);
        }

        // 7. Auto-close ahead of the session close
        if self.session.auto_close_due(now_ms) {
            return Some(ExitReason::AutoClose);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, StrategyConfig};
    use crate::domain::models::{TrailingMethod, TrailingStopState};
    use chrono::NaiveDate;

    fn ms_at(hour: u32, minute: u32) -> i64 {
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn evaluator() -> ExitEvaluator {
        ExitEvaluator::new(
            StrategyConfig::default(),
            SessionSchedule::new(SessionConfig::default()),
        )
    }

    fn open_trade(direction: Direction, entry_price: f64, stop: f64, entry_ms: i64) -> Trade {
        let mut trade = Trade::pending(
            "trade-1".into(),
            "XYZ",
            direction,
            1,
            entry_ms,
            TrailingMethod::Atr,
        );
        trade.fill(
            entry_ms,
            entry_price,
            TrailingStopState::new(TrailingMethod::Atr, stop, entry_price),
        );
        trade
    }

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new("XYZ", "5m", 0, open, high, low, close, 1_000.0)
    }

    fn neutral_candles(close: f64) -> Vec<Candle> {
        // Two strongly bullish candles so no bearish HA reversal fires
        vec![
            candle(close - 1.0, close - 0.4, close - 1.0, close - 0.5),
            candle(close - 0.5, close + 0.1, close - 0.5, close),
        ]
    }

    #[test]
    fn stop_touch_wins_over_vwap_cross() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 101.0, 101.8, ms_at(10, 0));
        // Low pierces the stop, and the close also sits below VWAP and EMA
        let candles = vec![candle(102.5, 102.6, 101.5, 101.6)];
        let snapshot = IndicatorSnapshot {
            close: 101.6,
            vwap: Some(102.0),
            ema: Some(102.1),
            ..IndicatorSnapshot::default()
        };
        let reason = evaluator.evaluate(
            &trade,
            &candles,
            &snapshot,
            &CompressionResult::none(),
            ms_at(10, 5),
        );
        assert_eq!(reason, Some(ExitReason::StopLoss));
        assert_eq!(reason.unwrap().to_string(), "Stop loss hit");
    }

    #[test]
    fn bearish_stop_touch_uses_high() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bearish, 100.0, 99.0, ms_at(10, 0));
        let candles = vec![candle(98.0, 99.2, 97.8, 98.1)];
        let snapshot = IndicatorSnapshot {
            close: 98.1,
            ..IndicatorSnapshot::default()
        };
        let reason = evaluator.evaluate(
            &trade,
            &candles,
            &snapshot,
            &CompressionResult::none(),
            ms_at(10, 5),
        );
        assert_eq!(reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn reversal_suppressed_near_breakeven() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(10, 0));
        // Bearish HA body: long slide after a bullish candle
        let candles = vec![
            candle(100.4, 100.6, 100.0, 100.5),
            candle(100.5, 100.5, 99.9, 100.1),
        ];
        // +0.1% profit: inside the no-exit band
        let snapshot = IndicatorSnapshot {
            close: 100.1,
            ..IndicatorSnapshot::default()
        };
        let reason = evaluator.evaluate(
            &trade,
            &candles,
            &snapshot,
            &CompressionResult::none(),
            ms_at(10, 5),
        );
        assert_eq!(reason, None);
    }

    #[test]
    fn reversal_fires_once_profit_threshold_met() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(10, 0));
        let candles = vec![
            candle(101.2, 101.4, 100.8, 101.3),
            candle(101.3, 101.3, 100.5, 100.7),
        ];
        // +0.7% profit clears the 0.5% minimum
        let snapshot = IndicatorSnapshot {
            close: 100.7,
            ..IndicatorSnapshot::default()
        };
        let reason = evaluator.evaluate(
            &trade,
            &candles,
            &snapshot,
            &CompressionResult::none(),
            ms_at(10, 5),
        );
        assert_eq!(reason, Some(ExitReason::HeikenAshiReversal));
    }

    #[test]
    fn stochastic_cross_exits_extended_trade() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(10, 0));
        let candles = neutral_candles(101.0);
        let snapshot = IndicatorSnapshot {
            close: 101.0,
            stoch_k: Some(86.0),
            stoch_d: Some(88.0),
            stoch_k_prev: Some(92.0),
            stoch_d_prev: Some(89.0),
            ..IndicatorSnapshot::default()
        };
        let reason = evaluator.evaluate(
            &trade,
            &candles,
            &snapshot,
            &CompressionResult::none(),
            ms_at(10, 5),
        );
        assert_eq!(reason, Some(ExitReason::StochasticReversal));
    }

    #[test]
    fn vwap_and_ema_cross_requires_both_sides() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(10, 0));
        let candles = neutral_candles(99.5);

        // Below VWAP but still above EMA: no exit
        let snapshot = IndicatorSnapshot {
            close: 99.5,
            vwap: Some(99.8),
            ema: Some(99.2),
            ..IndicatorSnapshot::default()
        };
        assert_eq!(
            evaluator.evaluate(
                &trade,
                &candles,
                &snapshot,
                &CompressionResult::none(),
                ms_at(10, 5)
            ),
            None
        );

        // Below both: exit
        let snapshot = IndicatorSnapshot {
            close: 99.5,
            vwap: Some(99.8),
            ema: Some(99.7),
            ..IndicatorSnapshot::default()
        };
        assert_eq!(
            evaluator.evaluate(
                &trade,
                &candles,
                &snapshot,
                &CompressionResult::none(),
                ms_at(10, 5)
            ),
            Some(ExitReason::VwapEmaCross)
        );
    }

    #[test]
    fn compression_reentry_closes_trade() {
        let evaluator = evaluator();
        let mut trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(10, 0));
        trade.compression_cleared = true;
        let candles = neutral_candles(100.2);
        let snapshot = IndicatorSnapshot {
            close: 100.2,
            ..IndicatorSnapshot::default()
        };
        let compression = CompressionResult {
            detected: true,
            direction: Direction::Bullish,
            signal_count: 2,
        };
        let reason =
            evaluator.evaluate(&trade, &candles, &snapshot, &compression, ms_at(10, 5));
        assert_eq!(reason, Some(ExitReason::CompressionReentry));

        // The zone the trade entered from does not trigger the exit
        trade.compression_cleared = false;
        let reason =
            evaluator.evaluate(&trade, &candles, &snapshot, &compression, ms_at(10, 5));
        assert_eq!(reason, None);
    }

    #[test]
    fn failsafe_fires_after_holding_limit() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(10, 0));
        let candles = neutral_candles(100.2);
        let snapshot = IndicatorSnapshot {
            close: 100.2,
            ..IndicatorSnapshot::default()
        };

        assert_eq!(
            evaluator.evaluate(
                &trade,
                &candles,
                &snapshot,
                &CompressionResult::none(),
                ms_at(10, 19)
            ),
            None
        );
        assert_eq!(
            evaluator.evaluate(
                &trade,
                &candles,
                &snapshot,
                &CompressionResult::none(),
                ms_at(10, 20)
            ),
            Some(ExitReason::Failsafe)
        );
    }

    #[test]
    fn auto_close_fires_inside_closing_window() {
        let evaluator = evaluator();
        let trade = open_trade(Direction::Bullish, 100.0, 95.0, ms_at(15, 40));
        let candles = neutral_candles(100.2);
        let snapshot = IndicatorSnapshot {
            close: 100.2,
            ..IndicatorSnapshot::default()
        };
        let reason = evaluator.evaluate(
            &trade,
            &candles,
            &snapshot,
            &CompressionResult::none(),
            ms_at(15, 46),
        );
        assert_eq!(reason, Some(ExitReason::AutoClose));
    }
}
