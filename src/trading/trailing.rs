// src/trading/trailing.rs
use crate::analysis::heiken_ashi;
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::config::{StopLossMethod, StrategyConfig};
use crate::domain::models::{Candle, Direction, TrailingMethod};

/// Initial stop distance used when no indicator data supports the configured
/// method, expressed as a fraction of price.
const FALLBACK_STOP_FRACTION: f64 = 0.01;

/// Seed rule: where each method places the stop at fill time.
///
/// Returns `None` when the method's inputs are unavailable; callers fall back
/// to a fixed percent stop rather than opening an unprotected trade.
pub fn seed_stop(
    method: TrailingMethod,
    direction: Direction,
    candles: &[Candle],
    snapshot: &IndicatorSnapshot,
    entry_price: f64,
    config: &StrategyConfig,
) -> Option<f64> {
    match method {
        // Prior real candle's extreme
        TrailingMethod::HeikenAshi => {
            let prior = if candles.len() >= 2 {
                &candles[candles.len() - 2]
            } else {
                candles.last()?
            };
            match direction {
                Direction::Bullish => Some(prior.low_f64()),
                Direction::Bearish => Some(prior.high_f64()),
                Direction::Neutral => None,
            }
        }
        TrailingMethod::Ema => snapshot.ema_trail,
        TrailingMethod::Atr => {
            let atr = snapshot.atr?;
            Some(offset(direction, entry_price, atr * config.atr_multiple))
        }
        TrailingMethod::Percent => Some(percent_stop(direction, entry_price, config.trail_pct)),
        TrailingMethod::FixedPoints => {
            Some(offset(direction, entry_price, config.fixed_trail_points))
        }
    }
}

/// Initial stop for a freshly filled trade, honoring the configured stop
/// placement method. Always produces a level.
pub fn initial_stop(
    direction: Direction,
    candles: &[Candle],
    snapshot: &IndicatorSnapshot,
    entry_price: f64,
    config: &StrategyConfig,
) -> f64 {
    let fallback = offset(direction, entry_price, entry_price * FALLBACK_STOP_FRACTION);

    match config.stop_loss_method {
        StopLossMethod::TrailingSeed => seed_stop(
            config.trailing_method,
            direction,
            candles,
            snapshot,
            entry_price,
            config,
        )
        .unwrap_or(fallback),
        StopLossMethod::FixedPercent => {
            percent_stop(direction, entry_price, config.fixed_stop_pct)
        }
        StopLossMethod::AtrMultiple => match snapshot.atr {
            Some(atr) => offset(direction, entry_price, atr * config.atr_multiple),
            None => fallback,
        },
    }
}

/// Candidate stop for an open trade on the current tick. The lifecycle
/// applies the ratchet: a candidate only takes effect through
/// `TrailingStopState::tighten`.
pub fn candidate_stop(
    method: TrailingMethod,
    direction: Direction,
    candles: &[Candle],
    snapshot: &IndicatorSnapshot,
    config: &StrategyConfig,
) -> Option<f64> {
    let price = snapshot.close;

    match method {
        TrailingMethod::HeikenAshi => {
            heiken_ashi::trail_level(candles, direction, config.ha_trail_lookback)
        }
        TrailingMethod::Ema => snapshot.ema_trail,
        TrailingMethod::Percent => Some(percent_stop(direction, price, config.trail_pct)),
        TrailingMethod::Atr => {
            let atr = snapshot.atr?;
            Some(offset(direction, price, atr * config.atr_multiple))
        }
        TrailingMethod::FixedPoints => Some(offset(direction, price, config.fixed_trail_points)),
    }
}

fn percent_stop(direction: Direction, price: f64, pct: f64) -> f64 {
    offset(direction, price, price * pct / 100.0)
}

fn offset(direction: Direction, price: f64, distance: f64) -> f64 {
    match direction {
        Direction::Bullish => price - distance,
        _ => price + distance,
    }
}
