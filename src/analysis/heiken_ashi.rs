// src/analysis/heiken_ashi.rs
use crate::domain::models::{Candle, Direction};

/// A smoothed candle produced by the Heiken-Ashi transform.
#[derive(Debug, Clone, Copy)]
pub struct HaCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Transform a real candle series into Heiken-Ashi candles.
///
/// HA-open averages the prior candle's open/close (seeded from the first
/// real open), HA-close averages the current OHLC, and HA-high/low extend
/// the range over the current open and close.
pub fn transform(candles: &[Candle]) -> Vec<HaCandle> {
    let mut result = Vec::with_capacity(candles.len());

    for (i, candle) in candles.iter().enumerate() {
        let open = candle.open_f64();
        let high = candle.high_f64();
        let low = candle.low_f64();
        let close = candle.close_f64();

        let ha_open = if i == 0 {
            open
        } else {
            (candles[i - 1].open_f64() + candles[i - 1].close_f64()) / 2.0
        };
        let ha_close = (open + high + low + close) / 4.0;
        let ha_high = high.max(open).max(close);
        let ha_low = low.min(open).min(close);

        result.push(HaCandle {
            open: ha_open,
            high: ha_high,
            low: ha_low,
            close: ha_close,
        });
    }

    result
}

/// Wick tolerance for the flat-wick entry pattern. A degenerate zero-range
/// candle gets a tiny epsilon so the comparison stays meaningful.
fn wick_tolerance(ha: &HaCandle, wick_tolerance_pct: f64) -> f64 {
    let range = ha.high - ha.low;
    if range > 0.0 {
        range * wick_tolerance_pct
    } else {
        0.0001
    }
}

/// Flat-bottom / flat-top entry trigger on the latest Heiken-Ashi candle.
///
/// Bullish: lower wick within tolerance and a bullish HA body. Bearish is
/// the mirror on the upper wick. Returns `None` when neither side fires or
/// there are not yet two real candles to transform.
pub fn entry_trigger(candles: &[Candle], wick_tolerance_pct: f64) -> Option<Direction> {
    if candles.len() < 2 {
        return None;
    }

    let ha = transform(&candles[candles.len() - 2..]);
    let last = ha.last()?;
    let tolerance = wick_tolerance(last, wick_tolerance_pct);

    if (last.open - last.low).abs() < tolerance && last.close > last.open {
        return Some(Direction::Bullish);
    }
    if (last.open - last.high).abs() < tolerance && last.close < last.open {
        return Some(Direction::Bearish);
    }

    None
}

/// Whether the latest Heiken-Ashi body has turned against an open trade.
pub fn reversal_against(candles: &[Candle], direction: Direction) -> bool {
    if candles.len() < 2 {
        return false;
    }

    let ha = transform(&candles[candles.len() - 2..]);
    let last = match ha.last() {
        Some(c) => *c,
        None => return false,
    };

    match direction {
        Direction::Bullish => last.open > last.close,
        Direction::Bearish => last.open < last.close,
        Direction::Neutral => false,
    }
}

/// Lowest HA low / highest HA high over the last `lookback` candles, used by
/// the Heiken-Ashi trailing stop.
pub fn trail_level(candles: &[Candle], direction: Direction, lookback: usize) -> Option<f64> {
    if candles.is_empty() || lookback == 0 {
        return None;
    }

    let ha = transform(candles);
    let take = lookback.min(ha.len());
    let tail = &ha[ha.len() - take..];

    match direction {
        Direction::Bullish => Some(tail.iter().map(|c| c.low).fold(f64::MAX, f64::min)),
        Direction::Bearish => Some(tail.iter().map(|c| c.high).fold(f64::MIN, f64::max)),
        Direction::Neutral => None,
    }
}
