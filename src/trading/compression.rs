// src/trading/compression.rs
use crate::analysis::indicators;
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::config::StrategyConfig;
use crate::domain::models::{Candle, CompressionResult, Direction};

/// Which of the three contraction signals fired on this evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionSignals {
    pub bollinger: bool,
    pub donchian: bool,
    pub volume: bool,
}

impl CompressionSignals {
    pub fn count(&self) -> u8 {
        self.bollinger as u8 + self.donchian as u8 + self.volume as u8
    }
}

/// Evaluate the three-signal compression quorum over the trailing window.
pub fn detect(
    candles: &[Candle],
    snapshot: &IndicatorSnapshot,
    config: &StrategyConfig,
) -> CompressionResult {
    let window = config.compression_window;
    if candles.len() < window {
        return CompressionResult::none();
    }

    let signals = CompressionSignals {
        bollinger: bollinger_compressed(snapshot, config),
        donchian: donchian_contracted(candles, window, config.donchian_threshold),
        volume: volume_squeezed(candles, window, config.volume_squeeze_threshold),
    };

    let count = signals.count();
    if count < config.compression_quorum {
        return CompressionResult {
            detected: false,
            direction: Direction::Neutral,
            signal_count: count,
        };
    }

    CompressionResult {
        detected: true,
        direction: resolve_direction(candles, snapshot),
        signal_count: count,
    }
}

/// Bollinger width below threshold. A zero width means a degenerate flat
/// window, which is not treated as compression.
fn bollinger_compressed(snapshot: &IndicatorSnapshot, config: &StrategyConfig) -> bool {
    match snapshot.bb_width {
        Some(width) => width > 0.0 && width < config.bb_width_threshold,
        None => false,
    }
}

/// Donchian contraction: the current window's range against the prior
/// window's, or against the running mean candle range when fewer than two
/// full windows exist.
fn donchian_contracted(candles: &[Candle], window: usize, threshold: f64) -> bool {
    let highs: Vec<f64> = candles.iter().map(|c| c.high_f64()).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low_f64()).collect();

    let (upper, lower) = match indicators::calculate_donchian(&highs, &lows, window) {
        Ok(channel) => channel,
        Err(_) => return false,
    };
    let current_range = upper - lower;

    let n = candles.len();
    if n >= window * 2 {
        let prior_highs = &highs[n - window * 2..n - window];
        let prior_lows = &lows[n - window * 2..n - window];
        let prior_upper = prior_highs.iter().cloned().fold(f64::MIN, f64::max);
        let prior_lower = prior_lows.iter().cloned().fold(f64::MAX, f64::min);
        let prior_range = prior_upper - prior_lower;
        current_range < prior_range * threshold
    } else {
        // Not enough history for a second window: compare against the mean
        // single-candle range instead
        let mean_range = highs
            .iter()
            .zip(lows.iter())
            .map(|(h, l)| h - l)
            .sum::<f64>()
            / n as f64;
        current_range < mean_range * threshold
    }
}

/// Recent volume drying up against the rest of the window. Skipped when no
/// volume is reported at all.
fn volume_squeezed(candles: &[Candle], window: usize, threshold: f64) -> bool {
    if window <= 5 {
        return false;
    }
    let n = candles.len();
    let volumes: Vec<f64> = candles[n - window..].iter().map(|c| c.volume_f64()).collect();
    if volumes.iter().sum::<f64>() <= 0.0 {
        return false;
    }

    let recent = &volumes[window - 5..];
    let prior = &volumes[..window - 5];
    let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let prior_mean = prior.iter().sum::<f64>() / prior.len() as f64;

    prior_mean > 0.0 && recent_mean < prior_mean * threshold
}

/// Breakout direction priority: VWAP comparison, then EMA, then the candle
/// body. The first available reading wins.
fn resolve_direction(candles: &[Candle], snapshot: &IndicatorSnapshot) -> Direction {
    let close = snapshot.close;

    if let Some(vwap) = snapshot.vwap {
        return if close > vwap {
            Direction::Bullish
        } else {
            Direction::Bearish
        };
    }

    if let Some(ema) = snapshot.ema {
        return if close > ema {
            Direction::Bullish
        } else {
            Direction::Bearish
        };
    }

    match candles.last() {
        Some(candle) if candle.close > candle.open => Direction::Bullish,
        Some(_) => Direction::Bearish,
        None => Direction::Neutral,
    }
}
