// src/analysis/indicators.rs
use crate::domain::errors::{AnalysisError, AnalysisResult};

/// Bollinger width reported when the middle band is zero and the ratio is
/// undefined.
pub const DEFAULT_BB_WIDTH: f64 = 0.05;

/// Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> AnalysisResult<Vec<f64>> {
    if period == 0 || prices.len() < period {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for SMA calculation. Need at least {} points, got {}",
            period,
            prices.len()
        )));
    }

    let mut result = Vec::with_capacity(prices.len() - period + 1);
    let mut sum = prices.iter().take(period).sum::<f64>();

    result.push(sum / period as f64);

    for i in period..prices.len() {
        sum = sum - prices[i - period] + prices[i];
        result.push(sum / period as f64);
    }

    Ok(result)
}

/// Exponential Moving Average (EMA)
pub fn calculate_ema(prices: &[f64], period: usize) -> AnalysisResult<Vec<f64>> {
    if period == 0 || prices.len() < period {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for EMA calculation. Need at least {} points, got {}",
            period,
            prices.len()
        )));
    }

    let multiplier = 2.0 / (period + 1) as f64;
    let mut result = Vec::with_capacity(prices.len() - period + 1);

    // First EMA value is SMA
    let first_sma = prices.iter().take(period).sum::<f64>() / period as f64;
    result.push(first_sma);

    for i in period..prices.len() {
        let previous_ema = result[result.len() - 1];
        let new_ema = (prices[i] - previous_ema) * multiplier + previous_ema;
        result.push(new_ema);
    }

    Ok(result)
}

/// Latest EMA value, for callers that only care about the current reading.
pub fn latest_ema(prices: &[f64], period: usize) -> AnalysisResult<f64> {
    let ema = calculate_ema(prices, period)?;
    ema.last().copied().ok_or_else(|| {
        AnalysisError::IndicatorCalculation("EMA produced no values".to_string())
    })
}

/// Volume Weighted Average Price over the whole series (session-cumulative).
/// Falls back to a 20-period mean of the typical price when no volume is
/// reported.
pub fn calculate_vwap(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    volumes: &[f64],
) -> AnalysisResult<f64> {
    let n = closes.len().min(highs.len()).min(lows.len());
    if n == 0 {
        return Err(AnalysisError::InsufficientData(
            "No candles for VWAP calculation".to_string(),
        ));
    }

    let typical: Vec<f64> = (0..n)
        .map(|i| (highs[i] + lows[i] + closes[i]) / 3.0)
        .collect();

    let total_volume: f64 = volumes.iter().take(n).sum();
    if total_volume > 0.0 {
        let weighted: f64 = typical
            .iter()
            .zip(volumes.iter())
            .map(|(tp, v)| tp * v)
            .sum();
        return Ok(weighted / total_volume);
    }

    // No volume data, use a 20-period mean of the typical price instead
    if n < 20 {
        return Err(AnalysisError::InsufficientData(format!(
            "No volume and only {} candles for VWAP fallback",
            n
        )));
    }
    let window = &typical[n - 20..];
    Ok(window.iter().sum::<f64>() / window.len() as f64)
}

/// Bollinger band width `(upper - lower) / middle` over the trailing window.
/// A zero middle band would divide by zero; the documented default width is
/// returned instead.
pub fn calculate_bollinger_width(
    prices: &[f64],
    period: usize,
    std_dev_multiplier: f64,
) -> AnalysisResult<f64> {
    if period < 2 || prices.len() < period {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for Bollinger width. Need at least {} points, got {}",
            period,
            prices.len()
        )));
    }

    let window = &prices[prices.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;

    // Sample standard deviation over the window
    let variance = window
        .iter()
        .map(|&x| (x - middle).powi(2))
        .sum::<f64>()
        / (period - 1) as f64;
    let std_dev = variance.sqrt();

    if middle == 0.0 || !middle.is_finite() {
        return Ok(DEFAULT_BB_WIDTH);
    }

    Ok((2.0 * std_dev_multiplier * std_dev) / middle)
}

/// Stochastic oscillator: raw %K over `k_period`, smoothed by `smooth`,
/// %D = SMA of smoothed %K over `d_period`. A flat high/low range reads as
/// 50 rather than dividing by zero.
pub fn calculate_stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    k_period: usize,
    smooth: usize,
    d_period: usize,
) -> AnalysisResult<(f64, f64)> {
    let n = closes.len().min(highs.len()).min(lows.len());
    let needed = k_period + smooth + d_period - 2;
    if k_period == 0 || smooth == 0 || d_period == 0 || n < needed {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for stochastic calculation. Need at least {} points, got {}",
            needed, n
        )));
    }

    // Raw %K for every index with a complete lookback window
    let mut raw_k = Vec::with_capacity(n - k_period + 1);
    for i in (k_period - 1)..n {
        let window = (i + 1 - k_period)..=i;
        let hh = highs[window.clone()].iter().cloned().fold(f64::MIN, f64::max);
        let ll = lows[window].iter().cloned().fold(f64::MAX, f64::min);
        if (hh - ll).abs() < f64::EPSILON {
            raw_k.push(50.0);
        } else {
            raw_k.push(100.0 * (closes[i] - ll) / (hh - ll));
        }
    }

    let k_series = calculate_sma(&raw_k, smooth)?;
    let d_series = calculate_sma(&k_series, d_period)?;

    let k = *k_series.last().expect("k series is non-empty");
    let d = *d_series.last().expect("d series is non-empty");
    Ok((k, d))
}

/// Average True Range over the trailing window (simple mean of true range).
pub fn calculate_atr(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
) -> AnalysisResult<f64> {
    let n = closes.len().min(highs.len()).min(lows.len());
    if period == 0 || n < period + 1 {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for ATR calculation. Need at least {} points, got {}",
            period + 1,
            n
        )));
    }

    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let tr1 = highs[i] - lows[i];
        let tr2 = (highs[i] - closes[i - 1]).abs();
        let tr3 = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(tr1.max(tr2).max(tr3));
    }

    let window = &true_ranges[true_ranges.len() - period..];
    Ok(window.iter().sum::<f64>() / period as f64)
}

/// Donchian channel (highest high, lowest low) over the trailing window.
pub fn calculate_donchian(
    highs: &[f64],
    lows: &[f64],
    window: usize,
) -> AnalysisResult<(f64, f64)> {
    let n = highs.len().min(lows.len());
    if window == 0 || n < window {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for Donchian channel. Need at least {} points, got {}",
            window, n
        )));
    }

    let upper = highs[n - window..]
        .iter()
        .cloned()
        .fold(f64::MIN, f64::max);
    let lower = lows[n - window..].iter().cloned().fold(f64::MAX, f64::min);
    Ok((upper, lower))
}

/// Average Directional Index with Wilder smoothing (alpha = 1/period).
pub fn calculate_adx(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
) -> AnalysisResult<f64> {
    let n = closes.len().min(highs.len()).min(lows.len());
    if period == 0 || n < period * 2 {
        return Err(AnalysisError::InsufficientData(format!(
            "Not enough data for ADX calculation. Need at least {} points, got {}",
            period * 2,
            n
        )));
    }

    let alpha = 1.0 / period as f64;
    let wilder = |series: &[f64]| -> f64 {
        let mut smoothed = series[0];
        for &x in &series[1..] {
            smoothed = alpha * x + (1.0 - alpha) * smoothed;
        }
        smoothed
    };

    let mut tr = Vec::with_capacity(n - 1);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);
    let mut dx = Vec::with_capacity(n - 1);

    for i in 1..n {
        let tr1 = highs[i] - lows[i];
        let tr2 = (highs[i] - closes[i - 1]).abs();
        let tr3 = (lows[i] - closes[i - 1]).abs();
        tr.push(tr1.max(tr2).max(tr3));

        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    // Running Wilder averages to build the DX series
    let mut tr_s = tr[0];
    let mut plus_s = plus_dm[0];
    let mut minus_s = minus_dm[0];
    for i in 1..tr.len() {
        tr_s = alpha * tr[i] + (1.0 - alpha) * tr_s;
        plus_s = alpha * plus_dm[i] + (1.0 - alpha) * plus_s;
        minus_s = alpha * minus_dm[i] + (1.0 - alpha) * minus_s;

        if tr_s <= 0.0 {
            dx.push(0.0);
            continue;
        }
        let plus_di = 100.0 * plus_s / tr_s;
        let minus_di = 100.0 * minus_s / tr_s;
        let di_sum = plus_di + minus_di;
        dx.push(if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        });
    }

    if dx.is_empty() {
        return Err(AnalysisError::IndicatorCalculation(
            "ADX produced no directional values".to_string(),
        ));
    }

    Ok(wilder(&dx))
}
