// src/analysis/snapshot.rs
use crate::analysis::indicators;
use crate::config::StrategyConfig;
use crate::domain::models::Candle;

/// Every indicator reading the cascade and the exit evaluator consult on a
/// single tick. Fields are `None` when the history is too short to produce a
/// value; consumers fail closed on missing readings.
///
/// Both execution modes build this from the candle prefix visible at the
/// tick, which is what keeps live and replay decisions identical.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSnapshot {
    pub close: f64,
    pub vwap: Option<f64>,
    /// Trend EMA (`ema_period`)
    pub ema: Option<f64>,
    /// EMA used by the EMA trailing stop (`ema_trail_period`)
    pub ema_trail: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub stoch_k_prev: Option<f64>,
    pub stoch_d_prev: Option<f64>,
    pub atr: Option<f64>,
    pub bb_width: Option<f64>,
    pub adx: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn compute(candles: &[Candle], config: &StrategyConfig) -> Self {
        if candles.is_empty() {
            return Self::default();
        }

        let highs: Vec<f64> = candles.iter().map(|c| c.high_f64()).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low_f64()).collect();
        let closes: Vec<f64> = candles.iter().map(|c| c.close_f64()).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume_f64()).collect();

        let stoch = indicators::calculate_stochastic(
            &highs,
            &lows,
            &closes,
            config.stoch_k_period,
            config.stoch_smooth,
            config.stoch_d_period,
        )
        .ok();

        let n = closes.len();
        let stoch_prev = if n > 1 {
            indicators::calculate_stochastic(
                &highs[..n - 1],
                &lows[..n - 1],
                &closes[..n - 1],
                config.stoch_k_period,
                config.stoch_smooth,
                config.stoch_d_period,
            )
            .ok()
        } else {
            None
        };

        Self {
            close: closes[n - 1],
            vwap: indicators::calculate_vwap(&highs, &lows, &closes, &volumes).ok(),
            ema: indicators::latest_ema(&closes, config.ema_period).ok(),
            ema_trail: indicators::latest_ema(&closes, config.ema_trail_period).ok(),
            stoch_k: stoch.map(|(k, _)| k),
            stoch_d: stoch.map(|(_, d)| d),
            stoch_k_prev: stoch_prev.map(|(k, _)| k),
            stoch_d_prev: stoch_prev.map(|(_, d)| d),
            atr: indicators::calculate_atr(&highs, &lows, &closes, config.atr_period).ok(),
            bb_width: indicators::calculate_bollinger_width(
                &closes,
                config.compression_window,
                2.0,
            )
            .ok(),
            adx: if config.adx_filter {
                indicators::calculate_adx(&highs, &lows, &closes, config.adx_period).ok()
            } else {
                None
            },
        }
    }
}
