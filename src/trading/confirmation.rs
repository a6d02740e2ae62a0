// src/trading/confirmation.rs
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::config::StrategyConfig;
use crate::domain::models::Direction;

/// Stochastic momentum gate: bullish setups need %K above the bullish
/// threshold, bearish setups need %K below the bearish threshold. A missing
/// reading fails closed.
pub fn momentum_confirmed(
    snapshot: &IndicatorSnapshot,
    direction: Direction,
    config: &StrategyConfig,
) -> bool {
    let k = match snapshot.stoch_k {
        Some(k) => k,
        None => return false,
    };

    match direction {
        Direction::Bullish => k > config.stoch_bullish_threshold,
        Direction::Bearish => k < config.stoch_bearish_threshold,
        Direction::Neutral => false,
    }
}

/// Trend gate: the close must sit strictly on the trade's side of both VWAP
/// and the trend EMA. Either indicator missing fails closed.
pub fn trend_confirmed(snapshot: &IndicatorSnapshot, direction: Direction) -> bool {
    let (vwap, ema) = match (snapshot.vwap, snapshot.ema) {
        (Some(vwap), Some(ema)) => (vwap, ema),
        _ => return false,
    };
    let close = snapshot.close;

    match direction {
        Direction::Bullish => close > vwap && close > ema,
        Direction::Bearish => close < vwap && close < ema,
        Direction::Neutral => false,
    }
}

/// Optional ADX trend-strength filter. Disabled filter always passes; an
/// enabled filter with no ADX reading fails closed.
pub fn trend_strength_confirmed(snapshot: &IndicatorSnapshot, config: &StrategyConfig) -> bool {
    if !config.adx_filter {
        return true;
    }
    match snapshot.adx {
        Some(adx) => adx >= config.adx_minimum,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(close: f64, k: Option<f64>, vwap: Option<f64>, ema: Option<f64>) -> IndicatorSnapshot {
        IndicatorSnapshot {
            close,
            stoch_k: k,
            vwap,
            ema,
            ..IndicatorSnapshot::default()
        }
    }

    #[test]
    fn bullish_momentum_needs_k_above_threshold() {
        let config = StrategyConfig::default();
        let snap = snapshot(101.0, Some(35.0), None, None);
        assert!(momentum_confirmed(&snap, Direction::Bullish, &config));

        let snap = snapshot(101.0, Some(15.0), None, None);
        assert!(!momentum_confirmed(&snap, Direction::Bullish, &config));
    }

    #[test]
    fn bearish_momentum_needs_k_below_threshold() {
        let config = StrategyConfig::default();
        let snap = snapshot(101.0, Some(70.0), None, None);
        assert!(momentum_confirmed(&snap, Direction::Bearish, &config));

        let snap = snapshot(101.0, Some(90.0), None, None);
        assert!(!momentum_confirmed(&snap, Direction::Bearish, &config));
    }

    #[test]
    fn missing_stochastic_fails_closed() {
        let config = StrategyConfig::default();
        let snap = snapshot(101.0, None, None, None);
        assert!(!momentum_confirmed(&snap, Direction::Bullish, &config));
    }

    #[test]
    fn trend_requires_both_vwap_and_ema() {
        let snap = snapshot(101.0, None, Some(100.2), Some(100.1));
        assert!(trend_confirmed(&snap, Direction::Bullish));
        assert!(!trend_confirmed(&snap, Direction::Bearish));

        // Close above only one of the two is not a confirmed trend
        let snap = snapshot(100.15, None, Some(100.2), Some(100.1));
        assert!(!trend_confirmed(&snap, Direction::Bullish));

        // Missing VWAP fails closed even with a clean EMA reading
        let snap = snapshot(101.0, None, None, Some(100.1));
        assert!(!trend_confirmed(&snap, Direction::Bullish));
    }

    #[test]
    fn adx_filter_gates_only_when_enabled() {
        let mut config = StrategyConfig::default();
        let weak = IndicatorSnapshot {
            adx: Some(12.0),
            ..IndicatorSnapshot::default()
        };
        assert!(trend_strength_confirmed(&weak, &config));

        config.adx_filter = true;
        assert!(!trend_strength_confirmed(&weak, &config));

        let strong = IndicatorSnapshot {
            adx: Some(27.0),
            ..IndicatorSnapshot::default()
        };
        assert!(trend_strength_confirmed(&strong, &config));

        let missing = IndicatorSnapshot::default();
        assert!(!trend_strength_confirmed(&missing, &config));
    }
}
