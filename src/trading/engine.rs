// src/trading/engine.rs
use crate::analysis::heiken_ashi;
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::config::{BasketMode, StrategyConfig};
use crate::domain::models::{
    AlignmentResult, BasketMember, Candle, CompressionResult, SkipReason, TradeSignal,
};
use crate::trading::{alignment::AlignmentDetector, compression, confirmation};

/// The cascading signal pipeline. One evaluation per candle; the cascade
/// short-circuits at the first failing stage and records the stage that
/// rejected it. Both the live driver and the backtest replay call this with
/// the candle prefix visible at the tick, so the two modes cannot diverge.
#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: StrategyConfig,
    alignment: AlignmentDetector,
}

impl SignalEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        let threshold = match config.basket_mode {
            BasketMode::Sector => config.alignment_threshold,
            BasketMode::MegaCap => config.megacap_threshold,
        };
        Self {
            config: config.clone(),
            alignment: AlignmentDetector::new(config.basket_mode, threshold),
        }
    }

    pub fn evaluate(
        &self,
        symbol: &str,
        candles: &[Candle],
        snapshot: &IndicatorSnapshot,
        members: &[BasketMember],
        timestamp_ms: i64,
    ) -> TradeSignal {
        let mut signal = TradeSignal {
            symbol: symbol.to_string(),
            direction: crate::domain::models::Direction::Neutral,
            timestamp_ms,
            alignment: AlignmentResult::none(),
            compression: CompressionResult::none(),
            momentum_ok: false,
            trend_ok: false,
            entry_ok: false,
            skip_reason: None,
        };

        // 1. Basket alignment
        signal.alignment = self.alignment.evaluate(members);
        if !signal.alignment.aligned {
            signal.skip_reason = Some(SkipReason::NoAlignment);
            return signal;
        }
        let direction = signal.alignment.direction;
        signal.direction = direction;

        // 2. Compression, in the same direction as the basket
        signal.compression = compression::detect(candles, snapshot, &self.config);
        if !signal.compression.detected {
            signal.skip_reason = Some(SkipReason::NoCompression);
            return signal;
        }
        if signal.compression.direction != direction {
            signal.skip_reason = Some(SkipReason::DirectionMismatch);
            return signal;
        }

        // 3. Momentum
        signal.momentum_ok = confirmation::momentum_confirmed(snapshot, direction, &self.config);
        if !signal.momentum_ok {
            signal.skip_reason = Some(SkipReason::MomentumNotAligned);
            return signal;
        }

        // 3b. Trend
        signal.trend_ok = confirmation::trend_confirmed(snapshot, direction);
        if !signal.trend_ok {
            signal.skip_reason = Some(SkipReason::TrendNotAligned);
            return signal;
        }

        if !confirmation::trend_strength_confirmed(snapshot, &self.config) {
            signal.skip_reason = Some(SkipReason::WeakTrend);
            return signal;
        }

        // 4. Heiken-Ashi entry trigger, which must agree with the basket
        let trigger = heiken_ashi::entry_trigger(candles, self.config.ha_wick_tolerance);
        signal.entry_ok = trigger == Some(direction);
        if !signal.entry_ok {
            signal.skip_reason = Some(SkipReason::NoEntryTrigger);
            return signal;
        }

        log::info!(
            "Trade signal for {}: {} (alignment {:.1}%, compression {}/3, stoch/trend confirmed)",
            symbol,
            direction,
            signal.alignment.score,
            signal.compression.signal_count
        );

        signal
    }
}
