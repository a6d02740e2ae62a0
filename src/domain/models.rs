// src/domain/models.rs
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Options contract multiplier applied when converting a per-share price
/// move into realized dollars.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Directional bias shared by every stage of the signal cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
            Direction::Neutral => Direction::Neutral,
        }
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Direction::Neutral)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
            Direction::Neutral => write!(f, "neutral"),
        }
    }
}

/// Market Data Structures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        timeframe: &str,
        timestamp_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            timestamp_ms,
            open: Decimal::from_f64_retain(open).unwrap_or_default(),
            high: Decimal::from_f64_retain(high).unwrap_or_default(),
            low: Decimal::from_f64_retain(low).unwrap_or_default(),
            close: Decimal::from_f64_retain(close).unwrap_or_default(),
            volume: Decimal::from_f64_retain(volume).unwrap_or_default(),
        }
    }

    pub fn open_f64(&self) -> f64 {
        self.open.to_f64().unwrap_or_default()
    }

    pub fn high_f64(&self) -> f64 {
        self.high.to_f64().unwrap_or_default()
    }

    pub fn low_f64(&self) -> f64 {
        self.low.to_f64().unwrap_or_default()
    }

    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or_default()
    }

    pub fn volume_f64(&self) -> f64 {
        self.volume.to_f64().unwrap_or_default()
    }

    /// Candle body direction, the last resort for compression direction
    /// resolution.
    pub fn body_direction(&self) -> Direction {
        if self.close > self.open {
            Direction::Bullish
        } else if self.close < self.open {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }
}

/// Append-only candle history for one (symbol, timeframe) pair.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    pub symbol: String,
    pub timeframe: String,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            candles: Vec::new(),
        }
    }

    pub fn from_candles(symbol: &str, timeframe: &str, candles: Vec<Candle>) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            candles,
        }
    }

    /// Append a candle, preserving timestamp order. Out-of-order candles are
    /// dropped and reported to the caller.
    pub fn push(&mut self, candle: Candle) -> bool {
        if let Some(last) = self.candles.last() {
            if candle.timestamp_ms <= last.timestamp_ms {
                return false;
            }
        }
        self.candles.push(candle);
        true
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close_f64()).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.high_f64()).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.low_f64()).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.volume_f64()).collect()
    }
}

/// Live quote snapshot; mid price falls back to whichever side is present.
#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub timestamp_ms: i64,
}

impl Quote {
    pub fn mid(&self) -> Option<f64> {
        let bid = self.bid.and_then(|b| b.to_f64()).filter(|b| *b > 0.0);
        let ask = self.ask.and_then(|a| a.to_f64()).filter(|a| *a > 0.0);
        match (bid, ask) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            (Some(b), None) => Some(b),
            (None, Some(a)) => Some(a),
            (None, None) => self.last.and_then(|l| l.to_f64()).filter(|l| *l > 0.0),
        }
    }
}

/// One voting member of the reference basket (sector ETF or mega-cap stock).
#[derive(Debug, Clone)]
pub struct BasketMember {
    pub symbol: String,
    /// Index weight in percent; only meaningful in sector mode.
    pub weight: Option<f64>,
    pub status: Direction,
}

/// Directional consensus across the basket.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlignmentResult {
    pub aligned: bool,
    pub direction: Direction,
    /// Combined weight percent (sector mode) or aligned-count percent
    /// (mega-cap mode).
    pub score: f64,
}

impl AlignmentResult {
    pub fn none() -> Self {
        Self {
            aligned: false,
            direction: Direction::Neutral,
            score: 0.0,
        }
    }

    pub fn none_with_score(score: f64) -> Self {
        Self {
            aligned: false,
            direction: Direction::Neutral,
            score,
        }
    }
}

/// Volatility-contraction quorum result.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CompressionResult {
    pub detected: bool,
    pub direction: Direction,
    /// How many of the three contraction signals fired, 0..=3.
    pub signal_count: u8,
}

impl CompressionResult {
    pub fn none() -> Self {
        Self {
            detected: false,
            direction: Direction::Neutral,
            signal_count: 0,
        }
    }
}

/// The first cascade stage that rejected a candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Warmup,
    SessionClosed,
    NoAlignment,
    NoCompression,
    DirectionMismatch,
    MomentumNotAligned,
    TrendNotAligned,
    WeakTrend,
    NoEntryTrigger,
    AlreadyInTrade,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::Warmup => write!(f, "Warmup period"),
            SkipReason::SessionClosed => write!(f, "Outside trading window"),
            SkipReason::NoAlignment => write!(f, "No basket alignment"),
            SkipReason::NoCompression => write!(f, "No compression"),
            SkipReason::DirectionMismatch => write!(f, "Compression direction mismatch"),
            SkipReason::MomentumNotAligned => write!(f, "Momentum not aligned"),
            SkipReason::TrendNotAligned => write!(f, "Trend not aligned"),
            SkipReason::WeakTrend => write!(f, "ADX below minimum"),
            SkipReason::NoEntryTrigger => write!(f, "No entry trigger"),
            SkipReason::AlreadyInTrade => write!(f, "Trade already active"),
        }
    }
}

/// Full audit record of one cascade evaluation. Produced once per evaluated
/// candle; the cascade short-circuits at the first failing stage.
#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub timestamp_ms: i64,
    pub alignment: AlignmentResult,
    pub compression: CompressionResult,
    pub momentum_ok: bool,
    pub trend_ok: bool,
    pub entry_ok: bool,
    pub skip_reason: Option<SkipReason>,
}

impl TradeSignal {
    pub fn passed(&self) -> bool {
        self.skip_reason.is_none() && self.entry_ok
    }
}

/// Trade lifecycle states. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    Idle,
    PendingEntry,
    Open,
    Closed,
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TradeState::Idle => write!(f, "Idle"),
            TradeState::PendingEntry => write!(f, "PendingEntry"),
            TradeState::Open => write!(f, "Open"),
            TradeState::Closed => write!(f, "Closed"),
        }
    }
}

/// Why an open trade was closed. Display strings are stable: they end up in
/// persisted positions and the backtest trade table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    StopLoss,
    HeikenAshiReversal,
    StochasticReversal,
    VwapEmaCross,
    CompressionReentry,
    Failsafe,
    AutoClose,
    KillSwitch,
    NotFoundAtBroker,
    StalePosition,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop loss hit"),
            ExitReason::HeikenAshiReversal => write!(f, "Heiken Ashi reversal"),
            ExitReason::StochasticReversal => write!(f, "Stochastic reversal against position"),
            ExitReason::VwapEmaCross => write!(f, "Price crossed VWAP and EMA"),
            ExitReason::CompressionReentry => write!(f, "Re-entered compression zone"),
            ExitReason::Failsafe => write!(f, "Failsafe time exit"),
            ExitReason::AutoClose => write!(f, "Auto-close before session close"),
            ExitReason::KillSwitch => write!(f, "Kill switch"),
            ExitReason::NotFoundAtBroker => write!(f, "Not found at broker"),
            ExitReason::StalePosition => write!(f, "Stale position"),
            ExitReason::EndOfData => write!(f, "End of data"),
        }
    }
}

/// The five interchangeable trailing-stop algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingMethod {
    HeikenAshi,
    Ema,
    Percent,
    Atr,
    FixedPoints,
}

impl TrailingMethod {
    pub const ALL: [TrailingMethod; 5] = [
        TrailingMethod::HeikenAshi,
        TrailingMethod::Ema,
        TrailingMethod::Percent,
        TrailingMethod::Atr,
        TrailingMethod::FixedPoints,
    ];
}

impl fmt::Display for TrailingMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrailingMethod::HeikenAshi => write!(f, "Heiken Ashi candle trail"),
            TrailingMethod::Ema => write!(f, "EMA trail"),
            TrailingMethod::Percent => write!(f, "Percent price trail"),
            TrailingMethod::Atr => write!(f, "ATR trail"),
            TrailingMethod::FixedPoints => write!(f, "Fixed point trail"),
        }
    }
}

/// Stop level owned by a trade. `tighten` is the only mutator, which makes
/// the ratchet invariant structural: a bullish stop never moves down, a
/// bearish stop never moves up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrailingStopState {
    pub method: TrailingMethod,
    pub current_stop: f64,
    /// High-water mark for bullish trades, low-water mark for bearish.
    pub watermark: f64,
}

impl TrailingStopState {
    pub fn new(method: TrailingMethod, initial_stop: f64, entry_price: f64) -> Self {
        Self {
            method,
            current_stop: initial_stop,
            watermark: entry_price,
        }
    }

    /// Accept the candidate only if it tightens the stop in the trade's
    /// favor. Returns whether the stop moved.
    pub fn tighten(&mut self, candidate: f64, direction: Direction) -> bool {
        let improves = match direction {
            Direction::Bullish => candidate > self.current_stop,
            Direction::Bearish => candidate < self.current_stop,
            Direction::Neutral => false,
        };
        if improves {
            self.current_stop = candidate;
        }
        improves
    }

    pub fn update_watermark(&mut self, price: f64, direction: Direction) {
        match direction {
            Direction::Bullish => {
                if price > self.watermark {
                    self.watermark = price;
                }
            }
            Direction::Bearish => {
                if price < self.watermark {
                    self.watermark = price;
                }
            }
            Direction::Neutral => {}
        }
    }
}

/// The lifecycle entity. Owned exclusively by the trade manager and mutated
/// only through the transition methods below.
#[derive(Debug, Clone)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub state: TradeState,
    pub entry_time_ms: i64,
    pub entry_price: f64,
    pub quantity: u32,
    pub stop: TrailingStopState,
    pub entry_order_id: Option<String>,
    pub stop_order_id: Option<String>,
    /// Set once a tick shows no compression after entry; only then does a
    /// new compression zone count as "fresh" for the exit evaluator.
    pub compression_cleared: bool,
    pub exit_time_ms: Option<i64>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<f64>,
}

impl Trade {
    pub fn pending(
        id: String,
        symbol: &str,
        direction: Direction,
        quantity: u32,
        signal_time_ms: i64,
        method: TrailingMethod,
    ) -> Self {
        Self {
            id,
            symbol: symbol.to_string(),
            direction,
            state: TradeState::PendingEntry,
            entry_time_ms: signal_time_ms,
            entry_price: 0.0,
            quantity,
            stop: TrailingStopState::new(method, 0.0, 0.0),
            entry_order_id: None,
            stop_order_id: None,
            compression_cleared: false,
            exit_time_ms: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
        }
    }

    /// `PendingEntry -> Open` on a confirmed fill.
    pub fn fill(&mut self, entry_time_ms: i64, entry_price: f64, stop: TrailingStopState) {
        self.state = TradeState::Open;
        self.entry_time_ms = entry_time_ms;
        self.entry_price = entry_price;
        self.stop = stop;
        self.stop.watermark = entry_price;
    }

    /// `Open -> Closed`. Terminal.
    pub fn close(&mut self, exit_time_ms: i64, exit_price: f64, reason: ExitReason) {
        self.state = TradeState::Closed;
        self.exit_time_ms = Some(exit_time_ms);
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.realized_pnl = Some(self.pnl_at(exit_price));
    }

    pub fn is_open(&self) -> bool {
        self.state == TradeState::Open
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TradeState::PendingEntry | TradeState::Open)
    }

    /// Signed dollar P&L at the given underlying price.
    pub fn pnl_at(&self, price: f64) -> f64 {
        let diff = match self.direction {
            Direction::Bullish => price - self.entry_price,
            Direction::Bearish => self.entry_price - price,
            Direction::Neutral => 0.0,
        };
        diff * self.quantity as f64 * CONTRACT_MULTIPLIER
    }

    /// Signed percent move in the trade's favor since entry.
    pub fn profit_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        let diff = match self.direction {
            Direction::Bullish => price - self.entry_price,
            Direction::Bearish => self.entry_price - price,
            Direction::Neutral => 0.0,
        };
        diff / self.entry_price * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    Engine,
    BrokerSync,
}

/// Persisted projection of a trade, keyed by symbol. At most one active
/// position per symbol may exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: u32,
    pub entry_time_ms: i64,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_price: f64,
    pub trailing_method: TrailingMethod,
    pub unrealized_pnl: f64,
    pub status: PositionStatus,
    pub source: PositionSource,
    pub last_update_ms: i64,
    pub exit_time_ms: Option<i64>,
    pub exit_price: Option<f64>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<f64>,
}

impl Position {
    pub fn from_trade(trade: &Trade, now_ms: i64) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            direction: trade.direction,
            quantity: trade.quantity,
            entry_time_ms: trade.entry_time_ms,
            entry_price: trade.entry_price,
            current_price: trade.entry_price,
            stop_price: trade.stop.current_stop,
            trailing_method: trade.stop.method,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            source: PositionSource::Engine,
            last_update_ms: now_ms,
            exit_time_ms: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_stop_ratchets_up_for_bullish() {
        let mut stop = TrailingStopState::new(TrailingMethod::Atr, 99.8, 101.0);
        assert!(stop.tighten(101.8, Direction::Bullish));
        assert_eq!(stop.current_stop, 101.8);
        // Loosening candidate is rejected
        assert!(!stop.tighten(100.0, Direction::Bullish));
        assert_eq!(stop.current_stop, 101.8);
    }

    #[test]
    fn trailing_stop_ratchets_down_for_bearish() {
        let mut stop = TrailingStopState::new(TrailingMethod::Percent, 102.0, 100.0);
        assert!(stop.tighten(101.0, Direction::Bearish));
        assert!(!stop.tighten(103.0, Direction::Bearish));
        assert_eq!(stop.current_stop, 101.0);
    }

    #[test]
    fn trade_close_computes_signed_pnl() {
        let mut trade = Trade::pending(
            "trade-1".into(),
            "XYZ",
            Direction::Bullish,
            1,
            0,
            TrailingMethod::Atr,
        );
        trade.fill(0, 101.0, TrailingStopState::new(TrailingMethod::Atr, 99.8, 101.0));
        trade.close(60_000, 101.8, ExitReason::StopLoss);
        assert_eq!(trade.state, TradeState::Closed);
        let pnl = trade.realized_pnl.unwrap();
        assert!((pnl - 0.8 * CONTRACT_MULTIPLIER).abs() < 1e-9);
    }

    #[test]
    fn bearish_trade_profits_from_falling_price() {
        let mut trade = Trade::pending(
            "trade-2".into(),
            "XYZ",
            Direction::Bearish,
            2,
            0,
            TrailingMethod::Percent,
        );
        trade.fill(0, 50.0, TrailingStopState::new(TrailingMethod::Percent, 50.75, 50.0));
        trade.close(60_000, 49.0, ExitReason::VwapEmaCross);
        let pnl = trade.realized_pnl.unwrap();
        assert!((pnl - 1.0 * 2.0 * CONTRACT_MULTIPLIER).abs() < 1e-9);
    }

    #[test]
    fn series_rejects_out_of_order_candles() {
        let mut series = CandleSeries::new("XYZ", "5m");
        assert!(series.push(Candle::new("XYZ", "5m", 1_000, 1.0, 2.0, 0.5, 1.5, 10.0)));
        assert!(!series.push(Candle::new("XYZ", "5m", 1_000, 1.0, 2.0, 0.5, 1.5, 10.0)));
        assert!(series.push(Candle::new("XYZ", "5m", 2_000, 1.5, 2.5, 1.0, 2.0, 12.0)));
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn quote_mid_prefers_two_sided_market() {
        use rust_decimal_macros::dec;

        let quote = Quote {
            symbol: "XYZ".into(),
            bid: Some(dec!(100.00)),
            ask: Some(dec!(102.00)),
            last: None,
            timestamp_ms: 0,
        };
        assert_eq!(quote.mid(), Some(101.0));

        let one_sided = Quote {
            symbol: "XYZ".into(),
            bid: Some(dec!(99.50)),
            ask: None,
            last: None,
            timestamp_ms: 0,
        };
        assert_eq!(one_sided.mid(), Some(99.5));
    }
}
