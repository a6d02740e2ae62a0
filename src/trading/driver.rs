// src/trading/driver.rs
use crate::broker::BrokerGateway;
use crate::config::{BasketMode, Config, StrategyConfig};
use crate::domain::errors::AppResult;
use crate::domain::models::{BasketMember, CandleSeries, Direction, Quote};
use crate::market_data::MarketEvent;
use crate::position::store::PersistentStore;
use crate::trading::alignment;
use crate::trading::lifecycle::TradeManager;
use crate::trading::session::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How often the stale-position sweep runs.
const SWEEP_INTERVAL_SECS: u64 = 3_600;

/// All mutable market state owned by the evaluation loop: candle history for
/// the watchlist and the basket, plus live quote-derived basket statuses.
pub struct MarketState {
    timeframe: String,
    watch: HashMap<String, CandleSeries>,
    basket: HashMap<String, CandleSeries>,
    quote_prices: HashMap<String, f64>,
    quote_status: HashMap<String, Direction>,
}

impl MarketState {
    pub fn new(config: &StrategyConfig) -> Self {
        let timeframe = config.timeframe.clone();
        let watch = config
            .tickers
            .iter()
            .map(|s| (s.clone(), CandleSeries::new(s, &timeframe)))
            .collect();

        let basket_symbols: Vec<String> = match config.basket_mode {
            BasketMode::Sector => config.sector_weights.keys().cloned().collect(),
            BasketMode::MegaCap => config.megacap_symbols.clone(),
        };
        let basket = basket_symbols
            .into_iter()
            .map(|s| {
                let series = CandleSeries::new(&s, &timeframe);
                (s, series)
            })
            .collect();

        Self {
            timeframe,
            watch,
            basket,
            quote_prices: HashMap::new(),
            quote_status: HashMap::new(),
        }
    }

    pub fn is_watch_symbol(&self, symbol: &str) -> bool {
        self.watch.contains_key(symbol)
    }

    pub fn is_basket_symbol(&self, symbol: &str) -> bool {
        self.basket.contains_key(symbol)
    }

    pub fn watch_series(&self, symbol: &str) -> Option<&CandleSeries> {
        self.watch.get(symbol)
    }

    /// Append a candle to whichever series owns the symbol. Returns whether
    /// the candle was accepted (in order, known symbol, right timeframe).
    pub fn apply_candle(&mut self, candle: crate::domain::models::Candle) -> bool {
        if candle.timeframe != self.timeframe {
            return false;
        }
        if let Some(series) = self.watch.get_mut(&candle.symbol) {
            return series.push(candle);
        }
        if let Some(series) = self.basket.get_mut(&candle.symbol) {
            return series.push(candle);
        }
        false
    }

    /// Update a basket member's live status from a quote tick.
    pub fn apply_quote(&mut self, quote: &Quote, config: &StrategyConfig) {
        let price = match quote.mid() {
            Some(price) => price,
            None => return,
        };
        if !self.is_basket_symbol(&quote.symbol) {
            return;
        }

        if let Some(&prev) = self.quote_prices.get(&quote.symbol) {
            let status =
                alignment::classify_from_quote(prev, price, config.quote_change_delta_pct);
            self.quote_status.insert(quote.symbol.clone(), status);
        }
        self.quote_prices.insert(quote.symbol.clone(), price);
    }

    /// Current basket vote. Candle-derived classification wins; the live
    /// quote status fills in for members whose candle history is still
    /// short. Members with neither are excluded, not counted as neutral.
    pub fn basket_members(&self, config: &StrategyConfig) -> Vec<BasketMember> {
        let mut members = Vec::new();
        for (symbol, series) in &self.basket {
            let weight = match config.basket_mode {
                BasketMode::Sector => Some(*config.sector_weights.get(symbol).unwrap_or(&0.0)),
                BasketMode::MegaCap => None,
            };

            let status = alignment::classify_member(&series.closes(), config.member_delta)
                .or_else(|| self.quote_status.get(symbol).copied());

            if let Some(status) = status {
                members.push(BasketMember {
                    symbol: symbol.clone(),
                    weight,
                    status,
                });
            }
        }
        members
    }
}

/// Live execution loop. All state mutation happens on this single task: the
/// subscription callbacks only enqueue events into the bounded channel, so
/// no lock protects the basket map or the active-trade map.
pub struct LiveDriver<B: BrokerGateway, S: PersistentStore> {
    config: Config,
    manager: TradeManager<B, S>,
    state: MarketState,
    events: mpsc::Receiver<MarketEvent>,
    clock: Arc<dyn Clock>,
}

impl<B: BrokerGateway, S: PersistentStore> LiveDriver<B, S> {
    pub fn new(
        config: Config,
        manager: TradeManager<B, S>,
        events: mpsc::Receiver<MarketEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = MarketState::new(&config.strategy);
        Self {
            config,
            manager,
            state,
            events,
            clock,
        }
    }

    /// Bounded event channel feeding the evaluation loop.
    pub fn channel(capacity: usize) -> (mpsc::Sender<MarketEvent>, mpsc::Receiver<MarketEvent>) {
        mpsc::channel(capacity)
    }

    /// Recover persisted state, then consume events until the stream ends or
    /// ctrl-c trips the kill switch.
    pub async fn run(&mut self) -> AppResult<()> {
        self.manager.recover(self.clock.now_ms()).await?;

        let mut sweep = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        sweep.tick().await; // first tick completes immediately

        loop {
            tokio::select! {
                maybe_event = self.events.recv() => {
                    match maybe_event {
                        Some(event) => self.handle(event).await?,
                        None => {
                            log::info!("Market data stream ended");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.manager.sweep_stale(self.clock.now_ms()).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("Ctrl-c received, tripping kill switch");
                    self.manager.kill_switch(self.clock.now_ms()).await?;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle(&mut self, event: MarketEvent) -> AppResult<()> {
        let now_ms = self.clock.now_ms();
        match event {
            MarketEvent::Candle(candle) => {
                let symbol = candle.symbol.clone();
                if !self.state.apply_candle(candle) {
                    log::debug!("Dropped out-of-order or unknown candle for {}", symbol);
                    return Ok(());
                }
                if self.state.is_watch_symbol(&symbol) {
                    let members = self.state.basket_members(&self.config.strategy);
                    if let Some(series) = self.state.watch_series(&symbol) {
                        if let Some(signal) = self
                            .manager
                            .on_market_update(series, &members, now_ms)
                            .await?
                        {
                            if let Some(reason) = signal.skip_reason {
                                log::debug!("{}: no setup ({})", symbol, reason);
                            }
                        }
                    }
                }
            }
            MarketEvent::Quote(quote) => {
                self.state.apply_quote(&quote, &self.config.strategy);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Candle;
    use rust_decimal::Decimal;

    fn config() -> StrategyConfig {
        StrategyConfig::default()
    }

    fn quote(symbol: &str, price: f64, ts: i64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid: Decimal::from_f64_retain(price - 0.01),
            ask: Decimal::from_f64_retain(price + 0.01),
            last: None,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn routes_candles_to_watch_and_basket() {
        let config = config();
        let mut state = MarketState::new(&config);

        assert!(state.apply_candle(Candle::new("SPY", "5m", 1_000, 1.0, 2.0, 0.5, 1.5, 10.0)));
        assert!(state.apply_candle(Candle::new("XLK", "5m", 1_000, 1.0, 2.0, 0.5, 1.5, 10.0)));
        assert!(!state.apply_candle(Candle::new("ZZZ", "5m", 1_000, 1.0, 2.0, 0.5, 1.5, 10.0)));
        // Wrong timeframe is dropped
        assert!(!state.apply_candle(Candle::new("SPY", "1m", 2_000, 1.0, 2.0, 0.5, 1.5, 10.0)));

        assert_eq!(state.watch_series("SPY").unwrap().len(), 1);
    }

    #[test]
    fn quote_status_fills_in_for_short_candle_history() {
        let config = config();
        let mut state = MarketState::new(&config);

        // No candle history anywhere: no members vote yet
        assert!(state.basket_members(&config).is_empty());

        // Two quote ticks establish a bullish status for XLK
        state.apply_quote(&quote("XLK", 100.0, 1_000), &config);
        state.apply_quote(&quote("XLK", 100.5, 2_000), &config);

        let members = state.basket_members(&config);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].symbol, "XLK");
        assert_eq!(members[0].status, Direction::Bullish);
        assert_eq!(members[0].weight, Some(32.0));
    }

    #[test]
    fn candle_classification_wins_over_quotes() {
        let config = config();
        let mut state = MarketState::new(&config);

        // Quotes say bullish
        state.apply_quote(&quote("XLK", 100.0, 500), &config);
        state.apply_quote(&quote("XLK", 101.0, 600), &config);

        // Candle history says bearish: six closes, last one below the band
        for (i, close) in [100.0, 100.0, 100.0, 100.0, 100.0, 99.0].iter().enumerate() {
            state.apply_candle(Candle::new(
                "XLK",
                "5m",
                (i as i64 + 1) * 1_000,
                *close,
                *close + 0.1,
                *close - 0.1,
                *close,
                10.0,
            ));
        }

        let members = state.basket_members(&config);
        let xlk = members.iter().find(|m| m.symbol == "XLK").unwrap();
        assert_eq!(xlk.status, Direction::Bearish);
    }
}
