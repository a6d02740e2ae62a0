// src/trading/lifecycle.rs
use crate::analysis::snapshot::IndicatorSnapshot;
use crate::broker::{
    with_retry, BrokerGateway, OrderAction, OrderResponse, OrderSpec, OrderStatus,
};
use crate::config::Config;
use crate::domain::errors::{AppError, AppResult, BrokerError, BrokerResult};
use crate::domain::models::{
    BasketMember, Candle, CandleSeries, Direction, ExitReason, Position, Trade, TradeSignal,
    TradeState, TrailingStopState,
};
use crate::position::reconciler::{self, ReconcileSummary};
use crate::position::store::{PersistentStore, PositionStore};
use crate::trading::engine::SignalEngine;
use crate::trading::exits::ExitEvaluator;
use crate::trading::session::SessionSchedule;
use crate::trading::{compression, trailing};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// Orchestrates the signal cascade and the trade state machine per symbol.
///
/// Owns every trade record exclusively: all mutation goes through the
/// transition methods, and at most one non-closed trade exists per symbol at
/// any time. Both execution modes drive it the same way, one candle update
/// at a time.
pub struct TradeManager<B: BrokerGateway, S: PersistentStore> {
    config: Config,
    session: SessionSchedule,
    engine: SignalEngine,
    exits: ExitEvaluator,
    broker: Arc<B>,
    store: PositionStore<S>,
    active: HashMap<String, Trade>,
    closed: Vec<Trade>,
    trade_seq: u64,
}

impl<B: BrokerGateway, S: PersistentStore> TradeManager<B, S> {
    pub fn new(config: Config, broker: Arc<B>, store: PositionStore<S>) -> Self {
        let session = SessionSchedule::new(config.session.clone());
        Self {
            engine: SignalEngine::new(&config.strategy),
            exits: ExitEvaluator::new(config.strategy.clone(), session.clone()),
            session,
            config,
            broker,
            store,
            active: HashMap::new(),
            closed: Vec::new(),
            trade_seq: 0,
        }
    }

    pub fn active_trades(&self) -> &HashMap<String, Trade> {
        &self.active
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed
    }

    pub fn store(&self) -> &PositionStore<S> {
        &self.store
    }

    /// Process one candle update for a watchlist symbol. Manages the open
    /// trade if there is one; otherwise runs the entry cascade and returns
    /// the evaluated signal for auditing.
    pub async fn on_market_update(
        &mut self,
        series: &CandleSeries,
        members: &[BasketMember],
        now_ms: i64,
    ) -> AppResult<Option<TradeSignal>> {
        let symbol = series.symbol.clone();
        let candles = &series.candles;
        if candles.is_empty() {
            return Ok(None);
        }

        let snapshot = IndicatorSnapshot::compute(candles, &self.config.strategy);

        if let Some(state) = self.active.get(&symbol).map(|t| t.state) {
            if state == TradeState::Open {
                self.manage_open(&symbol, candles, &snapshot, now_ms).await?;
            } else {
                // PendingEntry: a second qualifying signal is ignored by
                // design, not an error
                log::debug!("Update for {} ignored while entry pending", symbol);
            }
            return Ok(None);
        }

        if !self.session.entry_allowed(now_ms) {
            log::debug!("Entries not allowed for {} at this time", symbol);
            return Ok(None);
        }

        let signal = self
            .engine
            .evaluate(&symbol, candles, &snapshot, members, now_ms);
        if signal.passed() {
            self.open_trade(&signal, candles, &snapshot, now_ms).await?;
        }
        Ok(Some(signal))
    }

    /// `Idle -> PendingEntry -> Open`. The symbol slot is reserved before
    /// any broker I/O so a racing signal cannot double-enter; a failed entry
    /// order releases the slot and is NOT retried (a missed entry is
    /// acceptable, a duplicate is not).
    async fn open_trade(
        &mut self,
        signal: &TradeSignal,
        candles: &[Candle],
        snapshot: &IndicatorSnapshot,
        now_ms: i64,
    ) -> AppResult<()> {
        let symbol = signal.symbol.clone();
        let direction = signal.direction;
        let quantity = self.config.strategy.contracts_per_trade;
        let method = self.config.strategy.trailing_method;

        self.trade_seq += 1;
        let mut trade = Trade::pending(
            format!("trade-{}", self.trade_seq),
            &symbol,
            direction,
            quantity,
            now_ms,
            method,
        );
        self.active.insert(symbol.clone(), trade.clone());

        let spec = OrderSpec::market(&symbol, OrderAction::BuyToOpen, quantity);
        let response = match self.submit_entry(&spec).await {
            Ok(response) => response,
            Err(BrokerError::AuthExpired) => {
                self.active.remove(&symbol);
                return Err(AppError::Broker(BrokerError::AuthExpired));
            }
            Err(e) => {
                log::error!("Entry order for {} failed: {} (entry skipped)", symbol, e);
                self.active.remove(&symbol);
                return Ok(());
            }
        };

        if !matches!(
            response.status,
            OrderStatus::Filled | OrderStatus::PartiallyFilled
        ) {
            log::error!(
                "Entry order for {} not filled (status {:?}), entry skipped",
                symbol,
                response.status
            );
            self.active.remove(&symbol);
            return Ok(());
        }

        // Fill price: broker-reported average, or the triggering candle's
        // close when the venue reports none (replay mode)
        let reference = candles.last().map(|c| c.close_f64()).unwrap_or_default();
        let fill_price = response
            .average_price
            .and_then(|p| p.to_f64())
            .unwrap_or(reference);

        let initial_stop = trailing::initial_stop(
            direction,
            candles,
            snapshot,
            fill_price,
            &self.config.strategy,
        );
        trade.entry_order_id = Some(response.order_id);
        trade.fill(
            now_ms,
            fill_price,
            TrailingStopState::new(method, initial_stop, fill_price),
        );

        // Protective stop at the broker, best-effort: a missing stop order
        // is a warning, the engine-side stop still guards the trade
        let stop_spec = OrderSpec::stop(
            &symbol,
            OrderAction::SellToClose,
            quantity,
            Decimal::from_f64_retain(initial_stop).unwrap_or_default(),
        );
        match self.broker.submit_order(&stop_spec).await {
            Ok(stop_response) => trade.stop_order_id = Some(stop_response.order_id),
            Err(e) => log::warn!("Failed to place stop order for {}: {}", symbol, e),
        }

        // Store first, then the in-memory trade map
        self.store.add(Position::from_trade(&trade, now_ms)).await?;
        log::info!(
            "Entered {} trade for {} x{} at {:.2} (stop {:.2}, {})",
            direction,
            symbol,
            quantity,
            fill_price,
            initial_stop,
            method
        );
        self.active.insert(symbol, trade);
        Ok(())
    }

    /// Entry submission: exactly one attempt, plus a single session refresh
    /// on an expired token. Any other failure surfaces to the caller.
    async fn submit_entry(&self, spec: &OrderSpec) -> BrokerResult<OrderResponse> {
        match self.broker.submit_order(spec).await {
            Err(BrokerError::AuthExpired) => {
                log::warn!("Broker session expired, attempting one refresh");
                self.broker.refresh_session().await?;
                self.broker.submit_order(spec).await
            }
            other => other,
        }
    }

    /// Per-tick management of an open trade: exits first (against the stop
    /// as it stood entering the tick), then the trailing ratchet.
    async fn manage_open(
        &mut self,
        symbol: &str,
        candles: &[Candle],
        snapshot: &IndicatorSnapshot,
        now_ms: i64,
    ) -> AppResult<()> {
        let compression = compression::detect(candles, snapshot, &self.config.strategy);

        let mut trade = match self.active.get(symbol) {
            Some(trade) => trade.clone(),
            None => return Ok(()),
        };

        if !compression.detected && !trade.compression_cleared {
            trade.compression_cleared = true;
        }

        if let Some(reason) = self
            .exits
            .evaluate(&trade, candles, snapshot, &compression, now_ms)
        {
            let exit_price = match reason {
                ExitReason::StopLoss => trade.stop.current_stop,
                _ => snapshot.close,
            };
            self.active.insert(symbol.to_string(), trade);
            return self.close_trade(symbol, exit_price, reason, now_ms).await;
        }

        trade.stop.update_watermark(snapshot.close, trade.direction);

        if let Some(candidate) = trailing::candidate_stop(
            trade.stop.method,
            trade.direction,
            candles,
            snapshot,
            &self.config.strategy,
        ) {
            let improves = {
                let mut probe = trade.stop;
                probe.tighten(candidate, trade.direction)
            };
            if improves {
                // Replace the broker stop first; a failed replacement keeps
                // the old stop and is logged, nothing else changes
                match self.replace_stop_order(&mut trade, candidate).await {
                    Ok(()) => {
                        trade.stop.tighten(candidate, trade.direction);
                        log::info!(
                            "Trailing stop for {} tightened to {:.2} ({})",
                            symbol,
                            candidate,
                            trade.stop.method
                        );
                    }
                    Err(e) => {
                        log::warn!(
                            "Stop replacement for {} failed: {} (keeping {:.2})",
                            symbol,
                            e,
                            trade.stop.current_stop
                        );
                    }
                }
            }
        }

        let current_price = snapshot.close;
        let stop_price = trade.stop.current_stop;
        let unrealized = trade.pnl_at(current_price);
        self.store
            .update(symbol, now_ms, |position| {
                position.current_price = current_price;
                position.stop_price = stop_price;
                position.unrealized_pnl = unrealized;
            })
            .await?;
        self.active.insert(symbol.to_string(), trade);
        Ok(())
    }

    async fn replace_stop_order(
        &self,
        trade: &mut Trade,
        new_stop: f64,
    ) -> BrokerResult<()> {
        if let Some(old_id) = trade.stop_order_id.clone() {
            with_retry(&self.config.broker, "cancel_order", || {
                self.broker.cancel_order(&old_id)
            })
            .await?;
        }

        let spec = OrderSpec::stop(
            &trade.symbol,
            OrderAction::SellToClose,
            trade.quantity,
            Decimal::from_f64_retain(new_stop).unwrap_or_default(),
        );
        let response = with_retry(&self.config.broker, "submit_stop", || {
            self.broker.submit_order(&spec)
        })
        .await?;
        trade.stop_order_id = Some(response.order_id);
        Ok(())
    }

    /// `Open -> Closed`. Cancels the protective stop and submits the closing
    /// order; broker failures are reported but never leave the trade open,
    /// since the next reconciliation resolves any divergence broker-side.
    async fn close_trade(
        &mut self,
        symbol: &str,
        exit_price: f64,
        reason: ExitReason,
        now_ms: i64,
    ) -> AppResult<()> {
        let mut trade = match self.active.remove(symbol) {
            Some(trade) => trade,
            None => return Ok(()),
        };

        if let Some(stop_id) = trade.stop_order_id.clone() {
            if let Err(e) = with_retry(&self.config.broker, "cancel_order", || {
                self.broker.cancel_order(&stop_id)
            })
            .await
            {
                log::warn!("Failed to cancel stop order {} for {}: {}", stop_id, symbol, e);
            }
        }

        let spec = OrderSpec::market(symbol, OrderAction::SellToClose, trade.quantity);
        if let Err(e) = with_retry(&self.config.broker, "submit_exit", || {
            self.broker.submit_order(&spec)
        })
        .await
        {
            log::error!("Exit order for {} failed: {}", symbol, e);
        }

        trade.close(now_ms, exit_price, reason);
        self.store
            .close(
                symbol,
                now_ms,
                exit_price,
                &reason.to_string(),
                trade.realized_pnl,
            )
            .await?;
        log::info!(
            "Exited trade for {} at {:.2}: {} (P&L {:.2})",
            symbol,
            exit_price,
            reason,
            trade.realized_pnl.unwrap_or(0.0)
        );
        self.closed.push(trade);
        Ok(())
    }

    /// Atomically force-close everything. Broker failures are reported per
    /// order and never block closing the remaining trades.
    pub async fn kill_switch(&mut self, now_ms: i64) -> AppResult<Vec<String>> {
        log::warn!(
            "Kill switch invoked: force-closing {} open trade(s)",
            self.active.len()
        );

        let mut symbols: Vec<String> = self.active.keys().cloned().collect();
        symbols.sort();

        for symbol in &symbols {
            let fallback = self
                .active
                .get(symbol)
                .map(|t| t.entry_price)
                .unwrap_or_default();
            let exit_price = match self.broker.quote(symbol).await {
                Ok(quote) => quote.to_f64().unwrap_or(fallback),
                Err(e) => {
                    log::warn!("No quote for {} during kill switch: {}", symbol, e);
                    self.store
                        .get(symbol)
                        .map(|p| p.current_price)
                        .unwrap_or(fallback)
                }
            };
            self.close_trade(symbol, exit_price, ExitReason::KillSwitch, now_ms)
                .await?;
        }
        Ok(symbols)
    }

    /// Periodic staleness sweep: force-close positions whose audit
    /// timestamp is outside the configured window, dropping any matching
    /// in-memory trade.
    pub async fn sweep_stale(&mut self, now_ms: i64) -> AppResult<Vec<String>> {
        let closed = self
            .store
            .sweep_stale(now_ms, self.config.strategy.stale_position_hours)
            .await?;
        for symbol in &closed {
            self.active.remove(symbol);
        }
        Ok(closed)
    }

    /// Startup recovery: load persisted positions, merge the broker's view
    /// (broker state wins), sweep stale leftovers, and rebuild the in-memory
    /// trade map. A broker failure here skips reconciliation but never
    /// blocks startup.
    pub async fn recover(&mut self, now_ms: i64) -> AppResult<ReconcileSummary> {
        self.store.load().await?;

        let summary = match with_retry(&self.config.broker, "positions", || {
            self.broker.positions()
        })
        .await
        {
            Ok(broker_positions) => {
                reconciler::reconcile(&mut self.store, &broker_positions, now_ms).await?
            }
            Err(e) => {
                log::error!(
                    "Could not fetch broker positions: {} (reconciliation skipped)",
                    e
                );
                ReconcileSummary::default()
            }
        };

        self.store
            .sweep_stale(now_ms, self.config.strategy.stale_position_hours)
            .await?;

        self.active.clear();
        for position in self.store.all_open() {
            self.trade_seq += 1;
            let mut trade = Trade::pending(
                format!("trade-{}", self.trade_seq),
                &position.symbol,
                position.direction,
                position.quantity,
                position.entry_time_ms,
                position.trailing_method,
            );
            trade.fill(
                position.entry_time_ms,
                position.entry_price,
                TrailingStopState::new(
                    position.trailing_method,
                    position.stop_price,
                    position.entry_price,
                ),
            );
            trade.stop.update_watermark(position.current_price, position.direction);
            self.active.insert(position.symbol.clone(), trade);
        }

        log::info!(
            "Recovery complete: {} active trade(s) restored",
            self.active.len()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::domain::models::{TradeState, TrailingMethod};
    use crate::position::store::InMemoryStore;
    use chrono::NaiveDate;

    fn ms_at(hour: u32, minute: u32) -> i64 {
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn manager() -> TradeManager<PaperBroker, InMemoryStore> {
        let mut config = Config::default();
        config.strategy.trailing_method = TrailingMethod::Atr;
        TradeManager::new(
            config,
            Arc::new(PaperBroker::new()),
            PositionStore::new(Arc::new(InMemoryStore::new())),
        )
    }

    fn members(status: Direction) -> Vec<BasketMember> {
        [("XLK", 32.0), ("XLF", 14.0), ("XLV", 11.0), ("XLY", 11.0)]
            .iter()
            .enumerate()
            .map(|(i, (symbol, weight))| BasketMember {
                symbol: symbol.to_string(),
                weight: Some(*weight),
                status: if i < 2 { status } else { Direction::Neutral },
            })
            .collect()
    }

    /// Coiled series ending in a bullish breakout at 10:00-ish timestamps.
    fn breakout_series() -> CandleSeries {
        let start = ms_at(9, 35);
        let mut series = CandleSeries::new("XYZ", "5m");
        for i in 0..20 {
            let wiggle = if i % 2 == 0 { 1.0 } else { -1.0 };
            series.push(Candle::new(
                "XYZ",
                "5m",
                start + i * 300_000,
                100.0 + wiggle,
                103.0,
                97.0,
                100.0 - wiggle,
                5_000.0,
            ));
        }
        for i in 20..39 {
            let wiggle = if i % 2 == 0 { 0.02 } else { -0.02 };
            let volume = if i >= 34 { 400.0 } else { 5_000.0 };
            series.push(Candle::new(
                "XYZ",
                "5m",
                start + i * 300_000,
                100.0,
                100.1,
                99.9,
                100.0 + wiggle,
                volume,
            ));
        }
        series.push(Candle::new(
            "XYZ",
            "5m",
            start + 39 * 300_000,
            100.0,
            101.2,
            100.0,
            101.1,
            900.0,
        ));
        series
    }

    #[tokio::test]
    async fn full_lifecycle_entry_trail_and_stop_exit() {
        let mut manager = manager();
        let mut series = breakout_series();
        let entry_ms = series.last().unwrap().timestamp_ms;

        // Entry: cascade passes, trade opens at the breakout close
        let signal = manager
            .on_market_update(&series, &members(Direction::Bullish), entry_ms)
            .await
            .unwrap()
            .expect("signal evaluated");
        assert!(signal.passed());

        let trade = manager.active_trades().get("XYZ").expect("trade open");
        assert_eq!(trade.state, TradeState::Open);
        assert!((trade.entry_price - 101.1).abs() < 1e-9);
        let initial_stop = trade.stop.current_stop;
        assert!(initial_stop < trade.entry_price);
        assert_eq!(manager.store().count(), 1);

        // Advance: price pushes higher, ATR trail ratchets up
        let tick2 = entry_ms + 300_000;
        series.push(Candle::new("XYZ", "5m", tick2, 102.6, 103.2, 102.4, 103.0, 50_000.0));
        manager
            .on_market_update(&series, &members(Direction::Bullish), tick2)
            .await
            .unwrap();
        let trade = manager.active_trades().get("XYZ").expect("still open");
        let trailed_stop = trade.stop.current_stop;
        assert!(
            trailed_stop > initial_stop,
            "stop should ratchet up: {} -> {}",
            initial_stop,
            trailed_stop
        );

        // Drop through the stop: the trade closes at the stop price with a
        // profit, and the stop-touch reason wins
        let tick3 = tick2 + 300_000;
        series.push(Candle::new("XYZ", "5m", tick3, 102.8, 102.9, 101.0, 101.5, 8_000.0));
        manager
            .on_market_update(&series, &members(Direction::Bullish), tick3)
            .await
            .unwrap();

        assert!(manager.active_trades().is_empty());
        let closed = &manager.closed_trades()[0];
        assert_eq!(closed.state, TradeState::Closed);
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        assert_eq!(closed.exit_price, Some(trailed_stop));
        assert!(closed.realized_pnl.unwrap() > 0.0);
        assert_eq!(manager.store().count(), 0);
        assert_eq!(
            manager.store().recent_history()[0].exit_reason.as_deref(),
            Some("Stop loss hit")
        );
    }

    #[tokio::test]
    async fn at_most_one_open_trade_per_symbol() {
        let mut manager = manager();
        let mut series = breakout_series();
        let now = series.last().unwrap().timestamp_ms;

        manager
            .on_market_update(&series, &members(Direction::Bullish), now)
            .await
            .unwrap();
        assert_eq!(manager.active_trades().len(), 1);
        let first_id = manager.active_trades()["XYZ"].id.clone();

        // While a trade is open the cascade never runs again for the
        // symbol: this tick only manages the open trade
        let tick2 = now + 300_000;
        series.push(Candle::new("XYZ", "5m", tick2, 101.2, 101.9, 101.0, 101.8, 6_000.0));
        let signal = manager
            .on_market_update(&series, &members(Direction::Bullish), tick2)
            .await
            .unwrap();
        assert!(signal.is_none());
        assert_eq!(manager.active_trades().len(), 1);
        assert_eq!(manager.active_trades()["XYZ"].id, first_id);
    }

    #[tokio::test]
    async fn entries_blocked_outside_trade_window() {
        let mut manager = manager();
        let series = breakout_series();

        // 15:50 is inside the auto-close window
        let result = manager
            .on_market_update(&series, &members(Direction::Bullish), ms_at(15, 50))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(manager.active_trades().is_empty());
    }

    #[tokio::test]
    async fn kill_switch_force_closes_everything() {
        let mut manager = manager();
        let series = breakout_series();
        let now = series.last().unwrap().timestamp_ms;

        manager
            .on_market_update(&series, &members(Direction::Bullish), now)
            .await
            .unwrap();
        assert_eq!(manager.active_trades().len(), 1);

        let closed = manager.kill_switch(now + 60_000).await.unwrap();
        assert_eq!(closed, vec!["XYZ".to_string()]);
        assert!(manager.active_trades().is_empty());
        assert_eq!(
            manager.closed_trades()[0].exit_reason,
            Some(ExitReason::KillSwitch)
        );
        assert_eq!(manager.store().count(), 0);
    }

    #[tokio::test]
    async fn recovery_rebuilds_trades_from_store() {
        let backend = Arc::new(InMemoryStore::new());
        let broker = Arc::new(PaperBroker::new());

        // First manager opens a trade, then is dropped (crash)
        {
            let mut config = Config::default();
            config.strategy.trailing_method = TrailingMethod::Atr;
            let mut manager =
                TradeManager::new(config, broker.clone(), PositionStore::new(backend.clone()));
            let series = breakout_series();
            let now = series.last().unwrap().timestamp_ms;
            manager
                .on_market_update(&series, &members(Direction::Bullish), now)
                .await
                .unwrap();
            assert_eq!(manager.active_trades().len(), 1);
        }

        // A new manager recovers from the same backend. The paper broker
        // reports no positions, so broker-state-wins closes the orphan.
        let mut recovered = TradeManager::new(
            Config::default(),
            broker,
            PositionStore::new(backend.clone()),
        );
        let now = ms_at(13, 0);
        let summary = recovered.recover(now).await.unwrap();
        assert_eq!(summary.force_closed, vec!["XYZ".to_string()]);
        assert!(recovered.active_trades().is_empty());
        assert_eq!(backend.load_history(10).await.unwrap().len(), 1);
    }
}
