// src/position/store.rs
use crate::domain::errors::{StoreError, StoreResult};
use crate::domain::models::{Direction, Position, PositionStatus, CONTRACT_MULTIPLIER};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const HISTORY_CACHE_LIMIT: usize = 100;
const HOUR_MS: i64 = 3_600_000;

/// Abstract document store keyed by symbol. Implementations own the actual
/// database; the engine only needs CRUD plus the "all non-closed" query.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn put(&self, position: &Position) -> StoreResult<()>;

    async fn delete(&self, symbol: &str) -> StoreResult<()>;

    async fn append_history(&self, position: &Position) -> StoreResult<()>;

    async fn load_open(&self) -> StoreResult<Vec<Position>>;

    async fn load_history(&self, limit: usize) -> StoreResult<Vec<Position>>;
}

/// Document store held in process memory. Used by replay mode and tests;
/// documents round-trip through JSON the same way a real backend would.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    active: Mutex<HashMap<String, serde_json::Value>>,
    history: Mutex<Vec<serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn put(&self, position: &Position) -> StoreResult<()> {
        let doc = serde_json::to_value(position)?;
        self.active
            .lock()
            .expect("store poisoned")
            .insert(position.symbol.clone(), doc);
        Ok(())
    }

    async fn delete(&self, symbol: &str) -> StoreResult<()> {
        self.active.lock().expect("store poisoned").remove(symbol);
        Ok(())
    }

    async fn append_history(&self, position: &Position) -> StoreResult<()> {
        let doc = serde_json::to_value(position)?;
        self.history.lock().expect("store poisoned").push(doc);
        Ok(())
    }

    async fn load_open(&self) -> StoreResult<Vec<Position>> {
        let docs = self.active.lock().expect("store poisoned");
        let mut positions = Vec::with_capacity(docs.len());
        for doc in docs.values() {
            let position: Position = serde_json::from_value(doc.clone())?;
            if position.is_open() {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn load_history(&self, limit: usize) -> StoreResult<Vec<Position>> {
        let docs = self.history.lock().expect("store poisoned");
        let start = docs.len().saturating_sub(limit);
        docs[start..]
            .iter()
            .map(|doc| serde_json::from_value(doc.clone()).map_err(StoreError::from))
            .collect()
    }
}

/// Position persistence with an in-memory mirror. The backing store is the
/// source of truth: every mutation writes the store first and only then the
/// mirror, never the reverse.
pub struct PositionStore<S: PersistentStore> {
    backend: Arc<S>,
    active: HashMap<String, Position>,
    recent_history: Vec<Position>,
}

impl<S: PersistentStore> PositionStore<S> {
    pub fn new(backend: Arc<S>) -> Self {
        Self {
            backend,
            active: HashMap::new(),
            recent_history: Vec::new(),
        }
    }

    /// Load all non-closed positions into the mirror. Called once at
    /// startup, before reconciliation.
    pub async fn load(&mut self) -> StoreResult<usize> {
        let positions = self.backend.load_open().await?;
        self.active = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        log::info!("Loaded {} active position(s) from store", self.active.len());
        Ok(self.active.len())
    }

    /// Add a new position document, replacing any stale document under the
    /// same symbol.
    pub async fn add(&mut self, position: Position) -> StoreResult<()> {
        self.backend.put(&position).await?;
        log::info!(
            "Added position for {} ({} x{} @ {})",
            position.symbol,
            position.direction,
            position.quantity,
            position.entry_price
        );
        self.active.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Apply an update to an open position. Touches the audit timestamp on
    /// every call.
    pub async fn update<F>(&mut self, symbol: &str, now_ms: i64, apply: F) -> StoreResult<bool>
    where
        F: FnOnce(&mut Position),
    {
        let mut position = match self.active.get(symbol) {
            Some(position) => position.clone(),
            None => {
                log::warn!("Position for {} not found in store", symbol);
                return Ok(false);
            }
        };

        apply(&mut position);
        position.last_update_ms = now_ms;

        self.backend.put(&position).await?;
        self.active.insert(symbol.to_string(), position);
        Ok(true)
    }

    /// Close a position: remove the active document, append it to history.
    pub async fn close(
        &mut self,
        symbol: &str,
        now_ms: i64,
        exit_price: f64,
        exit_reason: &str,
        realized_pnl: Option<f64>,
    ) -> StoreResult<Option<Position>> {
        let mut position = match self.active.get(symbol) {
            Some(position) => position.clone(),
            None => {
                log::warn!("Cannot close {}: no active position", symbol);
                return Ok(None);
            }
        };

        let pnl = realized_pnl.unwrap_or_else(|| {
            let diff = match position.direction {
                Direction::Bullish => exit_price - position.entry_price,
                Direction::Bearish => position.entry_price - exit_price,
                Direction::Neutral => 0.0,
            };
            diff * position.quantity as f64 * CONTRACT_MULTIPLIER
        });
        position.status = PositionStatus::Closed;
        position.exit_time_ms = Some(now_ms);
        position.exit_price = Some(exit_price);
        position.exit_reason = Some(exit_reason.to_string());
        position.last_update_ms = now_ms;
        position.realized_pnl = Some(pnl);

        self.backend.delete(symbol).await?;
        self.backend.append_history(&position).await?;

        self.active.remove(symbol);
        self.recent_history.push(position.clone());
        if self.recent_history.len() > HISTORY_CACHE_LIMIT {
            let excess = self.recent_history.len() - HISTORY_CACHE_LIMIT;
            self.recent_history.drain(..excess);
        }

        log::info!(
            "Closed position for {} ({}): P&L {:.2}",
            symbol,
            exit_reason,
            position.realized_pnl.unwrap_or(0.0)
        );
        Ok(Some(position))
    }

    /// Force-close every position whose audit timestamp is older than the
    /// staleness window.
    pub async fn sweep_stale(
        &mut self,
        now_ms: i64,
        max_age_hours: i64,
    ) -> StoreResult<Vec<String>> {
        let cutoff = now_ms - max_age_hours * HOUR_MS;
        let stale: Vec<(String, f64)> = self
            .active
            .values()
            .filter(|p| p.last_update_ms < cutoff)
            .map(|p| (p.symbol.clone(), p.current_price))
            .collect();

        let mut closed = Vec::with_capacity(stale.len());
        for (symbol, price) in stale {
            log::warn!("Closing stale position for {}", symbol);
            self.close(&symbol, now_ms, price, "Stale position", None)
                .await?;
            closed.push(symbol);
        }
        Ok(closed)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.active.get(symbol)
    }

    pub fn open_symbols(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn all_open(&self) -> Vec<Position> {
        self.active.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.active.len()
    }

    pub fn recent_history(&self) -> &[Position] {
        &self.recent_history
    }

    /// JSON backup of the active book and recent history.
    pub fn export<P: AsRef<std::path::Path>>(&self, path: P, now_ms: i64) -> StoreResult<()> {
        let export = serde_json::json!({
            "export_time_ms": now_ms,
            "active_positions": self.active,
            "recent_history": self.recent_history,
        });
        let contents = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, contents)
            .map_err(|e| StoreError::Backend(format!("Failed to write backup: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PositionSource, TrailingMethod};

    fn position(symbol: &str, last_update_ms: i64) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Bullish,
            quantity: 1,
            entry_time_ms: last_update_ms,
            entry_price: 100.0,
            current_price: 100.0,
            stop_price: 99.0,
            trailing_method: TrailingMethod::Atr,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            source: PositionSource::Engine,
            last_update_ms,
            exit_time_ms: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
        }
    }

    #[tokio::test]
    async fn add_then_reload_round_trips() {
        let backend = Arc::new(InMemoryStore::new());
        let mut store = PositionStore::new(backend.clone());
        store.add(position("XYZ", 1_000)).await.unwrap();

        let mut reloaded = PositionStore::new(backend);
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(reloaded.get("XYZ").unwrap().entry_price, 100.0);
    }

    #[tokio::test]
    async fn update_touches_audit_timestamp() {
        let backend = Arc::new(InMemoryStore::new());
        let mut store = PositionStore::new(backend);
        store.add(position("XYZ", 1_000)).await.unwrap();

        let updated = store
            .update("XYZ", 5_000, |p| {
                p.current_price = 103.0;
                p.stop_price = 101.8;
            })
            .await
            .unwrap();
        assert!(updated);

        let position = store.get("XYZ").unwrap();
        assert_eq!(position.current_price, 103.0);
        assert_eq!(position.last_update_ms, 5_000);
    }

    #[tokio::test]
    async fn update_of_unknown_symbol_is_reported_not_fatal() {
        let backend = Arc::new(InMemoryStore::new());
        let mut store = PositionStore::new(backend);
        let updated = store.update("ZZZ", 1_000, |_| {}).await.unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn close_moves_position_to_history_with_pnl() {
        let backend = Arc::new(InMemoryStore::new());
        let mut store = PositionStore::new(backend.clone());
        store.add(position("XYZ", 1_000)).await.unwrap();

        let closed = store
            .close("XYZ", 10_000, 101.8, "Stop loss hit", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.exit_reason.as_deref(), Some("Stop loss hit"));
        let pnl = closed.realized_pnl.unwrap();
        assert!((pnl - 1.8 * CONTRACT_MULTIPLIER).abs() < 1e-9);

        assert_eq!(store.count(), 0);
        assert!(backend.load_open().await.unwrap().is_empty());
        assert_eq!(backend.load_history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_sweep_closes_old_positions_only() {
        let backend = Arc::new(InMemoryStore::new());
        let mut store = PositionStore::new(backend);
        store.add(position("OLD", 0)).await.unwrap();
        let day_later = 25 * HOUR_MS;
        store.add(position("FRESH", day_later)).await.unwrap();

        let closed = store.sweep_stale(day_later, 24).await.unwrap();
        assert_eq!(closed, vec!["OLD".to_string()]);
        assert_eq!(store.count(), 1);
        assert!(store.get("FRESH").is_some());
        assert_eq!(
            store.recent_history()[0].exit_reason.as_deref(),
            Some("Stale position")
        );
    }
}
