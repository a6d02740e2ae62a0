// src/position/reconciler.rs
use crate::broker::BrokerPosition;
use crate::domain::errors::StoreResult;
use crate::domain::models::{
    Direction, ExitReason, Position, PositionSource, PositionStatus, TrailingMethod,
};
use crate::position::store::{PersistentStore, PositionStore};
use std::collections::HashSet;

/// Protective stop distance applied to positions adopted from the broker,
/// which carry no engine-managed stop of their own.
const ADOPTED_STOP_FRACTION: f64 = 0.01;

#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub updated: Vec<String>,
    pub adopted: Vec<String>,
    pub force_closed: Vec<String>,
}

/// Merge the broker's position snapshot into the store. Broker state wins:
/// a persisted symbol the broker doesn't know is force-closed, and a broker
/// symbol the store doesn't know is adopted as an externally-opened
/// position. Running the same snapshot through twice converges to the same
/// state.
pub async fn reconcile<S: PersistentStore>(
    store: &mut PositionStore<S>,
    broker_positions: &[BrokerPosition],
    now_ms: i64,
) -> StoreResult<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let mut broker_symbols = HashSet::new();

    for broker_pos in broker_positions {
        broker_symbols.insert(broker_pos.symbol.clone());

        if store.get(&broker_pos.symbol).is_some() {
            let quantity = broker_pos.quantity;
            let current = broker_pos.current_price;
            store
                .update(&broker_pos.symbol, now_ms, |position| {
                    position.quantity = quantity;
                    if let Some(price) = current {
                        position.current_price = price;
                    }
                })
                .await?;
            summary.updated.push(broker_pos.symbol.clone());
        } else {
            log::warn!(
                "Adopting externally-opened position for {} from broker",
                broker_pos.symbol
            );
            store.add(adopt(broker_pos, now_ms)).await?;
            summary.adopted.push(broker_pos.symbol.clone());
        }
    }

    for symbol in store.open_symbols() {
        if !broker_symbols.contains(&symbol) {
            log::warn!("Position {} not found at broker, force-closing", symbol);
            let exit_price = store.get(&symbol).map(|p| p.current_price).unwrap_or(0.0);
            store
                .close(
                    &symbol,
                    now_ms,
                    exit_price,
                    &ExitReason::NotFoundAtBroker.to_string(),
                    None,
                )
                .await?;
            summary.force_closed.push(symbol);
        }
    }

    log::info!(
        "Reconciliation complete: {} updated, {} adopted, {} force-closed",
        summary.updated.len(),
        summary.adopted.len(),
        summary.force_closed.len()
    );
    Ok(summary)
}

fn adopt(broker_pos: &BrokerPosition, now_ms: i64) -> Position {
    let entry_price = broker_pos.average_price;
    let stop_price = match broker_pos.direction {
        Direction::Bullish => entry_price * (1.0 - ADOPTED_STOP_FRACTION),
        _ => entry_price * (1.0 + ADOPTED_STOP_FRACTION),
    };

    Position {
        symbol: broker_pos.symbol.clone(),
        direction: broker_pos.direction,
        quantity: broker_pos.quantity,
        entry_time_ms: broker_pos.opened_at_ms.unwrap_or(now_ms),
        entry_price,
        current_price: broker_pos.current_price.unwrap_or(entry_price),
        stop_price,
        trailing_method: TrailingMethod::Percent,
        unrealized_pnl: 0.0,
        status: PositionStatus::Open,
        source: PositionSource::BrokerSync,
        last_update_ms: now_ms,
        exit_time_ms: None,
        exit_price: None,
        exit_reason: None,
        realized_pnl: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::store::InMemoryStore;
    use std::sync::Arc;

    fn engine_position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Bullish,
            quantity: 1,
            entry_time_ms: 0,
            entry_price: 100.0,
            current_price: 100.0,
            stop_price: 99.0,
            trailing_method: TrailingMethod::Atr,
            unrealized_pnl: 0.0,
            status: PositionStatus::Open,
            source: PositionSource::Engine,
            last_update_ms: 0,
            exit_time_ms: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
        }
    }

    fn broker_position(symbol: &str, quantity: u32) -> BrokerPosition {
        BrokerPosition {
            symbol: symbol.to_string(),
            direction: Direction::Bullish,
            quantity,
            average_price: 100.0,
            current_price: Some(101.0),
            opened_at_ms: Some(500),
        }
    }

    #[tokio::test]
    async fn missing_at_broker_is_force_closed() {
        let mut store = PositionStore::new(Arc::new(InMemoryStore::new()));
        store.add(engine_position("XYZ")).await.unwrap();
        store.add(engine_position("ABC")).await.unwrap();

        let summary = reconcile(&mut store, &[broker_position("XYZ", 1)], 1_000)
            .await
            .unwrap();

        assert_eq!(summary.force_closed, vec!["ABC".to_string()]);
        assert_eq!(summary.updated, vec!["XYZ".to_string()]);
        assert!(store.get("ABC").is_none());
        assert_eq!(
            store.recent_history()[0].exit_reason.as_deref(),
            Some("Not found at broker")
        );
    }

    #[tokio::test]
    async fn unknown_broker_symbol_is_adopted() {
        let mut store = PositionStore::new(Arc::new(InMemoryStore::new()));

        let summary = reconcile(&mut store, &[broker_position("NEW", 2)], 1_000)
            .await
            .unwrap();

        assert_eq!(summary.adopted, vec!["NEW".to_string()]);
        let adopted = store.get("NEW").unwrap();
        assert_eq!(adopted.source, PositionSource::BrokerSync);
        assert_eq!(adopted.quantity, 2);
        assert_eq!(adopted.entry_time_ms, 500);
        assert!(adopted.stop_price < adopted.entry_price);
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let mut store = PositionStore::new(Arc::new(InMemoryStore::new()));
        store.add(engine_position("KEEP")).await.unwrap();
        store.add(engine_position("DROP")).await.unwrap();
        let snapshot = vec![broker_position("KEEP", 1), broker_position("NEW", 3)];

        reconcile(&mut store, &snapshot, 1_000).await.unwrap();
        let first_pass: Vec<String> = {
            let mut symbols = store.open_symbols();
            symbols.sort();
            symbols
        };

        let summary = reconcile(&mut store, &snapshot, 2_000).await.unwrap();
        let second_pass: Vec<String> = {
            let mut symbols = store.open_symbols();
            symbols.sort();
            symbols
        };

        assert_eq!(first_pass, second_pass);
        assert_eq!(first_pass, vec!["KEEP".to_string(), "NEW".to_string()]);
        // Second pass has nothing left to adopt or close
        assert!(summary.adopted.is_empty());
        assert!(summary.force_closed.is_empty());
    }
}
