// src/broker/mod.rs
use crate::config::BrokerConfig;
use crate::domain::errors::{BrokerError, BrokerResult};
use crate::domain::models::Direction;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Order action against an options position. Entries are always opening
/// buys (calls for bullish, puts for bearish); exits close the same leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    BuyToOpen,
    SellToClose,
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderAction::BuyToOpen => "Buy to Open",
            OrderAction::SellToClose => "Sell to Close",
        }
    }
}

#[derive(Debug, Clone)]
pub enum OrderType {
    Market,
    Stop(Decimal),
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Stop(price) => write!(f, "STOP {}", price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    Day,
    GoodTillCanceled,
}

/// An order as handed to the gateway.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub action: OrderAction,
    pub order_type: OrderType,
    pub quantity: u32,
    pub time_in_force: TimeInForce,
}

impl OrderSpec {
    pub fn market(symbol: &str, action: OrderAction, quantity: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            order_type: OrderType::Market,
            quantity,
            time_in_force: TimeInForce::Day,
        }
    }

    pub fn stop(symbol: &str, action: OrderAction, quantity: u32, trigger: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            action,
            order_type: OrderType::Stop(trigger),
            quantity,
            time_in_force: TimeInForce::GoodTillCanceled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Filled,
    PartiallyFilled,
    Canceled,
    Rejected,
    Pending,
}

#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: u32,
    /// Average fill price; `None` when the venue reports the fill without a
    /// price (the caller then falls back to its own reference price).
    pub average_price: Option<Decimal>,
    pub timestamp_ms: i64,
}

/// A position as the broker reports it during reconciliation.
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: u32,
    pub average_price: f64,
    pub current_price: Option<f64>,
    pub opened_at_ms: Option<i64>,
}

/// Abstract broker connectivity. Implementations own transport, signing and
/// rate limiting; the engine only sees this surface.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn submit_order(&self, spec: &OrderSpec) -> BrokerResult<OrderResponse>;

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool>;

    async fn positions(&self) -> BrokerResult<Vec<BrokerPosition>>;

    async fn quote(&self, symbol: &str) -> BrokerResult<Decimal>;

    /// One-shot session refresh after an `AuthExpired`. Failing here is
    /// fatal for order flow.
    async fn refresh_session(&self) -> BrokerResult<()>;
}

/// Bounded retry with exponential backoff for retryable broker failures.
/// Each attempt runs under the configured timeout. Entry orders must NOT go
/// through this helper: a missed entry is acceptable, a duplicate is not.
pub async fn with_retry<T, F, Fut>(
    config: &BrokerConfig,
    op_name: &str,
    mut op: F,
) -> BrokerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrokerResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        let call = tokio::time::timeout(Duration::from_millis(config.call_timeout_ms), op());
        let result = match call.await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(config.call_timeout_ms)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = config.retry_base_delay_ms.saturating_mul(1 << attempt);
                log::warn!(
                    "{} failed ({}), retry {}/{} in {}ms",
                    op_name,
                    e,
                    attempt + 1,
                    config.max_retries,
                    delay
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!("{} failed after {} attempt(s): {}", op_name, attempt + 1, e);
                return Err(e);
            }
        }
    }
}

/// Instant-fill gateway used for replay and paper trading. Market orders
/// fill in full immediately; the fill price is left to the caller's
/// reference price, which in replay is the triggering candle's close.
#[derive(Debug, Default)]
pub struct PaperBroker {
    order_seq: AtomicU64,
    quotes: Mutex<std::collections::HashMap<String, Decimal>>,
    canceled: Mutex<Vec<String>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, symbol: &str, price: Decimal) {
        self.quotes
            .lock()
            .expect("quote map poisoned")
            .insert(symbol.to_string(), price);
    }

    pub fn canceled_orders(&self) -> Vec<String> {
        self.canceled.lock().expect("cancel log poisoned").clone()
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn submit_order(&self, spec: &OrderSpec) -> BrokerResult<OrderResponse> {
        let id = self.order_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderResponse {
            order_id: format!("paper-{}", id),
            status: OrderStatus::Filled,
            filled_quantity: spec.quantity,
            average_price: None,
            timestamp_ms: 0,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> BrokerResult<bool> {
        self.canceled
            .lock()
            .expect("cancel log poisoned")
            .push(order_id.to_string());
        Ok(true)
    }

    async fn positions(&self) -> BrokerResult<Vec<BrokerPosition>> {
        Ok(Vec::new())
    }

    async fn quote(&self, symbol: &str) -> BrokerResult<Decimal> {
        self.quotes
            .lock()
            .expect("quote map poisoned")
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::Transport(format!("No quote for {}", symbol)))
    }

    async fn refresh_session(&self) -> BrokerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let config = BrokerConfig {
            call_timeout_ms: 1_000,
            max_retries: 3,
            retry_base_delay_ms: 1,
        };
        let attempts = AtomicU32::new(0);

        let result = with_retry(&config, "positions", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BrokerError::Transport("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let config = BrokerConfig {
            call_timeout_ms: 1_000,
            max_retries: 2,
            retry_base_delay_ms: 1,
        };
        let attempts = AtomicU32::new(0);

        let result: BrokerResult<u32> = with_retry(&config, "positions", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BrokerError::RateLimited("slow down".into())) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus two retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_never_retried() {
        let config = BrokerConfig::default();
        let attempts = AtomicU32::new(0);

        let result: BrokerResult<u32> = with_retry(&config, "submit", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BrokerError::Rejected("no buying power".into())) }
        })
        .await;

        assert!(matches!(result, Err(BrokerError::Rejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paper_broker_fills_market_orders() {
        let broker = PaperBroker::new();
        let response = broker
            .submit_order(&OrderSpec::market("XYZ", OrderAction::BuyToOpen, 2))
            .await
            .unwrap();
        assert_eq!(response.status, OrderStatus::Filled);
        assert_eq!(response.filled_quantity, 2);
        assert!(response.average_price.is_none());

        assert!(broker.cancel_order(&response.order_id).await.unwrap());
        assert_eq!(broker.canceled_orders(), vec![response.order_id]);
    }
}
