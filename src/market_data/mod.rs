// src/market_data/mod.rs
use crate::domain::errors::DataResult;
use crate::domain::models::{Candle, Quote};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// One update from a market-data subscription.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Candle(Candle),
    Quote(Quote),
}

/// Handle returned by `subscribe`; dropping it leaves the stream running,
/// calling `cancel` tears it down.
pub struct SubscriptionHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl SubscriptionHandle {
    pub fn new(cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Abstract market-data connectivity. Implementations own streaming
/// transport and historical-fetch chunking; the engine consumes candles and
/// quotes through the event channel.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Historical candles for one symbol/timeframe over a closed interval.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> DataResult<Vec<Candle>>;

    /// Stream live updates for the given symbols into the channel.
    async fn subscribe(
        &self,
        symbols: &[String],
        events: mpsc::Sender<MarketEvent>,
    ) -> DataResult<SubscriptionHandle>;
}
