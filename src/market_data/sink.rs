use thiserror::Error;

use crate::models::{ConsumerId, DepthUpdate, MarketDataEvent};

/// Failure reported by a consumer callback
///
/// Never propagated past the dispatcher: it is counted, logged at a limited
/// rate, and dispatch carries on with the next callback.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The consumer cannot accept data right now (closed, backlogged, ...)
    #[error("Consumer unavailable: {0}")]
    Unavailable(String),

    /// The consumer rejected the update itself
    #[error("Consumer rejected update: {0}")]
    Rejected(String),
}

/// Downstream market-data consumer
///
/// Each method corresponds to one data kind the dispatcher forwards. All have
/// no-op defaults so a consumer only implements what it cares about.
/// Callbacks run on the shard worker thread and should return quickly.
pub trait MarketDataSink: Send + Sync {
    fn consumer_id(&self) -> ConsumerId;

    /// Whether the consumer has finished initializing
    ///
    /// Subscriptions for consumers that are not ready are left out of the
    /// callback cache until they are.
    fn is_ready(&self) -> bool {
        true
    }

    fn on_last_trade(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_bid(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_ask(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        Ok(())
    }

    /// Daily volume, high, low, open, close and open interest
    fn on_daily_stat(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_depth(&self, _update: &DepthUpdate) -> Result<(), SinkError> {
        Ok(())
    }
}
