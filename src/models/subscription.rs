use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::market_data::MarketDataSink;

/// Stable identity of a downstream consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Instrument class of a subscribed symbol
///
/// Indices carry no traded volume, so the dispatcher fires last-trade callbacks
/// on price changes for them instead of on volume deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentKind {
    #[default]
    Equity,
    Future,
    OptionContract,
    Index,
}

impl InstrumentKind {
    pub fn is_index(&self) -> bool {
        matches!(self, InstrumentKind::Index)
    }
}

/// A consumer attached to a symbol
#[derive(Clone)]
pub struct Subscriber {
    pub sink: Arc<dyn MarketDataSink>,
    /// Opaque value echoed back in depth updates
    pub context: u64,
}

impl Subscriber {
    pub fn new(sink: Arc<dyn MarketDataSink>) -> Self {
        Self { sink, context: 0 }
    }

    pub fn with_context(sink: Arc<dyn MarketDataSink>, context: u64) -> Self {
        Self { sink, context }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("consumer_id", &self.sink.consumer_id())
            .field("context", &self.context)
            .finish()
    }
}

/// Everything the subscription manager knows about one canonical symbol
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRequest {
    pub kind: InstrumentKind,
    pub subscribers: Vec<Subscriber>,
}

impl SubscriptionRequest {
    pub fn new(kind: InstrumentKind) -> Self {
        Self {
            kind,
            subscribers: Vec::new(),
        }
    }

    pub fn with_subscriber(mut self, subscriber: Subscriber) -> Self {
        self.subscribers.push(subscriber);
        self
    }
}

/// Published per-symbol metadata inside a cache snapshot
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionInfo {
    pub symbol: String,
    pub kind: InstrumentKind,
    /// Callbacks actually resolved into the snapshot
    pub active_callbacks: usize,
    /// Subscribers skipped because their consumer was not initialized
    pub pending_callbacks: usize,
}
