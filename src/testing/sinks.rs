//! Ready-made consumers for tests, benchmarks and the demo binary

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::market_data::{MarketDataSink, SinkError};
use crate::models::{ConsumerId, DataKind, DepthUpdate, MarketDataEvent};

/// Records everything it receives, in arrival order
pub struct RecordingSink {
    id: ConsumerId,
    ready: AtomicBool,
    events: Mutex<Vec<MarketDataEvent>>,
    depth: Mutex<Vec<DepthUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConsumerId::new(),
            ready: AtomicBool::new(true),
            events: Mutex::new(Vec::new()),
            depth: Mutex::new(Vec::new()),
        })
    }

    /// A sink that reports itself as still initializing
    pub fn not_ready() -> Arc<Self> {
        let sink = Self::new();
        sink.set_ready(false);
        sink
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<MarketDataEvent> {
        self.events.lock().clone()
    }

    pub fn events_of(&self, kind: DataKind) -> Vec<MarketDataEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .copied()
            .collect()
    }

    /// `(price, size)` of every last-trade event
    pub fn last_trades(&self) -> Vec<(f64, u64)> {
        self.events_of(DataKind::LastTrade)
            .into_iter()
            .map(|e| (e.price, e.size))
            .collect()
    }

    pub fn depth_updates(&self) -> Vec<DepthUpdate> {
        self.depth.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.depth.lock().clear();
    }

    fn record(&self, event: &MarketDataEvent) -> Result<(), SinkError> {
        self.events.lock().push(*event);
        Ok(())
    }
}

impl MarketDataSink for RecordingSink {
    fn consumer_id(&self) -> ConsumerId {
        self.id
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn on_last_trade(&self, event: &MarketDataEvent) -> Result<(), SinkError> {
        self.record(event)
    }

    fn on_bid(&self, event: &MarketDataEvent) -> Result<(), SinkError> {
        self.record(event)
    }

    fn on_ask(&self, event: &MarketDataEvent) -> Result<(), SinkError> {
        self.record(event)
    }

    fn on_daily_stat(&self, event: &MarketDataEvent) -> Result<(), SinkError> {
        self.record(event)
    }

    fn on_depth(&self, update: &DepthUpdate) -> Result<(), SinkError> {
        self.depth.lock().push(*update);
        Ok(())
    }
}

/// How a `FailingSink` misbehaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    ReturnError,
    Panic,
}

/// Fails every callback, either with `Err` or by panicking
pub struct FailingSink {
    id: ConsumerId,
    mode: FailureMode,
    calls: AtomicU64,
}

impl FailingSink {
    pub fn new(mode: FailureMode) -> Arc<Self> {
        Arc::new(Self {
            id: ConsumerId::new(),
            mode,
            calls: AtomicU64::new(0),
        })
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail(&self) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.mode {
            FailureMode::ReturnError => Err(SinkError::Rejected("always failing".to_string())),
            FailureMode::Panic => panic!("sink exploded"),
        }
    }
}

impl MarketDataSink for FailingSink {
    fn consumer_id(&self) -> ConsumerId {
        self.id
    }

    fn on_last_trade(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.fail()
    }

    fn on_bid(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.fail()
    }

    fn on_ask(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.fail()
    }

    fn on_daily_stat(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.fail()
    }

    fn on_depth(&self, _update: &DepthUpdate) -> Result<(), SinkError> {
        self.fail()
    }
}

/// Counts deliveries without keeping them (benchmarks, long demo runs)
#[derive(Default)]
pub struct CountingSink {
    id: ConsumerId,
    pub last_trades: AtomicU64,
    pub quotes: AtomicU64,
    pub daily_stats: AtomicU64,
    pub depth_updates: AtomicU64,
}

impl CountingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn total(&self) -> u64 {
        self.last_trades.load(Ordering::Relaxed)
            + self.quotes.load(Ordering::Relaxed)
            + self.daily_stats.load(Ordering::Relaxed)
            + self.depth_updates.load(Ordering::Relaxed)
    }
}

impl MarketDataSink for CountingSink {
    fn consumer_id(&self) -> ConsumerId {
        self.id
    }

    fn on_last_trade(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.last_trades.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_bid(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.quotes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_ask(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.quotes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_daily_stat(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
        self.daily_stats.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_depth(&self, _update: &DepthUpdate) -> Result<(), SinkError> {
        self.depth_updates.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Logs a sample of trades at debug level, everything else at trace
///
/// Runs on the shard worker, so only the first trade and every
/// `sample_every`-th one after it reach the default debug filter.
pub struct LoggingSink {
    id: ConsumerId,
    label: String,
    sample_every: u64,
    trades: AtomicU64,
    sampled: AtomicU64,
}

impl LoggingSink {
    pub const DEFAULT_SAMPLE_EVERY: u64 = 1_000;

    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Self::sampled(label, Self::DEFAULT_SAMPLE_EVERY)
    }

    pub fn sampled(label: impl Into<String>, sample_every: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConsumerId::new(),
            label: label.into(),
            sample_every: sample_every.max(1),
            trades: AtomicU64::new(0),
            sampled: AtomicU64::new(0),
        })
    }

    pub fn trades(&self) -> u64 {
        self.trades.load(Ordering::Relaxed)
    }

    /// Trades logged at debug level
    pub fn sampled_trades(&self) -> u64 {
        self.sampled.load(Ordering::Relaxed)
    }
}

impl MarketDataSink for LoggingSink {
    fn consumer_id(&self) -> ConsumerId {
        self.id
    }

    fn on_last_trade(&self, event: &MarketDataEvent) -> Result<(), SinkError> {
        let count = self.trades.fetch_add(1, Ordering::Relaxed) + 1;
        if count == 1 || count % self.sample_every == 0 {
            self.sampled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "📈 [{}] trade #{} {} x {} @ {}",
                self.label,
                count,
                event.price,
                event.size,
                event.timestamp
            );
        } else {
            tracing::trace!(
                "📈 [{}] trade {} x {} @ {}",
                self.label,
                event.price,
                event.size,
                event.timestamp
            );
        }
        Ok(())
    }

    fn on_depth(&self, update: &DepthUpdate) -> Result<(), SinkError> {
        tracing::trace!(
            "📚 [{}] {:?} {:?} L{} {} x {}",
            self.label,
            update.side,
            update.operation,
            update.level,
            update.price,
            update.size
        );
        Ok(())
    }
}
