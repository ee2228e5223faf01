use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::hint;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use crate::backpressure::{
    Admission, BackpressureController, BackpressureState, BackpressureStatus, SymbolPriorityPolicy,
};
use crate::config::{DispatchConfig, PipelineConfig};
use crate::disruptor::{SlotEntry, TickRing};
use crate::market_data::{DispatchCounters, DispatchStats, Dispatcher};
use crate::metrics::{LatencyStats, LatencyTracker};
use crate::models::TickRecord;

/// Yields before the readiness wait falls back to short sleeps
const YIELD_ROUNDS: u32 = 64;
const READY_SLEEP: Duration = Duration::from_micros(50);

#[derive(Debug, Default)]
struct ShardCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    slot_anomalies: AtomicU64,
    resets: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShardLatency {
    pub end_to_end: LatencyStats,
    pub processing: LatencyStats,
    pub callback: LatencyStats,
}

/// Point-in-time statistics for one shard
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShardStats {
    pub shard_id: usize,
    pub capacity: usize,
    pub produced: u64,
    pub consumed: u64,
    pub pending: u64,
    pub utilisation_pct: f64,
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub slot_anomalies: u64,
    pub resets: u64,
    pub worker_parked: bool,
    pub backpressure: BackpressureStatus,
    pub dispatch: DispatchStats,
    pub latency: ShardLatency,
}

/// One ring, its backpressure controller and the state its worker publishes
///
/// Producers only touch the ring, the controller and the wake signal. The
/// worker owns the `Dispatcher` (and with it the symbol state store) on its
/// own thread.
pub struct Shard {
    id: usize,
    ring: TickRing,
    backpressure: BackpressureController,

    wake_lock: Mutex<()>,
    wake: Condvar,
    /// Worker is (about to be) parked on `wake`
    sleeping: AtomicBool,

    reset_requested: AtomicBool,
    shutdown: AtomicBool,

    counters: ShardCounters,
    dispatch_counters: Arc<DispatchCounters>,
    latency: Mutex<LatencyTracker>,
}

impl Shard {
    pub fn new(id: usize, config: &PipelineConfig, policy: Arc<dyn SymbolPriorityPolicy>) -> Self {
        Self {
            id,
            ring: TickRing::new(config.ring_capacity),
            backpressure: BackpressureController::new(
                id,
                config.ring_capacity,
                &config.backpressure,
                policy,
            ),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            sleeping: AtomicBool::new(false),
            reset_requested: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            counters: ShardCounters::default(),
            dispatch_counters: Arc::new(DispatchCounters::default()),
            latency: Mutex::new(LatencyTracker::new()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Counters the worker's dispatcher must write to
    pub fn dispatch_counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.dispatch_counters)
    }

    /// Admit, reserve, write, publish. Never blocks.
    pub fn try_enqueue(&self, tick: Arc<TickRecord>) -> bool {
        let pending = self.ring.pending();

        if let Admission::Drop(_) = self.backpressure.admit(&tick.symbol, pending) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if self.ring.try_push(SlotEntry::new(tick)).is_err() {
            // Lost a race for the last free slots after admission, or the
            // worker skipped this reservation before it could be written
            self.backpressure.record_drop(BackpressureState::Maximum);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);

        fence(Ordering::SeqCst);
        if self.sleeping.load(Ordering::Relaxed) {
            self.notify();
        }
        true
    }

    fn notify(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_one();
    }

    /// Ask the worker to clear its symbol states at its next iteration
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
        self.notify();
    }

    /// Ask the worker to drain what is queued and exit
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify();
    }

    /// Start the worker thread `tick-shard-{id}`
    pub fn spawn(
        self: &Arc<Self>,
        dispatcher: Dispatcher,
        config: DispatchConfig,
    ) -> std::io::Result<JoinHandle<()>> {
        let shard = Arc::clone(self);
        thread::Builder::new()
            .name(format!("tick-shard-{}", self.id))
            .spawn(move || shard.run(dispatcher, config))
    }

    fn run(&self, mut dispatcher: Dispatcher, config: DispatchConfig) {
        tracing::info!("🚀 Shard {} worker started (capacity {})", self.id, self.ring.capacity());

        loop {
            if self.reset_requested.swap(false, Ordering::AcqRel) {
                dispatcher.reset();
                self.counters.resets.fetch_add(1, Ordering::Relaxed);
                tracing::info!("🔄 Shard {} symbol state cleared", self.id);
            }

            if self.ring.has_pending() {
                self.drain(&mut dispatcher, &config);
                continue;
            }

            // Re-check after observing the flag: pushes that landed before
            // shutdown was requested are visible now
            if self.shutdown.load(Ordering::Acquire) && !self.ring.has_pending() {
                break;
            }

            self.park(config.idle_wait());
        }

        tracing::info!(
            "🛑 Shard {} worker stopped after {} ticks",
            self.id,
            self.counters.processed.load(Ordering::Relaxed)
        );
    }

    /// Bounded wait for work, re-checking flags around the park
    fn park(&self, timeout: Duration) {
        let mut guard = self.wake_lock.lock();
        self.sleeping.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        if !self.ring.has_pending()
            && !self.shutdown.load(Ordering::Acquire)
            && !self.reset_requested.load(Ordering::Acquire)
        {
            self.wake.wait_for(&mut guard, timeout);
        }

        self.sleeping.store(false, Ordering::Relaxed);
    }

    /// Process every sequence reserved at the time of the call, in order
    fn drain(&self, dispatcher: &mut Dispatcher, config: &DispatchConfig) {
        let produced = self.ring.produced();
        let mut sequence = self.ring.consumed();

        while sequence < produced {
            let entry = if self.wait_ready(sequence, config) || !self.ring.try_skip(sequence) {
                self.ring.take(sequence)
            } else {
                None
            };

            let Some(entry) = entry else {
                self.counters.slot_anomalies.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "⚠️  Shard {} slot not published within {:?}, skipping (sequence={}, index={}, pending={})",
                    self.id,
                    config.slot_ready_timeout(),
                    sequence,
                    sequence as usize & (self.ring.capacity() - 1),
                    produced - sequence
                );
                self.ring.advance(sequence);
                sequence += 1;
                continue;
            };

            let started = Instant::now();
            dispatcher.dispatch(&entry.tick);
            let processing = started.elapsed();
            let end_to_end = entry.enqueued_at.elapsed();
            drop(entry);

            self.ring.advance(sequence);
            self.counters.processed.fetch_add(1, Ordering::Relaxed);

            {
                let mut latency = self.latency.lock();
                latency.record_end_to_end(end_to_end);
                latency.record_processing(processing);
                for timing in dispatcher.callback_timings() {
                    latency.record_callback(*timing);
                }
            }

            sequence += 1;
        }
    }

    /// Spin, then yield, then sleep until the slot is published or the
    /// readiness timeout passes
    fn wait_ready(&self, sequence: u64, config: &DispatchConfig) -> bool {
        if self.ring.is_ready(sequence) {
            return true;
        }

        for _ in 0..config.spin_iterations {
            hint::spin_loop();
            if self.ring.is_ready(sequence) {
                return true;
            }
        }

        let deadline = Instant::now() + config.slot_ready_timeout();
        let mut round = 0u32;
        while Instant::now() < deadline {
            if round < YIELD_ROUNDS {
                thread::yield_now();
            } else {
                thread::sleep(READY_SLEEP);
            }
            if self.ring.is_ready(sequence) {
                return true;
            }
            round = round.saturating_add(1);
        }

        self.ring.is_ready(sequence)
    }

    pub fn pending(&self) -> u64 {
        self.ring.pending()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn backpressure(&self) -> &BackpressureController {
        &self.backpressure
    }

    pub fn processed(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// Copy of the shard's histograms
    pub fn latency_snapshot(&self) -> LatencyTracker {
        self.latency.lock().clone()
    }

    pub fn stats(&self) -> ShardStats {
        let produced = self.ring.produced();
        let consumed = self.ring.consumed();
        let pending = produced.saturating_sub(consumed);
        let latency = {
            let tracker = self.latency.lock();
            ShardLatency {
                end_to_end: tracker.end_to_end_stats(),
                processing: tracker.processing_stats(),
                callback: tracker.callback_stats(),
            }
        };

        ShardStats {
            shard_id: self.id,
            capacity: self.ring.capacity(),
            produced,
            consumed,
            pending,
            utilisation_pct: pending as f64 * 100.0 / self.ring.capacity() as f64,
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            slot_anomalies: self.counters.slot_anomalies.load(Ordering::Relaxed),
            resets: self.counters.resets.load(Ordering::Relaxed),
            worker_parked: self.sleeping.load(Ordering::Relaxed),
            backpressure: self.backpressure.status(),
            dispatch: self.dispatch_counters.snapshot(),
            latency,
        }
    }

    #[cfg(test)]
    pub(crate) fn ring(&self) -> &TickRing {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backpressure::ListPriorityPolicy;
    use crate::models::{InstrumentKind, Subscriber, SubscriptionRequest};
    use crate::subscriptions::SubscriptionRoutes;
    use crate::testing::sinks::RecordingSink;
    use std::collections::HashMap;

    fn config(capacity: usize) -> PipelineConfig {
        let mut config = PipelineConfig {
            shard_count: 1,
            ring_capacity: capacity,
            ..Default::default()
        };
        config.dispatch.slot_ready_timeout_ms = 5;
        config.dispatch.idle_wait_ms = 2;
        config
    }

    fn shard(config: &PipelineConfig) -> Arc<Shard> {
        let policy = Arc::new(ListPriorityPolicy::from_config(&config.backpressure));
        Arc::new(Shard::new(0, config, policy))
    }

    fn start(
        shard: &Arc<Shard>,
        config: &PipelineConfig,
        routes: &Arc<SubscriptionRoutes>,
    ) -> JoinHandle<()> {
        let dispatcher = Dispatcher::new(0, Arc::clone(routes), &config.dispatch, shard.dispatch_counters());
        shard.spawn(dispatcher, config.dispatch.clone()).unwrap()
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for worker");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn subscribed_routes(symbol: &str) -> (Arc<SubscriptionRoutes>, Arc<RecordingSink>) {
        let routes = Arc::new(SubscriptionRoutes::default());
        let sink = RecordingSink::new();
        let request = SubscriptionRequest::new(InstrumentKind::Equity)
            .with_subscriber(Subscriber::new(sink.clone()));
        routes
            .quotes
            .rebuild(&HashMap::from([(symbol.to_string(), request)]))
            .unwrap();
        (routes, sink)
    }

    #[test]
    fn test_enqueue_without_worker_fills_to_capacity() {
        let config = PipelineConfig {
            backpressure: crate::config::BackpressureConfig {
                essential_symbols: vec!["SBIN".to_string()],
                ..Default::default()
            },
            ..config(8)
        };
        let shard = shard(&config);

        for i in 0..8 {
            assert!(shard.try_enqueue(Arc::new(TickRecord::ltp("SBIN", i as f64))), "tick {i}");
        }
        // Capacity + 1 is rejected, nothing overwritten
        assert!(!shard.try_enqueue(Arc::new(TickRecord::ltp("SBIN", 8.0))));

        let stats = shard.stats();
        assert_eq!(stats.pending, 8);
        assert_eq!(stats.enqueued, 8);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.backpressure.state, BackpressureState::Maximum);
        assert_eq!(stats.utilisation_pct, 100.0);
    }

    #[test]
    fn test_worker_drains_in_order_and_shuts_down() {
        let config = config(1024);
        let shard = shard(&config);
        let (routes, sink) = subscribed_routes("SBIN");
        let worker = start(&shard, &config, &routes);

        for i in 1..=500u64 {
            assert!(shard.try_enqueue(Arc::new(TickRecord::trade("SBIN", i as f64, 1, i))));
        }
        wait_until(|| shard.processed() == 500);

        let prices: Vec<f64> = sink.last_trades().iter().map(|(p, _)| *p).collect();
        assert_eq!(prices, (1..=500).map(|i| i as f64).collect::<Vec<_>>());

        shard.request_shutdown();
        worker.join().unwrap();

        let stats = shard.stats();
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.latency.end_to_end.sample_count, 500);
        assert_eq!(stats.latency.callback.sample_count, stats.dispatch.callbacks_invoked);
    }

    #[test]
    fn test_queued_items_drained_before_exit() {
        let config = config(256);
        let shard = shard(&config);
        let (routes, _sink) = subscribed_routes("SBIN");

        for i in 0..100u64 {
            assert!(shard.try_enqueue(Arc::new(TickRecord::trade("SBIN", 1.0, 1, i + 1))));
        }
        shard.request_shutdown();

        let worker = start(&shard, &config, &routes);
        worker.join().unwrap();

        assert_eq!(shard.processed(), 100);
        assert_eq!(shard.pending(), 0);
    }

    #[test]
    fn test_unpublished_slot_is_skipped_as_anomaly() {
        let config = config(16);
        let shard = shard(&config);
        let (routes, sink) = subscribed_routes("SBIN");

        assert!(shard.try_enqueue(Arc::new(TickRecord::trade("SBIN", 10.0, 1, 1))));
        // Producer reserved a slot and never published it
        assert_eq!(shard.ring().reserve_unpublished(), Some(1));
        assert!(shard.try_enqueue(Arc::new(TickRecord::trade("SBIN", 11.0, 1, 2))));

        let worker = start(&shard, &config, &routes);
        wait_until(|| shard.stats().consumed == 3);

        let stats = shard.stats();
        assert_eq!(stats.slot_anomalies, 1);
        assert_eq!(stats.processed, 2);
        assert_eq!(sink.last_trades(), vec![(10.0, 1), (11.0, 1)]);

        shard.request_shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_reset_request_clears_symbol_state() {
        let config = config(64);
        let shard = shard(&config);
        let (routes, sink) = subscribed_routes("SBIN");
        let worker = start(&shard, &config, &routes);

        shard.try_enqueue(Arc::new(TickRecord::trade("SBIN", 800.0, 5, 1_000)));
        wait_until(|| shard.processed() == 1);
        assert_eq!(shard.stats().dispatch.tracked_symbols, 1);

        shard.request_reset();
        wait_until(|| shard.stats().resets == 1);
        assert_eq!(shard.stats().dispatch.tracked_symbols, 0);

        shard.try_enqueue(Arc::new(TickRecord::trade("SBIN", 801.0, 7, 1_100)));
        wait_until(|| shard.processed() == 2);
        assert_eq!(sink.last_trades(), vec![(800.0, 5), (801.0, 7)]);

        shard.request_shutdown();
        worker.join().unwrap();
    }

    #[test]
    fn test_concurrent_producers_single_worker() {
        let config = config(1 << 14);
        let shard = shard(&config);
        let routes = Arc::new(SubscriptionRoutes::default());
        let worker = start(&shard, &config, &routes);

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let shard = Arc::clone(&shard);
                thread::spawn(move || {
                    let symbol = format!("SYM{p}");
                    for i in 0..1_000 {
                        assert!(shard.try_enqueue(Arc::new(TickRecord::ltp(symbol.as_str(), i as f64))));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        wait_until(|| shard.processed() == 4_000);
        let stats = shard.stats();
        assert_eq!(stats.dispatch.unsubscribed, 4_000);
        assert_eq!(stats.slot_anomalies, 0);

        shard.request_shutdown();
        worker.join().unwrap();
    }
}
