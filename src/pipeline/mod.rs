//! Sharded tick ingestion and dispatch
//!
//! `TickPipeline` is the composition root: it routes each tick to a shard by
//! symbol, owns the shard workers, and exposes subscription control and
//! diagnostics. Create one per feed and share it as `Arc<TickPipeline>`.

pub mod errors;
pub mod router;
pub mod shard;

pub use errors::PipelineError;
pub use router::{shard_for, Router};
pub use shard::{Shard, ShardLatency, ShardStats};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use crate::backpressure::{
    BackpressureState, ListPriorityPolicy, StateTransition, SymbolPriorityPolicy,
};
use crate::config::PipelineConfig;
use crate::market_data::Dispatcher;
use crate::metrics::{HealthInputs, HealthReport, LatencyStats, LatencyTracker, PerformanceMonitor};
use crate::models::{SubscriptionRequest, TickRecord};
use crate::subscriptions::{CacheStats, RebuildSummary, SubscriptionRoutes};

/// Pipeline-wide statistics, aggregated over all shards
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PipelineStats {
    pub timestamp: DateTime<Utc>,
    pub shard_count: usize,
    pub ring_capacity: usize,
    pub running: bool,
    pub accepting: bool,

    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub pending: u64,
    /// Ticks with an empty symbol
    pub rejected_invalid: u64,
    /// Ticks offered after shutdown began
    pub rejected_shutdown: u64,
    pub slot_anomalies: u64,
    pub resets: u64,

    pub unsubscribed: u64,
    pub callbacks_invoked: u64,
    pub callback_failures: u64,
    pub slow_callbacks: u64,
    pub avg_callback_us: f64,
    pub max_callback_us: f64,
    pub tracked_symbols: u64,

    pub worst_backpressure: BackpressureState,
    pub warning_transitions: u64,
    pub critical_transitions: u64,

    pub end_to_end_latency: LatencyStats,
    pub processing_latency: LatencyStats,
    pub callback_latency: LatencyStats,

    pub quotes_cache: CacheStats,
    pub depth_cache: CacheStats,
    pub cached_symbols: usize,
    pub mapped_symbols: usize,

    pub shards: Vec<ShardStats>,
}

impl PipelineStats {
    pub fn rejected(&self) -> u64 {
        self.rejected_invalid + self.rejected_shutdown
    }
}

/// Handle to a running tick pipeline
pub struct TickPipeline {
    config: PipelineConfig,
    router: Router,
    shards: Vec<Arc<Shard>>,
    routes: Arc<SubscriptionRoutes>,
    monitor: PerformanceMonitor,
    workers: Mutex<Vec<(usize, JoinHandle<()>)>>,
    started: AtomicBool,
    accepting: AtomicBool,
    /// Producers between the `accepting` check and the end of their push
    in_flight: AtomicU64,
    rejected_invalid: AtomicU64,
    rejected_shutdown: AtomicU64,
}

impl TickPipeline {
    /// Build a pipeline with the default allow-list priority policy
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let policy = Arc::new(ListPriorityPolicy::from_config(&config.backpressure));
        Self::with_policy(config, policy)
    }

    /// Build a pipeline with a custom symbol priority policy
    pub fn with_policy(
        config: PipelineConfig,
        policy: Arc<dyn SymbolPriorityPolicy>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let shards = (0..config.shard_count)
            .map(|id| Arc::new(Shard::new(id, &config, Arc::clone(&policy))))
            .collect();

        tracing::info!(
            "🧩 Tick pipeline created: {} shards x {} slots",
            config.shard_count,
            config.ring_capacity
        );

        Ok(Self {
            router: Router::new(config.shard_count),
            shards,
            routes: Arc::new(SubscriptionRoutes::new(&config.subscriptions)),
            monitor: PerformanceMonitor::new(),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            in_flight: AtomicU64::new(0),
            rejected_invalid: AtomicU64::new(0),
            rejected_shutdown: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// False once `shutdown` has begun
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Shard a symbol routes to
    pub fn shard_for(&self, symbol: &str) -> usize {
        self.router.shard_for(symbol)
    }

    /// Spawn one worker thread per shard
    pub fn start(&self) -> Result<(), PipelineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::AlreadyStarted);
        }

        let mut workers = self.workers.lock();
        for shard in &self.shards {
            let dispatcher = Dispatcher::new(
                shard.id(),
                Arc::clone(&self.routes),
                &self.config.dispatch,
                shard.dispatch_counters(),
            );
            let handle = shard
                .spawn(dispatcher, self.config.dispatch.clone())
                .map_err(|source| PipelineError::WorkerSpawn {
                    shard: shard.id(),
                    source,
                })?;
            workers.push((shard.id(), handle));
        }

        tracing::info!("✅ Tick pipeline started with {} workers", workers.len());
        Ok(())
    }

    /// Offer a tick; false when it was rejected or shed
    ///
    /// Never blocks. Ticks may be queued before `start()`; they are processed
    /// once the workers run.
    pub fn try_enqueue(&self, tick: Arc<TickRecord>) -> bool {
        if tick.symbol.is_empty() {
            self.rejected_invalid.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // Pairs with the store/load in `shutdown`: either this producer sees
        // `accepting == false` or shutdown waits for its push to land
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.rejected_shutdown.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let accepted = self.shards[self.router.shard_for(&tick.symbol)].try_enqueue(tick);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        accepted
    }

    /// Replace the quote subscriptions (trade, top of book, daily stats)
    pub fn rebuild_subscriptions(
        &self,
        subscriptions: &HashMap<String, SubscriptionRequest>,
    ) -> Result<RebuildSummary, PipelineError> {
        self.routes.quotes.rebuild(subscriptions)
    }

    /// Replace the depth subscriptions
    pub fn rebuild_depth_subscriptions(
        &self,
        subscriptions: &HashMap<String, SubscriptionRequest>,
    ) -> Result<RebuildSummary, PipelineError> {
        self.routes.depth.rebuild(subscriptions)
    }

    /// Replace the native → canonical symbol mapping
    pub fn publish_symbol_mapping(&self, mapping: HashMap<String, String>) {
        self.routes.symbol_map.publish(mapping);
    }

    /// Rebuild any cache still waiting on uninitialized consumers
    pub fn retry_pending_subscriptions(&self) -> Vec<Result<RebuildSummary, PipelineError>> {
        [&self.routes.quotes, &self.routes.depth]
            .into_iter()
            .filter_map(|cache| cache.retry_pending())
            .collect()
    }

    pub fn routes(&self) -> &Arc<SubscriptionRoutes> {
        &self.routes
    }

    /// Clear every shard's symbol state at the workers' next iteration
    pub fn reset(&self) {
        for shard in &self.shards {
            shard.request_reset();
        }
        tracing::info!("🔄 Pipeline reset requested on {} shards", self.shards.len());
    }

    /// Stop accepting ticks, let workers drain, and join them within `grace`
    pub fn shutdown(&self, grace: Duration) -> Result<(), PipelineError> {
        let deadline = Instant::now() + grace;

        self.accepting.store(false, Ordering::SeqCst);
        // Ticks already past the check must reach the rings before workers stop
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            thread::yield_now();
        }

        for shard in &self.shards {
            shard.request_shutdown();
        }

        let mut workers = std::mem::take(&mut *self.workers.lock());
        while !workers.iter().all(|(_, handle)| handle.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let (finished, unfinished): (Vec<_>, Vec<_>) = workers
            .drain(..)
            .partition(|(_, handle)| handle.is_finished());

        for (shard, handle) in finished {
            if handle.join().is_err() {
                tracing::error!("❌ Shard {} worker panicked", shard);
            }
        }

        if unfinished.is_empty() {
            tracing::info!("✅ Tick pipeline shut down");
            return Ok(());
        }

        let shards: Vec<usize> = unfinished.iter().map(|(shard, _)| *shard).collect();
        // Keep the stragglers so a later shutdown (or Drop) can still join them
        self.workers.lock().extend(unfinished);

        tracing::warn!(
            "⚠️  Shutdown grace of {:?} exceeded, shards still running: {:?}",
            grace,
            shards
        );
        Err(PipelineError::ShutdownTimeout {
            grace_ms: grace.as_millis() as u64,
            shards,
        })
    }

    pub fn shard_stats(&self, shard_id: usize) -> Option<ShardStats> {
        self.shards.get(shard_id).map(|shard| shard.stats())
    }

    /// Backpressure transitions recorded for a shard, oldest first
    pub fn transition_log(&self, shard_id: usize) -> Option<Vec<StateTransition>> {
        self.shards
            .get(shard_id)
            .map(|shard| shard.backpressure().transition_log())
    }

    pub fn snapshot(&self) -> PipelineStats {
        let shards: Vec<ShardStats> = self.shards.iter().map(|shard| shard.stats()).collect();

        let mut latency = LatencyTracker::new();
        for shard in &self.shards {
            latency.merge(&shard.latency_snapshot());
        }

        let sum = |f: fn(&ShardStats) -> u64| shards.iter().map(f).sum::<u64>();
        let callbacks_invoked = sum(|s| s.dispatch.callbacks_invoked);
        let callback_time_us: f64 = shards
            .iter()
            .map(|s| s.dispatch.avg_callback_us * s.dispatch.callbacks_invoked as f64)
            .sum();

        PipelineStats {
            timestamp: Utc::now(),
            shard_count: self.shards.len(),
            ring_capacity: self.config.ring_capacity,
            running: self.started.load(Ordering::Acquire) && !self.workers.lock().is_empty(),
            accepting: self.accepting.load(Ordering::Acquire),
            enqueued: sum(|s| s.enqueued),
            dropped: sum(|s| s.dropped),
            processed: sum(|s| s.processed),
            pending: sum(|s| s.pending),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            rejected_shutdown: self.rejected_shutdown.load(Ordering::Relaxed),
            slot_anomalies: sum(|s| s.slot_anomalies),
            resets: sum(|s| s.resets),
            unsubscribed: sum(|s| s.dispatch.unsubscribed),
            callbacks_invoked,
            callback_failures: sum(|s| s.dispatch.callback_failures()),
            slow_callbacks: sum(|s| s.dispatch.slow_callbacks),
            avg_callback_us: if callbacks_invoked > 0 {
                callback_time_us / callbacks_invoked as f64
            } else {
                0.0
            },
            max_callback_us: shards
                .iter()
                .map(|s| s.dispatch.max_callback_us)
                .fold(0.0, f64::max),
            tracked_symbols: sum(|s| s.dispatch.tracked_symbols),
            worst_backpressure: shards
                .iter()
                .map(|s| s.backpressure.state)
                .max()
                .unwrap_or(BackpressureState::Normal),
            warning_transitions: sum(|s| s.backpressure.warning_transitions),
            critical_transitions: sum(|s| s.backpressure.critical_transitions),
            end_to_end_latency: latency.end_to_end_stats(),
            processing_latency: latency.processing_stats(),
            callback_latency: latency.callback_stats(),
            quotes_cache: self.routes.quotes.stats(),
            depth_cache: self.routes.depth.stats(),
            cached_symbols: self.routes.cached_symbols(),
            mapped_symbols: self.routes.symbol_map.len(),
            shards,
        }
    }

    /// Classified health report over the current reporting interval
    ///
    /// Read-only: the interval keeps running until `record_health_report`.
    pub fn health_report(&self) -> HealthReport {
        self.monitor.peek(&self.health_inputs())
    }

    /// Classified health report that closes the reporting interval
    ///
    /// Meant for the periodic health job; rates and throughput in the next
    /// report are measured from here.
    pub fn record_health_report(&self) -> HealthReport {
        self.monitor.report(&self.health_inputs())
    }

    fn health_inputs(&self) -> HealthInputs {
        let stats = self.snapshot();
        HealthInputs {
            queued: stats.enqueued,
            processed: stats.processed,
            dropped: stats.dropped,
            rejected: stats.rejected(),
            callbacks_invoked: stats.callbacks_invoked,
            callback_failures: stats.callback_failures,
            slow_callbacks: stats.slow_callbacks,
            avg_callback_us: stats.avg_callback_us,
            max_callback_us: stats.max_callback_us,
            e2e_p50_us: stats.end_to_end_latency.p50_us(),
            e2e_p99_us: stats.end_to_end_latency.p99_us(),
            worst_backpressure: Some(stats.worst_backpressure),
            warning_transitions: stats.warning_transitions,
            critical_transitions: stats.critical_transitions,
            slot_anomalies: stats.slot_anomalies,
            pending_slots: stats.pending,
            total_capacity: (stats.ring_capacity * stats.shard_count) as u64,
            tracked_symbols: stats.tracked_symbols,
            cached_symbols: stats.cached_symbols as u64,
        }
    }

    /// Human-readable dump of every shard and cache
    pub fn diagnostic_dump(&self) -> String {
        let mut out = String::new();
        if let Err(e) = self.write_diagnostics(&mut out) {
            tracing::error!("❌ Failed to format diagnostics: {}", e);
        }
        out
    }

    fn write_diagnostics(&self, out: &mut String) -> fmt::Result {
        let stats = self.snapshot();

        writeln!(out, "=== Tick pipeline diagnostics @ {} ===", stats.timestamp)?;
        writeln!(
            out,
            "shards={} capacity={} running={} accepting={}",
            stats.shard_count, stats.ring_capacity, stats.running, stats.accepting
        )?;
        writeln!(
            out,
            "enqueued={} processed={} dropped={} pending={} rejected={} anomalies={} resets={}",
            stats.enqueued,
            stats.processed,
            stats.dropped,
            stats.pending,
            stats.rejected(),
            stats.slot_anomalies,
            stats.resets
        )?;
        writeln!(
            out,
            "callbacks={} failures={} slow={} avg={:.2}µs max={:.2}µs",
            stats.callbacks_invoked,
            stats.callback_failures,
            stats.slow_callbacks,
            stats.avg_callback_us,
            stats.max_callback_us
        )?;
        writeln!(
            out,
            "e2e p50={:.2}µs p99={:.2}µs max={:.2}µs samples={}",
            stats.end_to_end_latency.p50_us(),
            stats.end_to_end_latency.p99_us(),
            stats.end_to_end_latency.max_us(),
            stats.end_to_end_latency.sample_count
        )?;

        for cache in [&stats.quotes_cache, &stats.depth_cache] {
            writeln!(
                out,
                "cache {}: generation={} symbols={} callbacks={} pending={} abandoned={} failed_rebuilds={}",
                cache.cache,
                cache.generation,
                cache.symbols,
                cache.callbacks,
                cache.pending_consumers,
                cache.abandoned_consumers,
                cache.failed_rebuilds
            )?;
        }
        writeln!(out, "symbol mapping: {} entries", stats.mapped_symbols)?;

        for shard in &stats.shards {
            writeln!(
                out,
                "[shard {}] produced={} consumed={} pending={} ({:.1}%) state={:?} drops={} processed={} symbols={} parked={}",
                shard.shard_id,
                shard.produced,
                shard.consumed,
                shard.pending,
                shard.utilisation_pct,
                shard.backpressure.state,
                shard.dropped,
                shard.processed,
                shard.dispatch.tracked_symbols,
                shard.worker_parked
            )?;
            if let Some(last) = &shard.backpressure.last_transition {
                writeln!(
                    out,
                    "    last transition {:?} -> {:?} at pending={} ({})",
                    last.from, last.to, last.pending, last.at
                )?;
            }
        }

        Ok(())
    }
}

impl Drop for TickPipeline {
    fn drop(&mut self) {
        if self.workers.lock().is_empty() {
            return;
        }
        if let Err(e) = self.shutdown(Duration::from_secs(2)) {
            tracing::error!("❌ Pipeline dropped without clean shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackpressureConfig;
    use crate::market_data::{MarketDataSink, SinkError};
    use crate::models::{ConsumerId, InstrumentKind, MarketDataEvent, Subscriber};
    use crate::testing::sinks::RecordingSink;

    fn subscriptions(symbol: &str, sink: Arc<dyn MarketDataSink>) -> HashMap<String, SubscriptionRequest> {
        HashMap::from([(
            symbol.to_string(),
            SubscriptionRequest::new(InstrumentKind::Equity).with_subscriber(Subscriber::new(sink)),
        )])
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for pipeline");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_end_to_end_single_symbol_in_order() {
        let config = PipelineConfig {
            shard_count: 4,
            ring_capacity: 16_384,
            ..Default::default()
        };
        let pipeline = TickPipeline::new(config).unwrap();
        let sink = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("X", sink.clone())).unwrap();
        pipeline.start().unwrap();

        for i in 1..=10_000u64 {
            let tick = TickRecord::trade("X", i as f64, 10, i * 10);
            assert!(pipeline.try_enqueue(Arc::new(tick)), "tick {i} rejected");
        }
        wait_until(|| pipeline.snapshot().processed == 10_000);

        let stats = pipeline.snapshot();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.rejected(), 0);

        let trades = sink.last_trades();
        assert_eq!(trades.len(), 10_000);
        assert!(trades.iter().all(|(_, size)| *size == 10));
        let prices: Vec<f64> = trades.iter().map(|(p, _)| *p).collect();
        assert!(prices.windows(2).all(|w| w[0] < w[1]), "ticks out of order");

        pipeline.shutdown(Duration::from_secs(5)).unwrap();

        let stats = pipeline.snapshot();
        assert_eq!(stats.end_to_end_latency.sample_count, 10_000);
        assert!(stats.end_to_end_latency.mean_ns >= 0.0);
        assert!(stats.avg_callback_us >= 0.0);
        assert!(!stats.running);
    }

    #[test]
    fn test_emergency_accepts_only_essential_symbols() {
        let config = PipelineConfig {
            shard_count: 1,
            ring_capacity: 64,
            backpressure: BackpressureConfig {
                critical_drop_probability: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let pipeline = TickPipeline::new(config).unwrap();

        // Thresholds on 64 slots: warning 38, critical 51, emergency 57
        for i in 0..57 {
            assert!(pipeline.try_enqueue(Arc::new(TickRecord::ltp("RELIANCE", 2500.0 + i as f64))));
        }
        assert!(!pipeline.try_enqueue(Arc::new(TickRecord::ltp("RELIANCE", 2600.0))));
        assert!(!pipeline.try_enqueue(Arc::new(TickRecord::ltp("TESTSYM", 1.0))));
        assert!(pipeline.try_enqueue(Arc::new(TickRecord::ltp("NIFTY 50", 22000.0))));
        assert!(pipeline.try_enqueue(Arc::new(TickRecord::ltp("NSE:NIFTY BANK", 48000.0))));

        let stats = pipeline.snapshot();
        assert_eq!(stats.worst_backpressure, BackpressureState::Emergency);
        assert_eq!(stats.enqueued, 59);
        assert_eq!(stats.dropped, 2);

        let log = pipeline.transition_log(0).unwrap();
        let path: Vec<_> = log.iter().map(|t| (t.to, t.pending)).collect();
        assert_eq!(
            path,
            vec![
                (BackpressureState::Warning, 38),
                (BackpressureState::Critical, 51),
                (BackpressureState::Emergency, 57),
            ]
        );

        // Fill the rest with essentials; a full ring rejects even those
        for _ in 59..64 {
            assert!(pipeline.try_enqueue(Arc::new(TickRecord::ltp("SENSEX", 73000.0))));
        }
        assert!(!pipeline.try_enqueue(Arc::new(TickRecord::ltp("SENSEX", 73001.0))));
        assert_eq!(
            pipeline.transition_log(0).unwrap().last().map(|t| t.to),
            Some(BackpressureState::Maximum)
        );

        let report = pipeline.health_report();
        assert_eq!(report.status, crate::metrics::HealthStatus::Critical);

        // Everything accepted is still delivered once workers run
        pipeline.start().unwrap();
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
        let stats = pipeline.snapshot();
        assert_eq!(stats.processed, 64);
        assert_eq!(stats.unsubscribed, 64);
    }

    #[test]
    fn test_rejects_empty_symbol() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();

        assert!(!pipeline.try_enqueue(Arc::new(TickRecord::ltp("", 1.0))));

        let stats = pipeline.snapshot();
        assert_eq!(stats.rejected_invalid, 1);
        assert_eq!(stats.enqueued, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            ring_capacity: 1000,
            ..Default::default()
        };
        let err = TickPipeline::new(config).err().unwrap();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_start_twice_fails() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        pipeline.start().unwrap();

        assert!(matches!(pipeline.start(), Err(PipelineError::AlreadyStarted)));
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_shutdown_drains_and_stops_accepting() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let sink = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("INFY", sink.clone())).unwrap();

        for i in 1..=100u64 {
            assert!(pipeline.try_enqueue(Arc::new(TickRecord::trade("INFY", 1500.0, 1, i))));
        }
        pipeline.start().unwrap();
        pipeline.shutdown(Duration::from_secs(5)).unwrap();

        assert_eq!(sink.last_trades().len(), 100);
        assert!(!pipeline.try_enqueue(Arc::new(TickRecord::ltp("INFY", 1501.0))));
        assert_eq!(pipeline.snapshot().rejected_shutdown, 1);
    }

    struct SlowSink {
        id: ConsumerId,
        delay: Duration,
        entered: AtomicBool,
    }

    impl MarketDataSink for SlowSink {
        fn consumer_id(&self) -> ConsumerId {
            self.id
        }

        fn on_last_trade(&self, _event: &MarketDataEvent) -> Result<(), SinkError> {
            self.entered.store(true, Ordering::Release);
            thread::sleep(self.delay);
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_timeout_names_busy_shard() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let slow = Arc::new(SlowSink {
            id: ConsumerId::new(),
            delay: Duration::from_millis(500),
            entered: AtomicBool::new(false),
        });
        pipeline.rebuild_subscriptions(&subscriptions("SLOW", slow.clone())).unwrap();
        pipeline.start().unwrap();

        assert!(pipeline.try_enqueue(Arc::new(TickRecord::trade("SLOW", 1.0, 1, 1))));
        wait_until(|| slow.entered.load(Ordering::Acquire));

        let err = pipeline.shutdown(Duration::from_millis(10)).unwrap_err();
        match err {
            PipelineError::ShutdownTimeout { grace_ms, shards } => {
                assert_eq!(grace_ms, 10);
                assert_eq!(shards, vec![pipeline.shard_for("SLOW")]);
            }
            other => panic!("unexpected error: {other}"),
        }

        // The straggler is joined by a later shutdown
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
        assert_eq!(pipeline.snapshot().processed, 1);
    }

    #[test]
    fn test_reset_clears_all_shards() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let sink = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("SBIN", sink.clone())).unwrap();
        pipeline.start().unwrap();

        pipeline.try_enqueue(Arc::new(TickRecord::trade("SBIN", 800.0, 5, 1_000)));
        wait_until(|| pipeline.snapshot().processed == 1);

        pipeline.reset();
        wait_until(|| pipeline.snapshot().resets == 4);
        assert_eq!(pipeline.snapshot().tracked_symbols, 0);

        pipeline.try_enqueue(Arc::new(TickRecord::trade("SBIN", 800.0, 7, 1_100)));
        wait_until(|| pipeline.snapshot().processed == 2);

        assert_eq!(sink.last_trades(), vec![(800.0, 5), (800.0, 7)]);
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_symbol_mapping_and_depth_subscriptions() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let quotes = RecordingSink::new();
        let depth = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("NIFTY 50", quotes.clone())).unwrap();
        pipeline
            .rebuild_depth_subscriptions(&subscriptions("NIFTY 50", depth.clone()))
            .unwrap();
        pipeline.publish_symbol_mapping(HashMap::from([(
            "256265".to_string(),
            "NIFTY 50".to_string(),
        )]));
        pipeline.start().unwrap();

        let tick = TickRecord::trade("256265", 22000.0, 50, 50).with_depth(crate::models::MarketDepth {
            bids: vec![crate::models::DepthLevel { price: 21999.5, quantity: 75, orders: 3 }],
            asks: vec![],
        });
        assert!(pipeline.try_enqueue(Arc::new(tick)));
        wait_until(|| pipeline.snapshot().processed == 1);

        assert_eq!(quotes.last_trades(), vec![(22000.0, 50)]);
        assert_eq!(depth.depth_updates().len(), 1);
        assert!(depth.last_trades().is_empty());

        let stats = pipeline.snapshot();
        assert_eq!(stats.cached_symbols, 1);
        assert_eq!(stats.mapped_symbols, 1);
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_pending_consumer_included_on_retry() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let late = RecordingSink::not_ready();
        let summary = pipeline.rebuild_subscriptions(&subscriptions("TCS", late.clone())).unwrap();
        assert_eq!(summary.pending_callbacks, 1);

        late.set_ready(true);
        let retried = pipeline.retry_pending_subscriptions();
        assert_eq!(retried.len(), 1);
        assert_eq!(retried[0].as_ref().unwrap().callbacks, 1);
        assert!(pipeline.retry_pending_subscriptions().is_empty());
    }

    #[test]
    fn test_diagnostic_dump_mentions_every_shard() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        pipeline.try_enqueue(Arc::new(TickRecord::ltp("TCS", 3500.0)));

        let dump = pipeline.diagnostic_dump();
        for shard in 0..4 {
            assert!(dump.contains(&format!("[shard {shard}]")), "missing shard {shard}");
        }
        assert!(dump.contains("cache quotes"));
        assert!(dump.contains("cache depth"));
        assert!(pipeline.shard_stats(4).is_none());
        assert!(pipeline.transition_log(4).is_none());
    }

    #[test]
    fn test_health_report_after_traffic() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let sink = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("HDFC", sink)).unwrap();
        pipeline.start().unwrap();

        for i in 1..=200u64 {
            pipeline.try_enqueue(Arc::new(TickRecord::trade("HDFC", 1600.0, 1, i)));
        }
        wait_until(|| pipeline.snapshot().processed == 200);

        let report = pipeline.health_report();
        assert_eq!(report.processed, 200);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.callback_success_rate, 100.0);
        assert_eq!(report.cached_symbols, 1);
        assert_eq!(report.tracked_symbols, 1);
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_health_reads_do_not_shorten_reporting_interval() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let sink = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("AXIS", sink)).unwrap();
        pipeline.start().unwrap();

        for i in 1..=1_000u64 {
            pipeline.try_enqueue(Arc::new(TickRecord::trade("AXIS", 1100.0, 1, i)));
        }
        wait_until(|| pipeline.snapshot().processed == 1_000);

        for _ in 0..5 {
            assert!(pipeline.health_report().throughput_per_sec > 0.0);
        }

        let periodic = pipeline.record_health_report();
        assert!(periodic.throughput_per_sec > 0.0);
        assert_eq!(periodic.processed, 1_000);

        // Nothing processed since the committed report
        assert_eq!(pipeline.health_report().throughput_per_sec, 0.0);
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_shutdown_racing_producers_strands_nothing() {
        let pipeline = Arc::new(TickPipeline::new(PipelineConfig::default()).unwrap());
        let sink = RecordingSink::new();
        pipeline.rebuild_subscriptions(&subscriptions("RACE", sink)).unwrap();
        pipeline.start().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    let symbol = format!("RACE{}", p);
                    let mut accepted = 0u64;
                    let mut volume = 0u64;
                    while pipeline.is_accepting() {
                        volume += 1;
                        let tick = Arc::new(TickRecord::trade(symbol.as_str(), 100.0, 1, volume));
                        if pipeline.try_enqueue(tick) {
                            accepted += 1;
                        }
                    }
                    accepted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        pipeline.shutdown(Duration::from_secs(5)).unwrap();
        let accepted: u64 = producers.into_iter().map(|h| h.join().unwrap()).sum();

        let stats = pipeline.snapshot();
        assert!(accepted > 0);
        assert_eq!(stats.enqueued, accepted);
        assert_eq!(stats.processed, accepted);
        assert_eq!(stats.pending, 0);
    }
}
