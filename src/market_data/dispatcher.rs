use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use super::sink::{MarketDataSink, SinkError};
use super::symbol_state::SymbolStateStore;
use crate::config::DispatchConfig;
use crate::models::{
    ConsumerId, DataKind, DepthLevel, DepthOperation, DepthSide, DepthUpdate, MarketDataEvent,
    TickRecord,
};
use crate::subscriptions::{CallbackEntry, SubscriptionRoutes};

/// Logs the first occurrence per key and then every `every`-th one
pub struct RateLimitedLog<K> {
    every: u64,
    counts: HashMap<K, u64>,
}

impl<K: Hash + Eq> RateLimitedLog<K> {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            counts: HashMap::new(),
        }
    }

    /// Count an occurrence; returns the running count when it should be logged
    pub fn record(&mut self, key: K) -> Option<u64> {
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        (*count == 1 || *count % self.every == 0).then_some(*count)
    }

    pub fn count(&self, key: &K) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

/// Dispatch counters for one shard, written by its worker and read by stats
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub ticks_dispatched: AtomicU64,
    pub unsubscribed: AtomicU64,
    pub callbacks_invoked: AtomicU64,
    pub callback_errors: AtomicU64,
    pub callback_panics: AtomicU64,
    pub slow_callbacks: AtomicU64,
    pub callback_time_ns: AtomicU64,
    pub callback_max_ns: AtomicU64,
    pub last_trade_events: AtomicU64,
    pub quote_events: AtomicU64,
    pub daily_stat_events: AtomicU64,
    pub depth_updates: AtomicU64,
    /// Symbol states currently held by the worker
    pub tracked_symbols: AtomicU64,
}

impl DispatchCounters {
    pub fn snapshot(&self) -> DispatchStats {
        let invoked = self.callbacks_invoked.load(Ordering::Relaxed);
        let time_ns = self.callback_time_ns.load(Ordering::Relaxed);

        DispatchStats {
            ticks_dispatched: self.ticks_dispatched.load(Ordering::Relaxed),
            unsubscribed: self.unsubscribed.load(Ordering::Relaxed),
            callbacks_invoked: invoked,
            callback_errors: self.callback_errors.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            slow_callbacks: self.slow_callbacks.load(Ordering::Relaxed),
            avg_callback_us: if invoked > 0 {
                time_ns as f64 / invoked as f64 / 1_000.0
            } else {
                0.0
            },
            max_callback_us: self.callback_max_ns.load(Ordering::Relaxed) as f64 / 1_000.0,
            last_trade_events: self.last_trade_events.load(Ordering::Relaxed),
            quote_events: self.quote_events.load(Ordering::Relaxed),
            daily_stat_events: self.daily_stat_events.load(Ordering::Relaxed),
            depth_updates: self.depth_updates.load(Ordering::Relaxed),
            tracked_symbols: self.tracked_symbols.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DispatchStats {
    pub ticks_dispatched: u64,
    pub unsubscribed: u64,
    pub callbacks_invoked: u64,
    pub callback_errors: u64,
    pub callback_panics: u64,
    pub slow_callbacks: u64,
    pub avg_callback_us: f64,
    pub max_callback_us: f64,
    pub last_trade_events: u64,
    pub quote_events: u64,
    pub daily_stat_events: u64,
    pub depth_updates: u64,
    pub tracked_symbols: u64,
}

impl DispatchStats {
    pub fn callback_failures(&self) -> u64 {
        self.callback_errors + self.callback_panics
    }
}

/// Result of dispatching one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No quote or depth subscription for the symbol
    Unsubscribed,
    Delivered { callbacks: usize, failures: usize },
}

/// Runs consumer callbacks with panic isolation and timing
struct CallbackRunner {
    shard_id: usize,
    slow_threshold: Duration,
    failure_log: RateLimitedLog<ConsumerId>,
    counters: Arc<DispatchCounters>,
    /// Durations of the callbacks run for the current tick
    timings: Vec<Duration>,
    failures: usize,
}

impl CallbackRunner {
    fn run<F>(&mut self, entry: &CallbackEntry, symbol: &str, what: &str, call: F)
    where
        F: FnOnce(&dyn MarketDataSink) -> Result<(), SinkError>,
    {
        let sink = &*entry.consumer;
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| call(sink)));
        let elapsed = started.elapsed();

        let elapsed_ns = elapsed.as_nanos() as u64;
        self.counters.callbacks_invoked.fetch_add(1, Ordering::Relaxed);
        self.counters.callback_time_ns.fetch_add(elapsed_ns, Ordering::Relaxed);
        self.counters.callback_max_ns.fetch_max(elapsed_ns, Ordering::Relaxed);
        if elapsed > self.slow_threshold {
            self.counters.slow_callbacks.fetch_add(1, Ordering::Relaxed);
        }
        self.timings.push(elapsed);

        let failure = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                self.counters.callback_errors.fetch_add(1, Ordering::Relaxed);
                e.to_string()
            }
            Err(_) => {
                self.counters.callback_panics.fetch_add(1, Ordering::Relaxed);
                "callback panicked".to_string()
            }
        };
        self.failures += 1;

        let consumer = sink.consumer_id();
        if let Some(count) = self.failure_log.record(consumer) {
            tracing::warn!(
                "⚠️  [shard {}] {} callback for {} failed (consumer {}, failure #{}): {}",
                self.shard_id,
                what,
                symbol,
                consumer,
                count,
                failure
            );
        }
    }
}

/// Turns ticks into consumer callbacks for one shard
///
/// Owns the shard's symbol state store; lives on the worker thread.
pub struct Dispatcher {
    routes: Arc<SubscriptionRoutes>,
    states: SymbolStateStore,
    price_epsilon: f64,
    runner: CallbackRunner,
    events: Vec<MarketDataEvent>,
    depth: Vec<DepthUpdate>,
}

impl Dispatcher {
    pub fn new(
        shard_id: usize,
        routes: Arc<SubscriptionRoutes>,
        config: &DispatchConfig,
        counters: Arc<DispatchCounters>,
    ) -> Self {
        Self {
            routes,
            states: SymbolStateStore::new(),
            price_epsilon: config.price_epsilon,
            runner: CallbackRunner {
                shard_id,
                slow_threshold: config.slow_callback_threshold(),
                failure_log: RateLimitedLog::new(config.error_log_every),
                counters,
                timings: Vec::new(),
                failures: 0,
            },
            events: Vec::with_capacity(9),
            depth: Vec::with_capacity(20),
        }
    }

    /// Deliver one tick to every consumer subscribed to its symbol
    pub fn dispatch(&mut self, tick: &TickRecord) -> DispatchOutcome {
        let Self {
            routes,
            states,
            price_epsilon,
            runner,
            events,
            depth,
        } = self;
        runner.timings.clear();
        runner.failures = 0;

        let symbol = routes.symbol_map.canonical(&tick.symbol);
        let quote_snapshot = routes.quotes.load();
        let depth_snapshot = routes.depth.load();
        let quote_callbacks = quote_snapshot.callbacks(&symbol);
        let depth_callbacks = depth_snapshot.callbacks(&symbol);

        if quote_callbacks.is_none() && depth_callbacks.is_none() {
            runner.counters.unsubscribed.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Unsubscribed;
        }

        let is_index = quote_snapshot
            .info(&symbol)
            .or_else(|| depth_snapshot.info(&symbol))
            .is_some_and(|info| info.kind.is_index());

        let state = states.get_or_create(&symbol);
        let delta = state.apply(tick, *price_epsilon);

        // Previous per-side depth, only tracked for depth subscribers
        let previous_levels = match (&tick.depth, depth_callbacks) {
            (Some(book), Some(_)) => {
                Some(state.swap_depth_levels(level_count(&book.bids), level_count(&book.asks)))
            }
            _ => None,
        };
        runner
            .counters
            .tracked_symbols
            .store(states.len() as u64, Ordering::Relaxed);

        let mut invoked = 0;

        if let Some(callbacks) = quote_callbacks {
            events.clear();
            let fire = delta.volume_delta > 0 || (is_index && delta.price_changed);
            collect_events(tick, fire, delta.volume_delta, events);

            for event in events.iter() {
                let counter = match event.kind {
                    DataKind::LastTrade => &runner.counters.last_trade_events,
                    DataKind::Bid | DataKind::Ask => &runner.counters.quote_events,
                    _ => &runner.counters.daily_stat_events,
                };
                counter.fetch_add(callbacks.len() as u64, Ordering::Relaxed);
            }

            for entry in callbacks {
                for event in events.iter() {
                    runner.run(entry, &symbol, kind_label(event.kind), |sink| {
                        deliver(sink, event)
                    });
                    invoked += 1;
                }
            }
        }

        if let (Some(callbacks), Some((prev_bids, prev_asks))) = (depth_callbacks, previous_levels) {
            depth.clear();
            if let Some(book) = &tick.depth {
                let ts = tick.exchange_timestamp;
                collect_depth(DepthSide::Bid, &book.bids, prev_bids, ts, depth);
                collect_depth(DepthSide::Ask, &book.asks, prev_asks, ts, depth);
            }

            runner
                .counters
                .depth_updates
                .fetch_add((depth.len() * callbacks.len()) as u64, Ordering::Relaxed);

            for entry in callbacks {
                for update in depth.iter() {
                    let update = DepthUpdate {
                        context: entry.context,
                        ..*update
                    };
                    runner.run(entry, &symbol, "depth", |sink| sink.on_depth(&update));
                    invoked += 1;
                }
            }
        }

        runner.counters.ticks_dispatched.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Delivered {
            callbacks: invoked,
            failures: runner.failures,
        }
    }

    /// Durations of the callbacks run by the most recent `dispatch`
    pub fn callback_timings(&self) -> &[Duration] {
        &self.runner.timings
    }

    pub fn tracked_symbols(&self) -> usize {
        self.states.len()
    }

    pub fn symbol_state(&self, symbol: &str) -> Option<&super::SymbolState> {
        self.states.get(symbol)
    }

    /// Forget all symbol state and failure history
    pub fn reset(&mut self) {
        self.states.clear();
        self.runner.failure_log.clear();
        self.runner
            .counters
            .tracked_symbols
            .store(0, Ordering::Relaxed);
    }
}

fn deliver(sink: &dyn MarketDataSink, event: &MarketDataEvent) -> Result<(), SinkError> {
    match event.kind {
        DataKind::LastTrade => sink.on_last_trade(event),
        DataKind::Bid => sink.on_bid(event),
        DataKind::Ask => sink.on_ask(event),
        _ => sink.on_daily_stat(event),
    }
}

fn kind_label(kind: DataKind) -> &'static str {
    match kind {
        DataKind::LastTrade => "last-trade",
        DataKind::Bid => "bid",
        DataKind::Ask => "ask",
        _ => "daily-stat",
    }
}

/// Scalar events for the quote consumers of one tick
///
/// Trade and top-of-book only when the tick fires; daily statistics whenever
/// they carry a value.
fn collect_events(tick: &TickRecord, fire: bool, volume_delta: u64, out: &mut Vec<MarketDataEvent>) {
    let ts = tick.exchange_timestamp;

    if fire {
        out.push(MarketDataEvent::new(DataKind::LastTrade, tick.last_price, volume_delta, ts));
        if let Some(bid) = tick.bid.filter(|q| q.price > 0.0) {
            out.push(MarketDataEvent::new(DataKind::Bid, bid.price, bid.quantity, ts));
        }
        if let Some(ask) = tick.ask.filter(|q| q.price > 0.0) {
            out.push(MarketDataEvent::new(DataKind::Ask, ask.price, ask.quantity, ts));
        }
    }

    if tick.cumulative_volume > 0 {
        out.push(MarketDataEvent::new(DataKind::DailyVolume, 0.0, tick.cumulative_volume, ts));
    }
    let ohlc = [
        (DataKind::DailyHigh, tick.ohlc.high),
        (DataKind::DailyLow, tick.ohlc.low),
        (DataKind::DailyOpen, tick.ohlc.open),
        (DataKind::DailyClose, tick.ohlc.close),
    ];
    for (kind, price) in ohlc {
        if price != 0.0 {
            out.push(MarketDataEvent::new(kind, price, 0, ts));
        }
    }
    if tick.open_interest > 0 {
        out.push(MarketDataEvent::new(DataKind::OpenInterest, 0.0, tick.open_interest, ts));
    }
}

/// Depth of one book side: position of the deepest level with quantity, plus one
fn level_count(levels: &[DepthLevel]) -> usize {
    levels
        .iter()
        .rposition(|level| level.quantity > 0)
        .map_or(0, |i| i + 1)
}

fn collect_depth(
    side: DepthSide,
    levels: &[DepthLevel],
    previous_count: usize,
    timestamp: chrono::DateTime<chrono::Utc>,
    out: &mut Vec<DepthUpdate>,
) {
    let count = level_count(levels);

    for (level, book_level) in levels.iter().enumerate().take(count) {
        if book_level.quantity == 0 {
            continue;
        }
        out.push(DepthUpdate {
            side,
            level,
            price: book_level.price,
            size: book_level.quantity,
            orders: book_level.orders,
            operation: if level >= previous_count {
                DepthOperation::Insert
            } else {
                DepthOperation::Update
            },
            timestamp,
            context: 0,
        });
    }

    for level in count..previous_count {
        out.push(DepthUpdate {
            side,
            level,
            price: 0.0,
            size: 0,
            orders: 0,
            operation: DepthOperation::Remove,
            timestamp,
            context: 0,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentKind, MarketDepth, Ohlc, Quote, Subscriber, SubscriptionRequest};
    use crate::testing::sinks::{FailingSink, FailureMode, RecordingSink};

    fn routes() -> Arc<SubscriptionRoutes> {
        Arc::new(SubscriptionRoutes::default())
    }

    fn subscribe(
        cache: &crate::subscriptions::SubscriptionCache,
        symbol: &str,
        kind: InstrumentKind,
        sinks: Vec<Arc<dyn MarketDataSink>>,
    ) {
        let request = sinks
            .into_iter()
            .enumerate()
            .fold(SubscriptionRequest::new(kind), |req, (i, sink)| {
                req.with_subscriber(Subscriber::with_context(sink, 100 + i as u64))
            });
        cache
            .rebuild(&HashMap::from([(symbol.to_string(), request)]))
            .unwrap();
    }

    fn dispatcher(routes: &Arc<SubscriptionRoutes>) -> (Dispatcher, Arc<DispatchCounters>) {
        let counters = Arc::new(DispatchCounters::default());
        let dispatcher = Dispatcher::new(0, Arc::clone(routes), &DispatchConfig::default(), Arc::clone(&counters));
        (dispatcher, counters)
    }

    fn level(price: f64, quantity: u64) -> DepthLevel {
        DepthLevel { price, quantity, orders: 1 }
    }

    #[test]
    fn test_unsubscribed_symbol_is_skipped() {
        let routes = routes();
        let (mut dispatcher, counters) = dispatcher(&routes);

        let outcome = dispatcher.dispatch(&TickRecord::trade("TCS", 3500.0, 10, 1_000));

        assert_eq!(outcome, DispatchOutcome::Unsubscribed);
        assert_eq!(counters.snapshot().unsubscribed, 1);
        assert_eq!(dispatcher.tracked_symbols(), 0);
    }

    #[test]
    fn test_last_trade_fires_on_volume_delta() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "SBIN", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.0, 25, 10_000));
        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.5, 5, 10_250));
        // No new volume, no trade
        dispatcher.dispatch(&TickRecord::trade("SBIN", 801.0, 5, 10_250));

        assert_eq!(sink.last_trades(), vec![(800.0, 25), (800.5, 250)]);
    }

    #[test]
    fn test_volume_counter_reset_does_not_fire() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "SBIN", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.0, 25, 50_000));
        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.0, 25, 100));
        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.0, 25, 160));

        assert_eq!(sink.last_trades(), vec![(800.0, 25), (800.0, 60)]);
    }

    #[test]
    fn test_index_fires_on_price_change_only() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "NIFTY 50", InstrumentKind::Index, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        dispatcher.dispatch(&TickRecord::ltp("NIFTY 50", 22000.0));
        dispatcher.dispatch(&TickRecord::ltp("NIFTY 50", 22000.00005));
        dispatcher.dispatch(&TickRecord::ltp("NIFTY 50", 22001.25));

        assert_eq!(sink.last_trades(), vec![(22000.0, 0), (22001.25, 0)]);
    }

    #[test]
    fn test_equity_price_change_without_volume_does_not_fire() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "INFY", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        dispatcher.dispatch(&TickRecord::ltp("INFY", 1500.0));
        dispatcher.dispatch(&TickRecord::ltp("INFY", 1510.0));

        assert!(sink.last_trades().is_empty());
    }

    #[test]
    fn test_quotes_forwarded_only_when_firing() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "TCS", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        let quotes = |tick: TickRecord| {
            tick.with_quotes(
                Quote { price: 3499.5, quantity: 10 },
                Quote { price: 0.0, quantity: 0 },
            )
        };

        dispatcher.dispatch(&quotes(TickRecord::trade("TCS", 3500.0, 10, 1_000)));
        dispatcher.dispatch(&quotes(TickRecord::trade("TCS", 3500.0, 10, 1_000)));

        let bids = sink.events_of(DataKind::Bid);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, 3499.5);
        assert_eq!(bids[0].size, 10);
        // Zero-priced ask never forwarded
        assert!(sink.events_of(DataKind::Ask).is_empty());
    }

    #[test]
    fn test_daily_stats_forwarded_independently_of_firing() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "NIFTY24FUT", InstrumentKind::Future, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        let tick = TickRecord::trade("NIFTY24FUT", 22100.0, 0, 5_000)
            .with_ohlc(Ohlc { open: 22000.0, high: 22150.0, low: 0.0, close: 21980.0 })
            .with_open_interest(120_000);
        dispatcher.dispatch(&tick);
        dispatcher.dispatch(&tick);

        assert!(sink.last_trades().is_empty());
        assert_eq!(sink.events_of(DataKind::DailyVolume).len(), 2);
        assert_eq!(sink.events_of(DataKind::DailyVolume)[0].size, 5_000);
        assert_eq!(sink.events_of(DataKind::DailyHigh)[0].price, 22150.0);
        assert!(sink.events_of(DataKind::DailyLow).is_empty());
        assert_eq!(sink.events_of(DataKind::OpenInterest)[0].size, 120_000);
    }

    #[test]
    fn test_depth_insert_update_remove() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.depth, "RELIANCE", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, _) = dispatcher(&routes);

        let first = TickRecord::ltp("RELIANCE", 2500.0).with_depth(MarketDepth {
            bids: vec![level(2499.9, 10), level(2499.8, 20), level(2499.7, 30)],
            asks: vec![level(2500.1, 15)],
        });
        dispatcher.dispatch(&first);

        let updates = sink.depth_updates();
        assert_eq!(updates.len(), 4);
        assert!(updates.iter().all(|u| u.operation == DepthOperation::Insert));
        assert!(updates.iter().all(|u| u.context == 100));

        sink.clear();
        let second = TickRecord::ltp("RELIANCE", 2500.0).with_depth(MarketDepth {
            bids: vec![level(2499.9, 12)],
            asks: vec![level(2500.1, 15), level(2500.2, 40)],
        });
        dispatcher.dispatch(&second);

        let ops: Vec<(DepthSide, usize, DepthOperation)> = sink
            .depth_updates()
            .iter()
            .map(|u| (u.side, u.level, u.operation))
            .collect();
        assert_eq!(
            ops,
            vec![
                (DepthSide::Bid, 0, DepthOperation::Update),
                (DepthSide::Bid, 1, DepthOperation::Remove),
                (DepthSide::Bid, 2, DepthOperation::Remove),
                (DepthSide::Ask, 0, DepthOperation::Update),
                (DepthSide::Ask, 1, DepthOperation::Insert),
            ]
        );
    }

    #[test]
    fn test_depth_only_subscription_is_dispatched() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.depth, "HDFCBANK", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, counters) = dispatcher(&routes);

        let tick = TickRecord::trade("HDFCBANK", 1600.0, 10, 500).with_depth(MarketDepth {
            bids: vec![level(1599.9, 5)],
            asks: vec![],
        });
        let outcome = dispatcher.dispatch(&tick);

        assert_eq!(outcome, DispatchOutcome::Delivered { callbacks: 1, failures: 0 });
        assert!(sink.events().is_empty());
        assert_eq!(counters.snapshot().depth_updates, 1);
    }

    #[test]
    fn test_failing_callbacks_are_isolated() {
        let routes = routes();
        let erroring = FailingSink::new(FailureMode::ReturnError);
        let panicking = FailingSink::new(FailureMode::Panic);
        let healthy = RecordingSink::new();
        subscribe(
            &routes.quotes,
            "WIPRO",
            InstrumentKind::Equity,
            vec![erroring.clone(), panicking.clone(), healthy.clone()],
        );
        let (mut dispatcher, counters) = dispatcher(&routes);

        let outcome = dispatcher.dispatch(&TickRecord::trade("WIPRO", 450.0, 100, 100));
        assert_eq!(outcome, DispatchOutcome::Delivered { callbacks: 6, failures: 4 });

        dispatcher.dispatch(&TickRecord::trade("WIPRO", 451.0, 100, 200));

        assert_eq!(healthy.last_trades(), vec![(450.0, 100), (451.0, 100)]);
        let stats = counters.snapshot();
        // last trade + daily volume per tick
        assert_eq!(stats.callback_errors, 4);
        assert_eq!(stats.callback_panics, 4);
        assert_eq!(stats.callback_failures(), 8);
        assert_eq!(erroring.calls(), 4);
        assert_eq!(dispatcher.callback_timings().len(), 6);
    }

    #[test]
    fn test_native_symbol_resolved_through_mapping() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "NIFTY 50", InstrumentKind::Index, vec![sink.clone()]);
        routes
            .symbol_map
            .publish(HashMap::from([("256265".to_string(), "NIFTY 50".to_string())]));
        let (mut dispatcher, _) = dispatcher(&routes);

        dispatcher.dispatch(&TickRecord::ltp("256265", 22000.0));

        assert_eq!(sink.last_trades(), vec![(22000.0, 0)]);
        assert!(dispatcher.symbol_state("NIFTY 50").is_some());
        assert!(dispatcher.symbol_state("256265").is_none());
    }

    #[test]
    fn test_reset_forgets_previous_volume() {
        let routes = routes();
        let sink = RecordingSink::new();
        subscribe(&routes.quotes, "SBIN", InstrumentKind::Equity, vec![sink.clone()]);
        let (mut dispatcher, counters) = dispatcher(&routes);

        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.0, 25, 10_000));
        assert_eq!(counters.snapshot().tracked_symbols, 1);

        dispatcher.reset();
        assert_eq!(counters.snapshot().tracked_symbols, 0);

        // Re-seeded from last_quantity after reset
        dispatcher.dispatch(&TickRecord::trade("SBIN", 800.0, 7, 10_100));
        assert_eq!(sink.last_trades(), vec![(800.0, 25), (800.0, 7)]);
    }

    #[test]
    fn test_rate_limited_log() {
        let mut log = RateLimitedLog::new(3);
        let logged: Vec<Option<u64>> = (0..7).map(|_| log.record("sink")).collect();

        assert_eq!(
            logged,
            vec![Some(1), None, Some(3), None, None, Some(6), None]
        );
        assert_eq!(log.count(&"sink"), 7);
        assert_eq!(log.count(&"other"), 0);
    }
}
