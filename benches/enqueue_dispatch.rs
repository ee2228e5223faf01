//! Benchmarks for the enqueue and dispatch hot paths

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tick_pipeline::config::DispatchConfig;
use tick_pipeline::disruptor::{SlotEntry, TickRing};
use tick_pipeline::market_data::{DispatchCounters, Dispatcher};
use tick_pipeline::pipeline::shard_for;
use tick_pipeline::subscriptions::SubscriptionRoutes;
use tick_pipeline::testing::CountingSink;
use tick_pipeline::{InstrumentKind, PipelineConfig, Subscriber, SubscriptionRequest, TickPipeline, TickRecord};

const SYMBOLS: [&str; 8] = [
    "NIFTY 50", "NIFTY BANK", "RELIANCE", "INFY", "HDFCBANK", "SBIN", "TCS", "ITC",
];

fn subscriptions(sink: Arc<CountingSink>) -> HashMap<String, SubscriptionRequest> {
    SYMBOLS
        .iter()
        .map(|symbol| {
            (
                symbol.to_string(),
                SubscriptionRequest::new(InstrumentKind::Equity)
                    .with_subscriber(Subscriber::new(sink.clone())),
            )
        })
        .collect()
}

fn benchmark_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");

    group.bench_function("shard_for", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % SYMBOLS.len();
            black_box(shard_for(black_box(SYMBOLS[i]), 8))
        });
    });

    group.finish();
}

fn benchmark_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    group.throughput(Throughput::Elements(1));

    let ring = TickRing::new(1024);
    let tick = Arc::new(TickRecord::ltp("RELIANCE", 2900.0));

    group.bench_function("push_take_advance", |b| {
        b.iter(|| {
            let sequence = match ring.try_push(SlotEntry::new(Arc::clone(&tick))) {
                Ok(sequence) => sequence,
                Err(_) => unreachable!("ring drained every iteration"),
            };
            black_box(ring.take(sequence));
            ring.advance(sequence);
        });
    });

    group.finish();
}

fn benchmark_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let routes = Arc::new(SubscriptionRoutes::default());
    let sink = CountingSink::new();
    routes.quotes.rebuild(&subscriptions(sink)).expect("valid subscriptions");

    let mut dispatcher = Dispatcher::new(
        0,
        Arc::clone(&routes),
        &DispatchConfig::default(),
        Arc::new(DispatchCounters::default()),
    );

    group.bench_function("subscribed_trade", |b| {
        let mut volume = 0u64;
        b.iter_batched(
            || {
                volume += 10;
                TickRecord::trade("RELIANCE", 2900.0, 10, volume)
            },
            |tick| black_box(dispatcher.dispatch(&tick)),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("unsubscribed", |b| {
        let tick = TickRecord::ltp("UNKNOWN", 1.0);
        b.iter(|| black_box(dispatcher.dispatch(&tick)));
    });

    group.finish();
}

fn benchmark_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);

    for batch in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(batch));
        group.bench_function(format!("enqueue_and_drain_{batch}"), |b| {
            b.iter_custom(|iters| {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let pipeline = TickPipeline::new(PipelineConfig::default()).expect("default config");
                    let sink = CountingSink::new();
                    pipeline.rebuild_subscriptions(&subscriptions(sink)).expect("valid subscriptions");
                    pipeline.start().expect("workers spawn");

                    let started = Instant::now();
                    for i in 1..=batch {
                        let symbol = SYMBOLS[(i as usize) % SYMBOLS.len()];
                        pipeline.try_enqueue(Arc::new(TickRecord::trade(symbol, 100.0, 1, i)));
                    }
                    while pipeline.snapshot().processed + pipeline.snapshot().dropped < batch {
                        std::hint::spin_loop();
                    }
                    total += started.elapsed();

                    pipeline.shutdown(Duration::from_secs(5)).expect("clean shutdown");
                }
                total
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_router,
    benchmark_ring,
    benchmark_dispatch,
    benchmark_pipeline
);
criterion_main!(benches);
