use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tick_pipeline::jobs::create_health_report_job;
use tick_pipeline::testing::{CountingSink, FeedConfig, LoggingSink, SyntheticFeed};
use tick_pipeline::{create_router, PipelineConfig, Subscriber, SubscriptionRequest, TickPipeline};
use tokio_cron_scheduler::JobScheduler;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tick_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PipelineConfig::from_env();
    let health_interval = config.health_report_interval();

    let pipeline = match TickPipeline::new(config) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            tracing::error!("❌ Failed to create tick pipeline: {}", e);
            return;
        }
    };

    // Demo consumers: a logger on quotes and a counter on depth
    let feed_config = FeedConfig::default();
    register_demo_subscriptions(&pipeline, &feed_config);

    if let Err(e) = pipeline.start() {
        tracing::error!("❌ Failed to start tick pipeline: {}", e);
        return;
    }

    let feed = Arc::new(SyntheticFeed::new(Arc::clone(&pipeline), feed_config));
    let feed_handle = tokio::spawn(Arc::clone(&feed).run());

    let _scheduler = initialize_cron_scheduler(Arc::clone(&pipeline), health_interval).await;

    let app = create_router(Arc::clone(&pipeline));

    let addr = std::env::var("TICK_PIPELINE_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("❌ Failed to bind {}: {}", addr, e);
            feed.stop();
            return;
        }
    };

    tracing::info!("🚀 Tick pipeline diagnostics running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/api/v1/health", addr);
    tracing::info!("📈 Stats: http://{}/api/v1/pipeline/stats", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("❌ Server error: {}", e);
    }

    feed.stop();
    if let Err(e) = feed_handle.await {
        tracing::error!("❌ Feed task failed: {}", e);
    }

    let stopping = Arc::clone(&pipeline);
    match tokio::task::spawn_blocking(move || stopping.shutdown(Duration::from_secs(5))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("❌ {}", e),
        Err(e) => tracing::error!("❌ Shutdown task failed: {}", e),
    }

    let stats = pipeline.snapshot();
    tracing::info!(
        "👋 Final: enqueued={}, processed={}, dropped={}, callbacks={}",
        stats.enqueued,
        stats.processed,
        stats.dropped,
        stats.callbacks_invoked
    );
}

fn register_demo_subscriptions(pipeline: &TickPipeline, feed: &FeedConfig) {
    let logger = LoggingSink::new("demo");
    let depth_counter = CountingSink::new();

    let mut quotes = HashMap::new();
    let mut depth = HashMap::new();
    let mut mapping = HashMap::new();

    for instrument in &feed.instruments {
        quotes.insert(
            instrument.symbol.clone(),
            SubscriptionRequest::new(instrument.kind).with_subscriber(Subscriber::new(logger.clone())),
        );
        depth.insert(
            instrument.symbol.clone(),
            SubscriptionRequest::new(instrument.kind)
                .with_subscriber(Subscriber::with_context(depth_counter.clone(), instrument.instrument_token as u64)),
        );
        mapping.insert(instrument.instrument_token.to_string(), instrument.symbol.clone());
    }

    pipeline.publish_symbol_mapping(mapping);

    for result in [
        pipeline.rebuild_subscriptions(&quotes),
        pipeline.rebuild_depth_subscriptions(&depth),
    ] {
        if let Err(e) = result {
            tracing::error!("❌ Failed to register demo subscriptions: {}", e);
        }
    }
}

/// Start the scheduler with the health report job
///
/// The returned scheduler must be kept alive for the job to keep running.
async fn initialize_cron_scheduler(
    pipeline: Arc<TickPipeline>,
    interval: Duration,
) -> Option<JobScheduler> {
    tracing::info!("⏰ Initializing cron scheduler...");

    let scheduler = match JobScheduler::new().await {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!("❌ Failed to create cron scheduler: {}", e);
            return None;
        }
    };

    if let Err(e) = create_health_report_job(pipeline, interval, &scheduler).await {
        tracing::error!("❌ Failed to register health report job: {}", e);
        return None;
    }

    if let Err(e) = scheduler.start().await {
        tracing::error!("❌ Failed to start cron scheduler: {}", e);
        return None;
    }

    tracing::info!("✅ Cron scheduler started successfully");
    Some(scheduler)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for Ctrl-C: {}", e);
        return;
    }
    tracing::info!("🛑 Ctrl-C received, shutting down");
}
