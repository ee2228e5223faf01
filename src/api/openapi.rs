use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::backpressure::{BackpressureState, BackpressureStatus, StateTransition, Thresholds};
use crate::market_data::DispatchStats;
use crate::metrics::{HealthAlert, HealthReport, HealthSignal, HealthStatus, LatencyStats};
use crate::pipeline::{PipelineStats, ShardLatency, ShardStats};
use crate::subscriptions::CacheStats;

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tick Pipeline API",
        version = "1.0.0",
        description = "Diagnostics for the sharded tick ingestion and dispatch pipeline",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::get_health,
        handlers::get_pipeline_stats,
        handlers::get_shard,
        handlers::get_diagnostics,
        handlers::reset_pipeline,
    ),
    components(
        schemas(
            HealthReport,
            HealthAlert,
            HealthStatus,
            HealthSignal,
            PipelineStats,
            ShardStats,
            ShardLatency,
            ShardDetailResponse,
            BackpressureState,
            BackpressureStatus,
            StateTransition,
            Thresholds,
            DispatchStats,
            LatencyStats,
            CacheStats,
            ActionResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Pipeline health"),
        (name = "Pipeline", description = "Pipeline statistics and control"),
    )
)]
pub struct ApiDocV1;
