use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use thiserror::Error;

use crate::metrics::{HealthReport, HealthStatus};
use crate::pipeline::{PipelineStats, TickPipeline};

use super::responses::*;

/// Shared application state
pub type AppState = Arc<TickPipeline>;

/// Errors surfaced by the diagnostics API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Shard {shard_id} not found (pipeline has {shard_count} shards)")]
    ShardNotFound { shard_id: usize, shard_count: usize },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::ShardNotFound { .. } => (StatusCode::NOT_FOUND, "shard_not_found"),
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Classified pipeline health
///
/// Returns 503 while the pipeline is in a critical state so load balancers and
/// probes can react without parsing the body.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Pipeline healthy or degraded", body = HealthReport),
        (status = 503, description = "Pipeline critical", body = HealthReport)
    )
)]
pub async fn get_health(State(pipeline): State<AppState>) -> impl IntoResponse {
    let report = pipeline.health_report();
    let status = match report.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Warning => StatusCode::OK,
    };
    (status, Json(report))
}

/// Aggregated pipeline statistics with per-shard detail
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/stats",
    tag = "Pipeline",
    responses(
        (status = 200, description = "Pipeline statistics", body = PipelineStats)
    )
)]
pub async fn get_pipeline_stats(State(pipeline): State<AppState>) -> Json<PipelineStats> {
    Json(pipeline.snapshot())
}

/// Statistics and transition log for one shard
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/shards/{shard_id}",
    tag = "Pipeline",
    params(
        ("shard_id" = usize, Path, description = "Shard index")
    ),
    responses(
        (status = 200, description = "Shard statistics", body = ShardDetailResponse),
        (status = 404, description = "No such shard", body = ErrorResponse)
    )
)]
pub async fn get_shard(
    State(pipeline): State<AppState>,
    Path(shard_id): Path<usize>,
) -> Result<Json<ShardDetailResponse>, ApiError> {
    let not_found = || ApiError::ShardNotFound {
        shard_id,
        shard_count: pipeline.shard_count(),
    };

    let stats = pipeline.shard_stats(shard_id).ok_or_else(not_found)?;
    let transitions = pipeline.transition_log(shard_id).ok_or_else(not_found)?;

    Ok(Json(ShardDetailResponse { stats, transitions }))
}

/// Plain-text diagnostic dump of every shard and cache
#[utoipa::path(
    get,
    path = "/api/v1/pipeline/diagnostics",
    tag = "Pipeline",
    responses(
        (status = 200, description = "Diagnostic dump", body = String, content_type = "text/plain")
    )
)]
pub async fn get_diagnostics(State(pipeline): State<AppState>) -> String {
    pipeline.diagnostic_dump()
}

/// Clear per-symbol state on every shard
#[utoipa::path(
    post,
    path = "/api/v1/pipeline/reset",
    tag = "Pipeline",
    responses(
        (status = 202, description = "Reset requested", body = ActionResponse)
    )
)]
pub async fn reset_pipeline(State(pipeline): State<AppState>) -> (StatusCode, Json<ActionResponse>) {
    pipeline.reset();
    (
        StatusCode::ACCEPTED,
        Json(ActionResponse {
            status: "accepted".to_string(),
            message: format!("Reset requested on {} shards", pipeline.shard_count()),
        }),
    )
}
