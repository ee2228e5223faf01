use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::pipeline::TickPipeline;

use super::handlers::*;
use super::openapi::ApiDocV1;

/// Create the diagnostics router with Swagger UI
pub fn create_router(pipeline: Arc<TickPipeline>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/v1/openapi.json", ApiDocV1::openapi()))
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/pipeline/stats", get(get_pipeline_stats))
        .route("/api/v1/pipeline/shards/:shard_id", get(get_shard))
        .route("/api/v1/pipeline/diagnostics", get(get_diagnostics))
        .route("/api/v1/pipeline/reset", post(reset_pipeline))
        .with_state(pipeline)
}
