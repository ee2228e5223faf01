use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::backpressure::StateTransition;
use crate::pipeline::ShardStats;

/// One shard with its backpressure history
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShardDetailResponse {
    pub stats: ShardStats,
    /// Recorded transitions, oldest first
    pub transitions: Vec<StateTransition>,
}

/// Acknowledgement for control requests
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub status: String,
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
