//! Error types for pipeline operations
//!
//! Capacity exhaustion is deliberately absent: a rejected tick is reported via
//! the `bool` returned from `try_enqueue` and the drop counters, never as an
//! error value.

use thiserror::Error;

/// Errors that can occur while configuring or operating the pipeline
///
/// # Error Categories
///
/// - **Configuration Errors**: `InvalidConfig`
/// - **Subscription Errors**: `InvalidSubscription`, `CacheRebuild`
/// - **Lifecycle Errors**: `AlreadyStarted`, `ShutdownTimeout`, `WorkerSpawn`
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A configuration value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A subscription set could not be turned into a cache snapshot
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    /// Building a cache snapshot blew up part way (a consumer panicked)
    #[error("Cache rebuild failed: {0}")]
    CacheRebuild(String),

    /// `start()` was called on a pipeline whose workers are already running
    #[error("Pipeline already started")]
    AlreadyStarted,

    /// Workers did not exit within the grace period
    #[error("Shutdown timed out after {grace_ms}ms, shards still running: {shards:?}")]
    ShutdownTimeout { grace_ms: u64, shards: Vec<usize> },

    /// The OS refused to spawn a shard worker thread
    #[error("Failed to spawn worker for shard {shard}: {source}")]
    WorkerSpawn {
        shard: usize,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Returns true if this is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, PipelineError::InvalidConfig(_))
    }

    /// Returns true if a cache rebuild was refused
    pub fn is_subscription_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidSubscription(_) | PipelineError::CacheRebuild(_)
        )
    }

    /// Returns true if this error concerns worker lifecycle
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            PipelineError::AlreadyStarted
                | PipelineError::ShutdownTimeout { .. }
                | PipelineError::WorkerSpawn { .. }
        )
    }
}
