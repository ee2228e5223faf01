// Library Crate Root
// lib.rs

// The demo binary (main.rs) imports through lib.rs like an external crate
pub mod api;
pub mod backpressure;
pub mod config;
pub mod disruptor;
pub mod jobs;
pub mod market_data;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod subscriptions;
pub mod testing;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use backpressure::{BackpressureState, SymbolPriorityPolicy};
pub use config::PipelineConfig;
pub use market_data::{MarketDataSink, SinkError};
pub use metrics::{HealthReport, HealthStatus};
pub use models::{
    ConsumerId, DataKind, DepthUpdate, InstrumentKind, MarketDataEvent, Subscriber,
    SubscriptionRequest, TickRecord,
};
pub use pipeline::{PipelineError, PipelineStats, TickPipeline};
