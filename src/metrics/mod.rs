pub mod health;
pub mod latency;

pub use health::{
    classify, HealthAlert, HealthInputs, HealthReport, HealthSignal, HealthStatus,
    PerformanceMonitor,
};
pub use latency::{LatencyStats, LatencyTracker};
