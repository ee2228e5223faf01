/// Scheduled background tasks
///
/// - Periodic health report and pending-consumer retry

pub mod health_report_job;

pub use health_report_job::{create_health_report_job, run_health_check};
