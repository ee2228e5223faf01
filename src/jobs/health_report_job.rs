use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::metrics::HealthReport;
use crate::pipeline::TickPipeline;

/// Register the periodic health report
///
/// Every `interval` the job:
/// - Classifies and logs a `HealthReport` for the pipeline
/// - Retries cache rebuilds still waiting on uninitialized consumers
pub async fn create_health_report_job(
    pipeline: Arc<TickPipeline>,
    interval: Duration,
    scheduler: &JobScheduler,
) -> Result<(), Box<dyn std::error::Error>> {
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);

        Box::pin(async move {
            tracing::debug!("🕐 Health report job triggered");
            run_health_check(&pipeline);
        })
    })?;

    scheduler.add(job).await?;

    tracing::info!("✅ Health report job registered");
    tracing::info!("   Schedule: every {}s", interval.as_secs());

    Ok(())
}

/// One health pass: close the reporting interval, then retry pending consumers
pub fn run_health_check(pipeline: &TickPipeline) -> HealthReport {
    let report = pipeline.record_health_report();
    report.log();

    for result in pipeline.retry_pending_subscriptions() {
        match result {
            Ok(summary) => tracing::info!(
                "🔁 Retried {} cache: {} callbacks, {} still pending",
                summary.cache,
                summary.callbacks,
                summary.pending_callbacks
            ),
            Err(e) => tracing::error!("❌ Pending subscription retry failed: {}", e),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::metrics::HealthStatus;
    use crate::models::{InstrumentKind, Subscriber, SubscriptionRequest};
    use crate::testing::sinks::RecordingSink;
    use std::collections::HashMap;

    #[test]
    fn test_health_check_retries_pending_consumers() {
        let pipeline = TickPipeline::new(PipelineConfig::default()).unwrap();
        let late = RecordingSink::not_ready();
        let subscriptions = HashMap::from([(
            "TCS".to_string(),
            SubscriptionRequest::new(InstrumentKind::Equity)
                .with_subscriber(Subscriber::new(late.clone())),
        )]);
        pipeline.rebuild_subscriptions(&subscriptions).unwrap();
        assert!(pipeline.routes().quotes.lookup("TCS").is_none());

        late.set_ready(true);
        let report = run_health_check(&pipeline);

        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(pipeline.routes().quotes.lookup("TCS").map(|c| c.len()), Some(1));
    }

    #[tokio::test]
    async fn test_job_registers_with_scheduler() {
        let pipeline = Arc::new(TickPipeline::new(PipelineConfig::default()).unwrap());
        let scheduler = JobScheduler::new().await.unwrap();

        create_health_report_job(pipeline, Duration::from_secs(30), &scheduler)
            .await
            .unwrap();
    }
}
