use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use utoipa::ToSchema;

use crate::backpressure::BackpressureState;

// Classification thresholds (percentages)
const SUCCESS_RATE_CRITICAL: f64 = 95.0;
const SUCCESS_RATE_WARNING: f64 = 99.0;
const DROP_RATE_CRITICAL: f64 = 5.0;
const DROP_RATE_WARNING: f64 = 1.0;
const SLOW_CALLBACK_WARNING: f64 = 10.0;
const RING_UTILISATION_WARNING: f64 = 80.0;

/// Overall pipeline health, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Signal that breached a threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthSignal {
    CallbackSuccessRate,
    DropRate,
    Backpressure,
    SlowCallbacks,
    SlotAnomalies,
    RingUtilisation,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthAlert {
    pub severity: HealthStatus,
    pub signal: HealthSignal,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
}

/// Raw figures the monitor classifies, gathered from the shards
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    pub queued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub callbacks_invoked: u64,
    pub callback_failures: u64,
    pub slow_callbacks: u64,
    pub avg_callback_us: f64,
    pub max_callback_us: f64,
    pub e2e_p50_us: f64,
    pub e2e_p99_us: f64,
    pub worst_backpressure: Option<BackpressureState>,
    pub warning_transitions: u64,
    pub critical_transitions: u64,
    pub slot_anomalies: u64,
    pub pending_slots: u64,
    pub total_capacity: u64,
    pub tracked_symbols: u64,
    pub cached_symbols: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub status: HealthStatus,
    /// Seconds covered by the interval rates below
    pub interval_secs: f64,

    // Totals
    pub queued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub rejected: u64,

    // Throughput
    pub throughput_per_sec: f64,
    pub peak_throughput_per_sec: f64,

    // Latency
    pub avg_callback_us: f64,
    pub max_callback_us: f64,
    pub e2e_p50_us: f64,
    pub e2e_p99_us: f64,

    // Interval rates
    pub slow_callback_pct: f64,
    pub callback_success_rate: f64,
    pub drop_rate_pct: f64,

    // Backpressure
    pub worst_backpressure: BackpressureState,
    pub warning_transitions: u64,
    pub critical_transitions: u64,
    pub slot_anomalies: u64,
    /// Anomalies since the previous committed report
    pub interval_slot_anomalies: u64,

    // Memory signals
    pub pending_slots: u64,
    pub ring_utilisation_pct: f64,
    pub tracked_symbols: u64,
    pub cached_symbols: u64,

    pub alerts: Vec<HealthAlert>,
}

impl HealthReport {
    /// Emit the report and one line per alert through tracing
    pub fn log(&self) {
        match self.status {
            HealthStatus::Healthy => tracing::info!(
                "💚 Pipeline healthy: {:.0} ticks/s (peak {:.0}), processed={}, dropped={}, e2e p99={:.1}µs, ring {:.1}%",
                self.throughput_per_sec,
                self.peak_throughput_per_sec,
                self.processed,
                self.dropped,
                self.e2e_p99_us,
                self.ring_utilisation_pct
            ),
            HealthStatus::Warning | HealthStatus::Critical => tracing::warn!(
                "🩺 Pipeline {:?}: {:.0} ticks/s, processed={}, dropped={}, success={:.2}%, backpressure={:?}",
                self.status,
                self.throughput_per_sec,
                self.processed,
                self.dropped,
                self.callback_success_rate,
                self.worst_backpressure
            ),
        }

        for alert in &self.alerts {
            match alert.severity {
                HealthStatus::Critical => tracing::error!("🚨 {}", alert.message),
                _ => tracing::warn!("⚠️  {}", alert.message),
            }
        }
    }
}

/// Counters as of the last committed report
#[derive(Debug, Clone, Copy)]
struct Baseline {
    at: Instant,
    queued: u64,
    processed: u64,
    dropped: u64,
    callbacks_invoked: u64,
    callback_failures: u64,
    slow_callbacks: u64,
    slot_anomalies: u64,
}

impl Baseline {
    fn start(at: Instant) -> Self {
        Self {
            at,
            queued: 0,
            processed: 0,
            dropped: 0,
            callbacks_invoked: 0,
            callback_failures: 0,
            slow_callbacks: 0,
            slot_anomalies: 0,
        }
    }

    fn from_inputs(at: Instant, inputs: &HealthInputs) -> Self {
        Self {
            at,
            queued: inputs.queued,
            processed: inputs.processed,
            dropped: inputs.dropped,
            callbacks_invoked: inputs.callbacks_invoked,
            callback_failures: inputs.callback_failures,
            slow_callbacks: inputs.slow_callbacks,
            slot_anomalies: inputs.slot_anomalies,
        }
    }
}

struct ReportWindow {
    baseline: Baseline,
    peak: f64,
}

/// Turns periodic counter samples into health reports
///
/// Rates, throughput and the anomaly alert cover the interval since the last
/// committed `report`. `peek` measures the same interval without moving it, so
/// ad-hoc readers never shorten the periodic window. Only reads what the shards
/// publish; never touches dispatch.
pub struct PerformanceMonitor {
    started_at: Instant,
    window: Mutex<ReportWindow>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started_at: now,
            window: Mutex::new(ReportWindow {
                baseline: Baseline::start(now),
                peak: 0.0,
            }),
        }
    }

    /// Report on the current interval without closing it
    pub fn peek(&self, inputs: &HealthInputs) -> HealthReport {
        let (baseline, peak) = {
            let window = self.window.lock();
            (window.baseline, window.peak)
        };
        let mut report = self.build(inputs, &baseline, Instant::now());
        report.peak_throughput_per_sec = peak.max(report.throughput_per_sec);
        report
    }

    /// Report on the current interval and start the next one
    pub fn report(&self, inputs: &HealthInputs) -> HealthReport {
        let mut window = self.window.lock();
        let now = Instant::now();
        let mut report = self.build(inputs, &window.baseline, now);

        window.peak = window.peak.max(report.throughput_per_sec);
        window.baseline = Baseline::from_inputs(now, inputs);
        report.peak_throughput_per_sec = window.peak;
        report
    }

    fn build(&self, inputs: &HealthInputs, baseline: &Baseline, now: Instant) -> HealthReport {
        let elapsed = now.saturating_duration_since(baseline.at).as_secs_f64();
        let processed = inputs.processed.saturating_sub(baseline.processed);
        let throughput = if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 };

        let queued = inputs.queued.saturating_sub(baseline.queued);
        let dropped = inputs.dropped.saturating_sub(baseline.dropped);
        let invoked = inputs.callbacks_invoked.saturating_sub(baseline.callbacks_invoked);
        let failures = inputs.callback_failures.saturating_sub(baseline.callback_failures);
        let slow = inputs.slow_callbacks.saturating_sub(baseline.slow_callbacks);

        let mut report = HealthReport {
            generated_at: Utc::now(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            status: HealthStatus::Healthy,
            interval_secs: elapsed,
            queued: inputs.queued,
            processed: inputs.processed,
            dropped: inputs.dropped,
            rejected: inputs.rejected,
            throughput_per_sec: throughput,
            peak_throughput_per_sec: throughput,
            avg_callback_us: inputs.avg_callback_us,
            max_callback_us: inputs.max_callback_us,
            e2e_p50_us: inputs.e2e_p50_us,
            e2e_p99_us: inputs.e2e_p99_us,
            slow_callback_pct: percent(slow, invoked),
            callback_success_rate: if invoked == 0 {
                100.0
            } else {
                100.0 - percent(failures, invoked)
            },
            drop_rate_pct: percent(dropped, queued + dropped),
            worst_backpressure: inputs.worst_backpressure.unwrap_or(BackpressureState::Normal),
            warning_transitions: inputs.warning_transitions,
            critical_transitions: inputs.critical_transitions,
            slot_anomalies: inputs.slot_anomalies,
            interval_slot_anomalies: inputs.slot_anomalies.saturating_sub(baseline.slot_anomalies),
            pending_slots: inputs.pending_slots,
            ring_utilisation_pct: percent(inputs.pending_slots, inputs.total_capacity),
            tracked_symbols: inputs.tracked_symbols,
            cached_symbols: inputs.cached_symbols,
            alerts: Vec::new(),
        };

        let (status, alerts) = classify(&report);
        report.status = status;
        report.alerts = alerts;
        report
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Apply the fixed thresholds; one alert per breached signal
pub fn classify(report: &HealthReport) -> (HealthStatus, Vec<HealthAlert>) {
    let mut alerts = Vec::new();
    let mut alert = |severity, signal, value: f64, threshold: f64, message: String| {
        alerts.push(HealthAlert {
            severity,
            signal,
            value,
            threshold,
            message,
        });
    };

    let success = report.callback_success_rate;
    if success < SUCCESS_RATE_CRITICAL {
        alert(
            HealthStatus::Critical,
            HealthSignal::CallbackSuccessRate,
            success,
            SUCCESS_RATE_CRITICAL,
            format!("Callback success rate {:.2}% below {}%", success, SUCCESS_RATE_CRITICAL),
        );
    } else if success < SUCCESS_RATE_WARNING {
        alert(
            HealthStatus::Warning,
            HealthSignal::CallbackSuccessRate,
            success,
            SUCCESS_RATE_WARNING,
            format!("Callback success rate {:.2}% below {}%", success, SUCCESS_RATE_WARNING),
        );
    }

    let drops = report.drop_rate_pct;
    if drops > DROP_RATE_CRITICAL {
        alert(
            HealthStatus::Critical,
            HealthSignal::DropRate,
            drops,
            DROP_RATE_CRITICAL,
            format!("Drop rate {:.2}% above {}%", drops, DROP_RATE_CRITICAL),
        );
    } else if drops > DROP_RATE_WARNING {
        alert(
            HealthStatus::Warning,
            HealthSignal::DropRate,
            drops,
            DROP_RATE_WARNING,
            format!("Drop rate {:.2}% above {}%", drops, DROP_RATE_WARNING),
        );
    }

    match report.worst_backpressure {
        state @ (BackpressureState::Emergency | BackpressureState::Maximum) => alert(
            HealthStatus::Critical,
            HealthSignal::Backpressure,
            state as u8 as f64,
            BackpressureState::Emergency as u8 as f64,
            format!("Backpressure at {:?}", state),
        ),
        BackpressureState::Critical => alert(
            HealthStatus::Warning,
            HealthSignal::Backpressure,
            BackpressureState::Critical as u8 as f64,
            BackpressureState::Critical as u8 as f64,
            "Backpressure at Critical".to_string(),
        ),
        _ => {}
    }

    if report.slow_callback_pct > SLOW_CALLBACK_WARNING {
        alert(
            HealthStatus::Warning,
            HealthSignal::SlowCallbacks,
            report.slow_callback_pct,
            SLOW_CALLBACK_WARNING,
            format!(
                "{:.1}% of callbacks slower than threshold (limit {}%)",
                report.slow_callback_pct, SLOW_CALLBACK_WARNING
            ),
        );
    }

    if report.interval_slot_anomalies > 0 {
        alert(
            HealthStatus::Warning,
            HealthSignal::SlotAnomalies,
            report.interval_slot_anomalies as f64,
            0.0,
            format!(
                "{} ring slots skipped after readiness timeout ({} total)",
                report.interval_slot_anomalies, report.slot_anomalies
            ),
        );
    }

    if report.ring_utilisation_pct > RING_UTILISATION_WARNING {
        alert(
            HealthStatus::Warning,
            HealthSignal::RingUtilisation,
            report.ring_utilisation_pct,
            RING_UTILISATION_WARNING,
            format!(
                "Ring utilisation {:.1}% above {}%",
                report.ring_utilisation_pct, RING_UTILISATION_WARNING
            ),
        );
    }

    let status = alerts
        .iter()
        .map(|a| a.severity)
        .max()
        .unwrap_or(HealthStatus::Healthy);
    (status, alerts)
}
