use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// Highest trackable value: 10 seconds in nanoseconds
const MAX_TRACKABLE_NS: u64 = 10_000_000_000;

fn histogram() -> Histogram<u64> {
    // 1ns to 10 seconds, 3 significant figures
    Histogram::new_with_bounds(1, MAX_TRACKABLE_NS, 3).expect("constant histogram bounds are valid")
}

/// High-precision latency tracker for one shard using HDR Histograms
#[derive(Clone)]
pub struct LatencyTracker {
    /// Enqueue to end of dispatch
    end_to_end_ns: Histogram<u64>,

    /// Time spent dispatching one tick
    processing_ns: Histogram<u64>,

    /// Individual consumer callbacks
    callback_ns: Histogram<u64>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self {
            end_to_end_ns: histogram(),
            processing_ns: histogram(),
            callback_ns: histogram(),
        }
    }

    #[inline]
    pub fn record_end_to_end(&mut self, latency: Duration) {
        self.end_to_end_ns.saturating_record(as_nanos(latency));
    }

    #[inline]
    pub fn record_processing(&mut self, latency: Duration) {
        self.processing_ns.saturating_record(as_nanos(latency));
    }

    #[inline]
    pub fn record_callback(&mut self, latency: Duration) {
        self.callback_ns.saturating_record(as_nanos(latency));
    }

    pub fn end_to_end_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("end_to_end", &self.end_to_end_ns)
    }

    pub fn processing_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("processing", &self.processing_ns)
    }

    pub fn callback_stats(&self) -> LatencyStats {
        LatencyStats::from_histogram("callback", &self.callback_ns)
    }

    pub fn all_stats(&self) -> Vec<LatencyStats> {
        vec![
            self.end_to_end_stats(),
            self.processing_stats(),
            self.callback_stats(),
        ]
    }

    /// Fold another tracker's samples into this one (pipeline-wide view)
    pub fn merge(&mut self, other: &LatencyTracker) {
        // Same bounds on both sides, so adding cannot fail
        let _ = self.end_to_end_ns.add(&other.end_to_end_ns);
        let _ = self.processing_ns.add(&other.processing_ns);
        let _ = self.callback_ns.add(&other.callback_ns);
    }

    /// Reset all histograms
    pub fn reset(&mut self) {
        self.end_to_end_ns.clear();
        self.processing_ns.clear();
        self.callback_ns.clear();
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn as_nanos(latency: Duration) -> u64 {
    u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct LatencyStats {
    pub metric_name: String,
    pub p50_ns: u64,
    pub p95_ns: u64,
    pub p99_ns: u64,
    pub p999_ns: u64,
    pub max_ns: u64,
    pub min_ns: u64,
    pub mean_ns: f64,
    pub sample_count: u64,
}

impl LatencyStats {
    fn from_histogram(metric_name: &str, histogram: &Histogram<u64>) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            p50_ns: histogram.value_at_quantile(0.50),
            p95_ns: histogram.value_at_quantile(0.95),
            p99_ns: histogram.value_at_quantile(0.99),
            p999_ns: histogram.value_at_quantile(0.999),
            max_ns: histogram.max(),
            min_ns: histogram.min(),
            mean_ns: histogram.mean(),
            sample_count: histogram.len(),
        }
    }

    /// Convert nanoseconds to microseconds for display
    pub fn p50_us(&self) -> f64 {
        self.p50_ns as f64 / 1000.0
    }

    pub fn p95_us(&self) -> f64 {
        self.p95_ns as f64 / 1000.0
    }

    pub fn p99_us(&self) -> f64 {
        self.p99_ns as f64 / 1000.0
    }

    pub fn p999_us(&self) -> f64 {
        self.p999_ns as f64 / 1000.0
    }

    pub fn max_us(&self) -> f64 {
        self.max_ns as f64 / 1000.0
    }

    pub fn min_us(&self) -> f64 {
        self.min_ns as f64 / 1000.0
    }

    pub fn mean_us(&self) -> f64 {
        self.mean_ns / 1000.0
    }
}
