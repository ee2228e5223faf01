use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::backpressure::Thresholds;
use crate::pipeline::PipelineError;

/// Pipeline configuration, fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of shards (one worker thread each)
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    /// Ring slots per shard (must be a power of two)
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Load-shedding thresholds and symbol classes
    #[serde(default)]
    pub backpressure: BackpressureConfig,

    /// Worker loop tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Callback cache behaviour
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    /// Seconds between periodic health reports
    #[serde(default = "default_health_interval")]
    pub health_report_interval_secs: u64,
}

/// Backpressure thresholds, as percentages of shard ring capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default = "default_warning_pct")]
    pub warning_pct: u8,

    #[serde(default = "default_critical_pct")]
    pub critical_pct: u8,

    #[serde(default = "default_emergency_pct")]
    pub emergency_pct: u8,

    /// Share of non-essential ticks dropped while `Critical`
    #[serde(default = "default_critical_drop_probability")]
    pub critical_drop_probability: f64,

    /// Symbols accepted until the ring is completely full
    #[serde(default = "default_essential_symbols")]
    pub essential_symbols: Vec<String>,

    /// Substrings marking symbols shed first (test/demo instruments)
    #[serde(default = "default_low_priority_markers")]
    pub low_priority_markers: Vec<String>,
}

/// Shard worker timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a single idle park before re-checking shutdown
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// How long a reserved slot may stay unpublished before it is skipped
    #[serde(default = "default_slot_ready_timeout_ms")]
    pub slot_ready_timeout_ms: u64,

    /// Busy-spin iterations before the readiness wait starts yielding
    #[serde(default = "default_spin_iterations")]
    pub spin_iterations: u32,

    /// Callbacks slower than this count as slow
    #[serde(default = "default_slow_callback_threshold_us")]
    pub slow_callback_threshold_us: u64,

    /// Log one callback failure out of every N
    #[serde(default = "default_error_log_every")]
    pub error_log_every: u64,

    /// Minimum index price move that counts as a change
    #[serde(default = "default_price_epsilon")]
    pub price_epsilon: f64,
}

/// Callback cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Seconds a consumer may stay uninitialized before it is abandoned
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Optional cap on cached symbols (memory pressure guard)
    #[serde(default)]
    pub max_cached_symbols: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            ring_capacity: default_ring_capacity(),
            backpressure: BackpressureConfig::default(),
            dispatch: DispatchConfig::default(),
            subscriptions: SubscriptionConfig::default(),
            health_report_interval_secs: default_health_interval(),
        }
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            warning_pct: default_warning_pct(),
            critical_pct: default_critical_pct(),
            emergency_pct: default_emergency_pct(),
            critical_drop_probability: default_critical_drop_probability(),
            essential_symbols: default_essential_symbols(),
            low_priority_markers: default_low_priority_markers(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            idle_wait_ms: default_idle_wait_ms(),
            slot_ready_timeout_ms: default_slot_ready_timeout_ms(),
            spin_iterations: default_spin_iterations(),
            slow_callback_threshold_us: default_slow_callback_threshold_us(),
            error_log_every: default_error_log_every(),
            price_epsilon: default_price_epsilon(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout_secs(),
            max_cached_symbols: None,
        }
    }
}

// Default value functions for serde
fn default_shard_count() -> usize {
    4
}

fn default_ring_capacity() -> usize {
    16_384
}

fn default_health_interval() -> u64 {
    30
}

fn default_warning_pct() -> u8 {
    60
}

fn default_critical_pct() -> u8 {
    80
}

fn default_emergency_pct() -> u8 {
    90
}

fn default_critical_drop_probability() -> f64 {
    0.30
}

fn default_essential_symbols() -> Vec<String> {
    ["NIFTY 50", "NIFTY BANK", "SENSEX", "INDIA VIX", "GIFT NIFTY"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_low_priority_markers() -> Vec<String> {
    ["TEST", "DEMO", "DUMMY"].iter().map(|s| s.to_string()).collect()
}

fn default_idle_wait_ms() -> u64 {
    10
}

fn default_slot_ready_timeout_ms() -> u64 {
    50
}

fn default_spin_iterations() -> u32 {
    200
}

fn default_slow_callback_threshold_us() -> u64 {
    1_000
}

fn default_error_log_every() -> u64 {
    1_000
}

fn default_price_epsilon() -> f64 {
    0.0001
}

fn default_init_timeout_secs() -> u64 {
    30
}

impl PipelineConfig {
    /// Build a configuration from `TICK_PIPELINE_*` environment variables,
    /// falling back to defaults for anything unset or unparsable
    ///
    /// `TICK_PIPELINE_SHARDS=auto` sizes the shard count to the available cores.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let shard_count = match std::env::var("TICK_PIPELINE_SHARDS").ok().as_deref() {
            Some("auto") => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(defaults.shard_count),
            Some(value) => value.parse().unwrap_or(defaults.shard_count),
            None => defaults.shard_count,
        };

        let backpressure = BackpressureConfig {
            warning_pct: env_or("TICK_PIPELINE_WARNING_PCT", defaults.backpressure.warning_pct),
            critical_pct: env_or("TICK_PIPELINE_CRITICAL_PCT", defaults.backpressure.critical_pct),
            emergency_pct: env_or(
                "TICK_PIPELINE_EMERGENCY_PCT",
                defaults.backpressure.emergency_pct,
            ),
            critical_drop_probability: env_or(
                "TICK_PIPELINE_CRITICAL_DROP_PROBABILITY",
                defaults.backpressure.critical_drop_probability,
            ),
            essential_symbols: env_list("TICK_PIPELINE_ESSENTIAL_SYMBOLS")
                .unwrap_or(defaults.backpressure.essential_symbols),
            low_priority_markers: env_list("TICK_PIPELINE_LOW_PRIORITY_MARKERS")
                .unwrap_or(defaults.backpressure.low_priority_markers),
        };

        let config = Self {
            shard_count,
            ring_capacity: env_or("TICK_PIPELINE_RING_CAPACITY", defaults.ring_capacity),
            backpressure,
            dispatch: DispatchConfig {
                slot_ready_timeout_ms: env_or(
                    "TICK_PIPELINE_SLOT_READY_TIMEOUT_MS",
                    defaults.dispatch.slot_ready_timeout_ms,
                ),
                slow_callback_threshold_us: env_or(
                    "TICK_PIPELINE_SLOW_CALLBACK_US",
                    defaults.dispatch.slow_callback_threshold_us,
                ),
                ..defaults.dispatch
            },
            subscriptions: SubscriptionConfig {
                init_timeout_secs: env_or(
                    "TICK_PIPELINE_INIT_TIMEOUT_SECS",
                    defaults.subscriptions.init_timeout_secs,
                ),
                max_cached_symbols: std::env::var("TICK_PIPELINE_MAX_CACHED_SYMBOLS")
                    .ok()
                    .and_then(|v| v.parse().ok()),
            },
            health_report_interval_secs: env_or(
                "TICK_PIPELINE_HEALTH_INTERVAL_SECS",
                defaults.health_report_interval_secs,
            ),
        };

        tracing::info!(
            "⚙️  Pipeline config: shards={}, ring_capacity={}, thresholds={}/{}/{}%",
            config.shard_count,
            config.ring_capacity,
            config.backpressure.warning_pct,
            config.backpressure.critical_pct,
            config.backpressure.emergency_pct
        );

        config
    }

    /// Check the invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.shard_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "shard_count must be at least 1".to_string(),
            ));
        }

        if !self.ring_capacity.is_power_of_two() || self.ring_capacity < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "ring_capacity must be a power of two >= 2, got {}",
                self.ring_capacity
            )));
        }

        let bp = &self.backpressure;
        if !(bp.warning_pct > 0
            && bp.warning_pct < bp.critical_pct
            && bp.critical_pct < bp.emergency_pct
            && bp.emergency_pct <= 100)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "backpressure thresholds must satisfy 0 < warning < critical < emergency <= 100, got {}/{}/{}",
                bp.warning_pct, bp.critical_pct, bp.emergency_pct
            )));
        }

        // Integer slot counts collapse on small rings; every state must stay reachable
        let slots = Thresholds::from_config(self.ring_capacity, bp);
        if !(slots.warning > 0
            && slots.warning < slots.critical
            && slots.critical < slots.emergency
            && slots.emergency < slots.maximum)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "ring_capacity {} too small for thresholds {}/{}/{}%: slot thresholds {}/{}/{} of {} are not strictly increasing",
                self.ring_capacity,
                bp.warning_pct,
                bp.critical_pct,
                bp.emergency_pct,
                slots.warning,
                slots.critical,
                slots.emergency,
                slots.maximum
            )));
        }

        if !(0.0..=1.0).contains(&bp.critical_drop_probability) {
            return Err(PipelineError::InvalidConfig(format!(
                "critical_drop_probability must be within [0, 1], got {}",
                bp.critical_drop_probability
            )));
        }

        let dispatch = &self.dispatch;
        if dispatch.idle_wait_ms == 0 || dispatch.slot_ready_timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "idle_wait_ms and slot_ready_timeout_ms must be positive".to_string(),
            ));
        }

        if dispatch.error_log_every == 0 {
            return Err(PipelineError::InvalidConfig(
                "error_log_every must be positive".to_string(),
            ));
        }

        if !(dispatch.price_epsilon >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "price_epsilon must be non-negative, got {}",
                dispatch.price_epsilon
            )));
        }

        if self.health_report_interval_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "health_report_interval_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn health_report_interval(&self) -> Duration {
        Duration::from_secs(self.health_report_interval_secs)
    }
}

impl DispatchConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn slot_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_ready_timeout_ms)
    }

    pub fn slow_callback_threshold(&self) -> Duration {
        Duration::from_micros(self.slow_callback_threshold_us)
    }
}

impl SubscriptionConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
