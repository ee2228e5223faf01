use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use super::policy::SymbolPriorityPolicy;
use crate::config::BackpressureConfig;

/// Transition log entries kept per shard
const TRANSITION_LOG_CAPACITY: usize = 64;

/// Load level of a shard, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum BackpressureState {
    /// Accept everything
    Normal = 0,
    /// Shed low-priority symbols
    Warning = 1,
    /// Essential symbols only, others dropped probabilistically
    Critical = 2,
    /// Essential symbols only
    Emergency = 3,
    /// Ring full, reject everything
    Maximum = 4,
}

impl BackpressureState {
    pub const ALL: [BackpressureState; 5] = [
        BackpressureState::Normal,
        BackpressureState::Warning,
        BackpressureState::Critical,
        BackpressureState::Emergency,
        BackpressureState::Maximum,
    ];

    fn from_u8(value: u8) -> Self {
        match value {
            0 => BackpressureState::Normal,
            1 => BackpressureState::Warning,
            2 => BackpressureState::Critical,
            3 => BackpressureState::Emergency,
            _ => BackpressureState::Maximum,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Why a tick was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    LowPriority,
    Probabilistic,
    NonEssential,
    Full,
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    Drop(DropReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accept)
    }
}

/// Pending-depth thresholds in slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Thresholds {
    pub warning: u64,
    pub critical: u64,
    pub emergency: u64,
    /// Hard capacity of the ring
    pub maximum: u64,
}

impl Thresholds {
    pub fn from_config(capacity: usize, config: &BackpressureConfig) -> Self {
        let capacity = capacity as u64;
        let at = |pct: u8| capacity * pct as u64 / 100;
        Self {
            warning: at(config.warning_pct),
            critical: at(config.critical_pct),
            emergency: at(config.emergency_pct),
            maximum: capacity,
        }
    }

    /// State for a pending depth; a pure function of the depth
    pub fn level_for(&self, pending: u64) -> BackpressureState {
        if pending >= self.maximum {
            BackpressureState::Maximum
        } else if pending >= self.emergency {
            BackpressureState::Emergency
        } else if pending >= self.critical {
            BackpressureState::Critical
        } else if pending >= self.warning {
            BackpressureState::Warning
        } else {
            BackpressureState::Normal
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StateTransition {
    pub from: BackpressureState,
    pub to: BackpressureState,
    /// Pending depth that triggered the change
    pub pending: u64,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a controller
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BackpressureStatus {
    pub state: BackpressureState,
    pub thresholds: Thresholds,
    pub total_transitions: u64,
    pub warning_transitions: u64,
    pub critical_transitions: u64,
    pub emergency_transitions: u64,
    pub maximum_transitions: u64,
    /// Milliseconds spent in each state, indexed Normal..Maximum
    pub time_in_state_ms: [u64; 5],
    /// Ticks dropped while in each state, indexed Normal..Maximum
    pub drops_by_state: [u64; 5],
    pub last_transition: Option<StateTransition>,
}

struct TransitionBook {
    entered_at: Instant,
    time_in_state: [Duration; 5],
    log: VecDeque<StateTransition>,
}

/// Tiered load-shedding state machine for one shard
///
/// The level is recomputed from the shard's pending depth on every admission
/// check. Only transitions take the bookkeeping lock, so the steady state
/// costs one atomic load.
pub struct BackpressureController {
    shard_id: usize,
    thresholds: Thresholds,
    critical_drop_probability: f64,
    policy: Arc<dyn SymbolPriorityPolicy>,

    state: AtomicU8,

    /// Entries into each state
    entries: [AtomicU64; 5],

    drops: [AtomicU64; 5],

    book: Mutex<TransitionBook>,
}

impl BackpressureController {
    pub fn new(
        shard_id: usize,
        capacity: usize,
        config: &BackpressureConfig,
        policy: Arc<dyn SymbolPriorityPolicy>,
    ) -> Self {
        Self {
            shard_id,
            thresholds: Thresholds::from_config(capacity, config),
            critical_drop_probability: config.critical_drop_probability,
            policy,
            state: AtomicU8::new(BackpressureState::Normal as u8),
            entries: Default::default(),
            drops: Default::default(),
            book: Mutex::new(TransitionBook {
                entered_at: Instant::now(),
                time_in_state: [Duration::ZERO; 5],
                log: VecDeque::with_capacity(TRANSITION_LOG_CAPACITY),
            }),
        }
    }

    /// Decide whether a tick for `symbol` may enter a shard holding `pending`
    /// unconsumed items
    pub fn admit(&self, symbol: &str, pending: u64) -> Admission {
        let level = self.thresholds.level_for(pending);
        self.observe(level, pending);

        let admission = match level {
            BackpressureState::Normal => Admission::Accept,
            BackpressureState::Warning => {
                if self.policy.is_low_priority(symbol) {
                    Admission::Drop(DropReason::LowPriority)
                } else {
                    Admission::Accept
                }
            }
            BackpressureState::Critical => {
                if self.policy.is_essential(symbol) {
                    Admission::Accept
                } else if self.policy.is_low_priority(symbol) {
                    Admission::Drop(DropReason::LowPriority)
                } else if rand::random_bool(self.critical_drop_probability) {
                    Admission::Drop(DropReason::Probabilistic)
                } else {
                    Admission::Accept
                }
            }
            BackpressureState::Emergency => {
                if self.policy.is_essential(symbol) {
                    Admission::Accept
                } else {
                    Admission::Drop(DropReason::NonEssential)
                }
            }
            BackpressureState::Maximum => Admission::Drop(DropReason::Full),
        };

        if !admission.is_accepted() {
            self.record_drop(level);
        }

        admission
    }

    /// Count a drop that happened outside `admit` (ring full after a race)
    pub fn record_drop(&self, level: BackpressureState) {
        self.drops[level.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Move the state machine to `level` if it is not there already
    fn observe(&self, level: BackpressureState, pending: u64) {
        let current = self.state.load(Ordering::Relaxed);
        if current == level as u8 {
            return;
        }

        // Several producers can race here; exactly one records the change
        if self
            .state
            .compare_exchange(current, level as u8, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.record_transition(BackpressureState::from_u8(current), level, pending);
        }
    }

    fn record_transition(&self, from: BackpressureState, to: BackpressureState, pending: u64) {
        let now = Instant::now();
        {
            let mut book = self.book.lock();
            let elapsed = now.duration_since(book.entered_at);
            book.time_in_state[from.index()] += elapsed;
            book.entered_at = now;

            if book.log.len() == TRANSITION_LOG_CAPACITY {
                book.log.pop_front();
            }
            book.log.push_back(StateTransition {
                from,
                to,
                pending,
                at: Utc::now(),
            });
        }
        self.entries[to.index()].fetch_add(1, Ordering::Relaxed);

        if to > from {
            tracing::warn!(
                "🚦 Shard {} backpressure {:?} -> {:?} (pending={}/{})",
                self.shard_id,
                from,
                to,
                pending,
                self.thresholds.maximum
            );
        } else {
            tracing::info!(
                "🚦 Shard {} backpressure {:?} -> {:?} (pending={}/{})",
                self.shard_id,
                from,
                to,
                pending,
                self.thresholds.maximum
            );
        }
    }

    pub fn state(&self) -> BackpressureState {
        BackpressureState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn total_drops(&self) -> u64 {
        self.drops.iter().map(|d| d.load(Ordering::Relaxed)).sum()
    }

    /// Recorded transitions, oldest first
    pub fn transition_log(&self) -> Vec<StateTransition> {
        self.book.lock().log.iter().cloned().collect()
    }

    pub fn status(&self) -> BackpressureStatus {
        let state = self.state();
        let (time_in_state, last_transition) = {
            let book = self.book.lock();
            let mut time_in_state = book.time_in_state;
            time_in_state[state.index()] += book.entered_at.elapsed();
            (time_in_state, book.log.back().cloned())
        };

        let entries: Vec<u64> = self
            .entries
            .iter()
            .map(|e| e.load(Ordering::Relaxed))
            .collect();

        BackpressureStatus {
            state,
            thresholds: self.thresholds,
            total_transitions: entries.iter().sum(),
            warning_transitions: entries[BackpressureState::Warning.index()],
            critical_transitions: entries[BackpressureState::Critical.index()],
            emergency_transitions: entries[BackpressureState::Emergency.index()],
            maximum_transitions: entries[BackpressureState::Maximum.index()],
            time_in_state_ms: time_in_state.map(|d| d.as_millis() as u64),
            drops_by_state: std::array::from_fn(|i| self.drops[i].load(Ordering::Relaxed)),
            last_transition,
        }
    }
}
