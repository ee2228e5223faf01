use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::models::ConsumerId;

/// Where an uninitialized consumer stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    /// Still within the initialization timeout
    Waiting,
    /// Timed out; skipped without further tracking until it reports ready
    Abandoned,
}

/// Tracks consumers whose subscriptions were skipped because they had not
/// finished initializing
pub struct PendingInitTracker {
    /// First time each consumer was seen not ready
    pending: DashMap<ConsumerId, Instant>,

    abandoned: DashSet<ConsumerId>,

    timeout: Duration,
}

impl PendingInitTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            abandoned: DashSet::new(),
            timeout,
        }
    }

    /// Note that `consumer` was not ready while building the cache for `symbol`
    pub fn observe_not_ready(&self, consumer: ConsumerId, symbol: &str) -> PendingStatus {
        if self.abandoned.contains(&consumer) {
            return PendingStatus::Abandoned;
        }

        let first_seen = *self.pending.entry(consumer).or_insert_with(|| {
            tracing::debug!(
                "⏳ Consumer {} not initialized yet, deferring subscription for {}",
                consumer,
                symbol
            );
            Instant::now()
        });

        if first_seen.elapsed() >= self.timeout {
            self.pending.remove(&consumer);
            self.abandoned.insert(consumer);
            tracing::warn!(
                "⚠️  Consumer {} never initialized within {:?}, abandoning (symbol {})",
                consumer,
                self.timeout,
                symbol
            );
            return PendingStatus::Abandoned;
        }

        PendingStatus::Waiting
    }

    /// Consumer reported ready; stop tracking it
    pub fn mark_ready(&self, consumer: ConsumerId) {
        self.pending.remove(&consumer);
        if self.abandoned.remove(&consumer).is_some() {
            tracing::info!("✅ Previously abandoned consumer {} is now ready", consumer);
        }
    }

    /// Forget consumers that no longer appear in any subscription
    ///
    /// Returns how many tracked consumers were dropped.
    pub fn retain(&self, consumers: &HashSet<ConsumerId>) -> usize {
        let before = self.pending.len() + self.abandoned.len();
        self.pending.retain(|consumer, _| consumers.contains(consumer));
        self.abandoned.retain(|consumer| consumers.contains(consumer));
        before.saturating_sub(self.pending.len() + self.abandoned.len())
    }

    /// Abandon waiting consumers whose timeout elapsed since they were first seen
    pub fn expire(&self) -> usize {
        let expired: Vec<ConsumerId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().elapsed() >= self.timeout)
            .map(|entry| *entry.key())
            .collect();

        for consumer in &expired {
            self.pending.remove(consumer);
            self.abandoned.insert(*consumer);
            tracing::warn!(
                "⚠️  Consumer {} never initialized within {:?}, abandoning",
                consumer,
                self.timeout
            );
        }
        expired.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn abandoned_count(&self) -> usize {
        self.abandoned.len()
    }
}
