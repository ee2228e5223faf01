use arc_swap::{ArcSwap, Guard};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use super::pending::{PendingInitTracker, PendingStatus};
use crate::market_data::MarketDataSink;
use crate::models::{ConsumerId, InstrumentKind, SubscriptionInfo, SubscriptionRequest};
use crate::pipeline::errors::PipelineError;

/// One resolved consumer callback for a symbol
#[derive(Clone)]
pub struct CallbackEntry {
    pub consumer: Arc<dyn MarketDataSink>,
    pub context: u64,
}

impl fmt::Debug for CallbackEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEntry")
            .field("consumer_id", &self.consumer.consumer_id())
            .field("context", &self.context)
            .finish()
    }
}

/// Immutable symbol → callbacks view, replaced wholesale on every rebuild
#[derive(Debug, Default)]
pub struct CacheSnapshot {
    generation: u64,
    built_at: Option<DateTime<Utc>>,
    subscriptions: HashMap<String, SubscriptionInfo>,
    callbacks: HashMap<String, Arc<[CallbackEntry]>>,
}

impl CacheSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Callbacks for a canonical symbol; `None` when nobody is (ready and) subscribed
    #[inline]
    pub fn callbacks(&self, symbol: &str) -> Option<&[CallbackEntry]> {
        self.callbacks.get(symbol).map(|entries| &**entries)
    }

    pub fn info(&self, symbol: &str) -> Option<&SubscriptionInfo> {
        self.subscriptions.get(symbol)
    }

    pub fn kind(&self, symbol: &str) -> InstrumentKind {
        self.subscriptions
            .get(symbol)
            .map(|info| info.kind)
            .unwrap_or_default()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    pub fn symbol_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.values().map(|entries| entries.len()).sum()
    }
}

/// A snapshot built off to the side, not yet published
struct BuiltSnapshot {
    snapshot: CacheSnapshot,
    pending_callbacks: usize,
    truncated: usize,
    /// Every consumer named by the symbols that made it into the snapshot
    consumers: HashSet<ConsumerId>,
}

/// Outcome of one `rebuild` call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RebuildSummary {
    pub cache: String,
    pub generation: u64,
    pub symbols: usize,
    pub callbacks: usize,
    /// Subscribers skipped because their consumer was not ready
    pub pending_callbacks: usize,
    /// Symbols cut by `max_cached_symbols`
    pub truncated: usize,
    /// False when a newer rebuild was published first and this one was discarded
    pub published: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub cache: String,
    pub generation: u64,
    pub symbols: usize,
    pub callbacks: usize,
    pub rebuilds: u64,
    pub failed_rebuilds: u64,
    pub pending_consumers: usize,
    pub abandoned_consumers: usize,
    pub built_at: Option<DateTime<Utc>>,
}

/// Symbol → consumer callback cache read by every shard worker
///
/// Readers load the current snapshot without locking. Rebuilds construct a
/// complete new snapshot off to the side; only the final swap happens under
/// `publish_lock`, and a rebuild that started earlier than the one already
/// published is discarded so the newest request always wins.
pub struct SubscriptionCache {
    name: &'static str,
    current: ArcSwap<CacheSnapshot>,
    publish_lock: Mutex<()>,
    /// Ticket handed to each rebuild on entry
    requested: AtomicU64,
    pending: PendingInitTracker,
    max_cached_symbols: Option<usize>,
    /// Last successfully validated request, replayed by `retry_pending`
    last_request: Mutex<Option<Arc<HashMap<String, SubscriptionRequest>>>>,
    rebuilds: AtomicU64,
    failed_rebuilds: AtomicU64,
}

impl SubscriptionCache {
    pub fn new(name: &'static str, init_timeout: Duration, max_cached_symbols: Option<usize>) -> Self {
        Self {
            name,
            current: ArcSwap::from_pointee(CacheSnapshot::default()),
            publish_lock: Mutex::new(()),
            requested: AtomicU64::new(0),
            pending: PendingInitTracker::new(init_timeout),
            max_cached_symbols,
            last_request: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
            failed_rebuilds: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Build a new snapshot from `subscriptions` and publish it
    ///
    /// On error the previously published snapshot stays in place.
    pub fn rebuild(
        &self,
        subscriptions: &HashMap<String, SubscriptionRequest>,
    ) -> Result<RebuildSummary, PipelineError> {
        let ticket = self.requested.fetch_add(1, Ordering::AcqRel) + 1;

        let built = panic::catch_unwind(AssertUnwindSafe(|| self.build(ticket, subscriptions)));
        let BuiltSnapshot {
            snapshot,
            pending_callbacks,
            truncated,
            consumers,
        } = match built {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                return Err(self.fail(PipelineError::CacheRebuild(message)));
            }
        };

        *self.last_request.lock() = Some(Arc::new(subscriptions.clone()));

        let mut summary = RebuildSummary {
            cache: self.name.to_string(),
            generation: ticket,
            symbols: snapshot.symbol_count(),
            callbacks: snapshot.callback_count(),
            pending_callbacks,
            truncated,
            published: false,
        };

        {
            let _guard = self.publish_lock.lock();
            if ticket > self.current.load().generation {
                self.current.store(Arc::new(snapshot));
                summary.published = true;

                let forgotten = self.pending.retain(&consumers);
                if forgotten > 0 {
                    tracing::debug!(
                        "🧹 {} cache stopped tracking {} unsubscribed consumers",
                        self.name,
                        forgotten
                    );
                }
            }
        }
        self.rebuilds.fetch_add(1, Ordering::Relaxed);

        if summary.published {
            tracing::info!(
                "📋 {} cache rebuilt: generation {}, {} symbols, {} callbacks ({} pending)",
                self.name,
                summary.generation,
                summary.symbols,
                summary.callbacks,
                summary.pending_callbacks
            );
        } else {
            tracing::debug!(
                "📋 {} cache rebuild {} superseded by a newer generation, discarded",
                self.name,
                ticket
            );
        }

        Ok(summary)
    }

    /// Rebuild from the last request when consumers are still initializing
    ///
    /// Returns `None` when there is nothing to retry.
    pub fn retry_pending(&self) -> Option<Result<RebuildSummary, PipelineError>> {
        self.pending.expire();
        if self.pending.pending_count() == 0 {
            return None;
        }
        let request = self.last_request.lock().clone()?;
        Some(self.rebuild(&request))
    }

    fn build(
        &self,
        generation: u64,
        subscriptions: &HashMap<String, SubscriptionRequest>,
    ) -> Result<BuiltSnapshot, PipelineError> {
        let mut symbols: Vec<&String> = subscriptions.keys().collect();
        if let Some(empty) = symbols.iter().find(|s| s.trim().is_empty()) {
            return Err(PipelineError::InvalidSubscription(format!(
                "empty symbol key {:?} in {} subscriptions",
                empty, self.name
            )));
        }
        symbols.sort_unstable();

        let mut truncated = 0;
        if let Some(cap) = self.max_cached_symbols {
            if symbols.len() > cap {
                truncated = symbols.len() - cap;
                symbols.truncate(cap);
                tracing::warn!(
                    "⚠️  {} cache capped at {} symbols, dropped {} subscriptions",
                    self.name,
                    cap,
                    truncated
                );
            }
        }

        let mut snapshot = CacheSnapshot {
            generation,
            built_at: Some(Utc::now()),
            subscriptions: HashMap::with_capacity(symbols.len()),
            callbacks: HashMap::with_capacity(symbols.len()),
        };
        let mut pending_total = 0;
        let mut consumers = HashSet::new();

        for symbol in symbols {
            let request = &subscriptions[symbol];
            let mut entries = Vec::with_capacity(request.subscribers.len());
            let mut pending = 0;

            for subscriber in &request.subscribers {
                let consumer = subscriber.sink.consumer_id();
                consumers.insert(consumer);
                if subscriber.sink.is_ready() {
                    self.pending.mark_ready(consumer);
                    entries.push(CallbackEntry {
                        consumer: Arc::clone(&subscriber.sink),
                        context: subscriber.context,
                    });
                } else if self.pending.observe_not_ready(consumer, symbol) == PendingStatus::Waiting {
                    pending += 1;
                }
            }

            pending_total += pending;
            snapshot.subscriptions.insert(
                symbol.clone(),
                SubscriptionInfo {
                    symbol: symbol.clone(),
                    kind: request.kind,
                    active_callbacks: entries.len(),
                    pending_callbacks: pending,
                },
            );
            if !entries.is_empty() {
                snapshot.callbacks.insert(symbol.clone(), Arc::from(entries));
            }
        }

        Ok(BuiltSnapshot {
            snapshot,
            pending_callbacks: pending_total,
            truncated,
            consumers,
        })
    }

    fn fail(&self, error: PipelineError) -> PipelineError {
        self.failed_rebuilds.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            "❌ {} cache rebuild failed, keeping generation {}: {}",
            self.name,
            self.current.load().generation,
            error
        );
        error
    }

    /// Callbacks for a canonical symbol in the current snapshot
    pub fn lookup(&self, symbol: &str) -> Option<Arc<[CallbackEntry]>> {
        self.current.load().callbacks.get(symbol).cloned()
    }

    /// Current snapshot, kept alive for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.current.load_full()
    }

    /// Cheap borrow of the current snapshot for the dispatch hot path
    #[inline]
    pub fn load(&self) -> Guard<Arc<CacheSnapshot>> {
        self.current.load()
    }

    pub fn stats(&self) -> CacheStats {
        let snapshot = self.current.load();
        CacheStats {
            cache: self.name.to_string(),
            generation: snapshot.generation,
            symbols: snapshot.symbol_count(),
            callbacks: snapshot.callback_count(),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
            failed_rebuilds: self.failed_rebuilds.load(Ordering::Relaxed),
            pending_consumers: self.pending.pending_count(),
            abandoned_consumers: self.pending.abandoned_count(),
            built_at: snapshot.built_at,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
