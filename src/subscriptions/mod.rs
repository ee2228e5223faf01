//! Subscription routing tables shared by all shard workers
//!
//! Both the callback caches and the symbol mapping are published as immutable
//! snapshots; workers read whichever snapshot is current when a tick arrives.

pub mod cache;
pub mod pending;
pub mod routes;
pub mod symbol_map;

pub use cache::{CacheSnapshot, CacheStats, CallbackEntry, RebuildSummary, SubscriptionCache};
pub use pending::{PendingInitTracker, PendingStatus};
pub use routes::SubscriptionRoutes;
pub use symbol_map::SymbolMap;
