//! Consumer-facing side of the pipeline
//!
//! `Dispatcher` turns a tick into callbacks on the `MarketDataSink`s subscribed
//! to its symbol, using the per-shard `SymbolStateStore` to derive volume
//! deltas, index price moves and depth level operations.

pub mod dispatcher;
pub mod sink;
pub mod symbol_state;

pub use dispatcher::{DispatchCounters, DispatchOutcome, DispatchStats, Dispatcher, RateLimitedLog};
pub use sink::{MarketDataSink, SinkError};
pub use symbol_state::{SymbolState, SymbolStateStore, TickDelta};
