use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::TickRecord;

/// Per-symbol memory of the previous tick
///
/// Owned by exactly one shard worker; nothing else ever reads or writes it,
/// so it carries no synchronization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolState {
    pub previous_cumulative_volume: u64,
    pub previous_price: f64,
    pub last_tick_time: Option<DateTime<Utc>>,
    /// Book depth (levels per side) seen on the previous depth tick
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub ticks_seen: u64,
}

/// What changed between the previous tick and this one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDelta {
    /// Quantity traded since the previous tick, never negative
    pub volume_delta: u64,
    /// Price moved by more than the epsilon since the previous tick
    pub price_changed: bool,
}

impl SymbolState {
    /// Fold a tick into the state and return the derived deltas
    ///
    /// Volume delta is `current - previous` once a cumulative volume has been
    /// observed, clamped to zero when the counter goes backwards (session
    /// reset). Before that the tick's own last-trade quantity seeds it.
    pub fn apply(&mut self, tick: &TickRecord, price_epsilon: f64) -> TickDelta {
        let current = tick.cumulative_volume;
        let volume_delta = if self.previous_cumulative_volume > 0 {
            current.saturating_sub(self.previous_cumulative_volume)
        } else {
            tick.last_quantity
        };
        self.previous_cumulative_volume = current;

        let price_changed = (tick.last_price - self.previous_price).abs() > price_epsilon;
        self.previous_price = tick.last_price;

        self.last_tick_time = Some(tick.exchange_timestamp);
        self.ticks_seen += 1;

        TickDelta {
            volume_delta,
            price_changed,
        }
    }

    /// Record the new per-side depth and return the previous one
    pub fn swap_depth_levels(&mut self, bid_levels: usize, ask_levels: usize) -> (usize, usize) {
        let previous = (self.bid_levels, self.ask_levels);
        self.bid_levels = bid_levels;
        self.ask_levels = ask_levels;
        previous
    }
}

/// Symbol states for one shard, created lazily on first tick
#[derive(Debug, Default)]
pub struct SymbolStateStore {
    states: HashMap<Arc<str>, SymbolState>,
}

impl SymbolStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, symbol: &Arc<str>) -> &mut SymbolState {
        self.states.entry(Arc::clone(symbol)).or_default()
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolState> {
        self.states.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Forget every symbol (full pipeline reset)
    pub fn clear(&mut self) {
        self.states.clear();
    }
}
