use super::{SubscriptionCache, SymbolMap};
use crate::config::SubscriptionConfig;

/// Everything a worker needs to route a tick to its consumers
///
/// `quotes` serves trade, quote and daily-stat callbacks; `depth` serves book
/// level updates. One instance is shared by every shard.
pub struct SubscriptionRoutes {
    pub quotes: SubscriptionCache,
    pub depth: SubscriptionCache,
    pub symbol_map: SymbolMap,
}

impl SubscriptionRoutes {
    pub fn new(config: &SubscriptionConfig) -> Self {
        Self {
            quotes: SubscriptionCache::new("quotes", config.init_timeout(), config.max_cached_symbols),
            depth: SubscriptionCache::new("depth", config.init_timeout(), config.max_cached_symbols),
            symbol_map: SymbolMap::new(),
        }
    }

    /// Distinct symbols across both caches
    pub fn cached_symbols(&self) -> usize {
        let quotes = self.quotes.load();
        let depth = self.depth.load();
        quotes.symbol_count()
            + depth
                .symbols()
                .filter(|symbol| quotes.info(symbol).is_none())
                .count()
    }
}

impl Default for SubscriptionRoutes {
    fn default() -> Self {
        Self::new(&SubscriptionConfig::default())
    }
}
