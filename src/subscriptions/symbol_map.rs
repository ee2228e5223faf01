use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

/// Native (feed) symbol → canonical symbol mapping
///
/// Published wholesale like the callback cache; workers only ever read it.
pub struct SymbolMap {
    mapping: ArcSwap<HashMap<String, Arc<str>>>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self {
            mapping: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Replace the whole mapping
    pub fn publish(&self, mapping: HashMap<String, String>) {
        let mapping: HashMap<String, Arc<str>> = mapping
            .into_iter()
            .map(|(native, canonical)| (native, Arc::from(canonical)))
            .collect();
        let count = mapping.len();

        self.mapping.store(Arc::new(mapping));
        tracing::info!("🗺️  Symbol mapping published ({} entries)", count);
    }

    /// Canonical name for `native`, or `native` itself when unmapped
    #[inline]
    pub fn canonical(&self, native: &Arc<str>) -> Arc<str> {
        self.mapping
            .load()
            .get(&**native)
            .cloned()
            .unwrap_or_else(|| Arc::clone(native))
    }

    pub fn len(&self) -> usize {
        self.mapping.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new()
    }
}
