use crate::config::BackpressureConfig;

/// Classifies symbols for load shedding
///
/// Only consulted once a shard is already above its warning threshold, so
/// implementations can afford simple string work.
pub trait SymbolPriorityPolicy: Send + Sync {
    /// Exempt from dropping until the ring is completely full
    fn is_essential(&self, symbol: &str) -> bool;

    /// First to be shed under load
    fn is_low_priority(&self, symbol: &str) -> bool;
}

/// Allow-list / marker based classification
///
/// A symbol is essential if it equals an allow-listed name, ignoring case and
/// an optional `EXCHANGE:` prefix. It is low priority if it contains any marker
/// substring (test or demo instruments).
#[derive(Debug, Clone, Default)]
pub struct ListPriorityPolicy {
    essential: Vec<String>,
    low_priority_markers: Vec<String>,
}

impl ListPriorityPolicy {
    pub fn new(essential: &[String], low_priority_markers: &[String]) -> Self {
        Self {
            essential: essential.iter().map(|s| s.to_ascii_uppercase()).collect(),
            low_priority_markers: low_priority_markers
                .iter()
                .map(|s| s.to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn from_config(config: &BackpressureConfig) -> Self {
        Self::new(&config.essential_symbols, &config.low_priority_markers)
    }
}

impl SymbolPriorityPolicy for ListPriorityPolicy {
    fn is_essential(&self, symbol: &str) -> bool {
        let bare = symbol.rsplit_once(':').map_or(symbol, |(_, name)| name);
        self.essential
            .iter()
            .any(|name| name.eq_ignore_ascii_case(bare))
    }

    fn is_low_priority(&self, symbol: &str) -> bool {
        if self.low_priority_markers.is_empty() {
            return false;
        }
        let upper = symbol.to_ascii_uppercase();
        self.low_priority_markers
            .iter()
            .any(|marker| upper.contains(marker.as_str()))
    }
}
