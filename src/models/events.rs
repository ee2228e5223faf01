use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of scalar market-data update delivered to a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKind {
    LastTrade,
    Bid,
    Ask,
    DailyVolume,
    DailyHigh,
    DailyLow,
    DailyOpen,
    DailyClose,
    OpenInterest,
}

impl DataKind {
    /// Daily statistic kinds, forwarded independently of trade firing
    pub fn is_daily_stat(&self) -> bool {
        matches!(
            self,
            DataKind::DailyVolume
                | DataKind::DailyHigh
                | DataKind::DailyLow
                | DataKind::DailyOpen
                | DataKind::DailyClose
                | DataKind::OpenInterest
        )
    }
}

/// Scalar update: `(kind, price, size, timestamp, reserved)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketDataEvent {
    pub kind: DataKind,
    pub price: f64,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    /// Always zero; kept so the event shape matches the host sink API
    pub reserved: u64,
}

impl MarketDataEvent {
    pub fn new(kind: DataKind, price: f64, size: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            price,
            size,
            timestamp,
            reserved: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepthSide {
    Bid,
    Ask,
}

/// Level operation derived from the previous depth snapshot of the symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepthOperation {
    /// Level index not present in the previous snapshot
    Insert,
    Update,
    /// Level present previously, gone now
    Remove,
}

/// One book level update: `(side, price, size, operation, timestamp, context)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub side: DepthSide,
    /// Zero-based level position, 0 = best
    pub level: usize,
    pub price: f64,
    pub size: u64,
    pub orders: u32,
    pub operation: DepthOperation,
    pub timestamp: DateTime<Utc>,
    /// Opaque value supplied with the depth subscription
    pub context: u64,
}
