use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Streaming mode the feed delivered the tick in
///
/// Mirrors the broker ticker modes:
/// - `Ltp` carries only the last traded price
/// - `Quote` adds volume, OHLC and aggregate buy/sell quantities
/// - `Full` adds market depth and open interest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickMode {
    Ltp,
    Quote,
    Full,
}

/// Best bid or best ask
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub quantity: u64,
}

/// Session OHLC as reported by the exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// One price level of the order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: f64,
    pub quantity: u64,
    pub orders: u32,
}

/// Market depth snapshot (best 5 levels per side on most feeds)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl MarketDepth {
    /// Levels that carry resting quantity
    pub fn active_bids(&self) -> impl Iterator<Item = (usize, &DepthLevel)> {
        self.bids.iter().enumerate().filter(|(_, l)| l.quantity > 0)
    }

    pub fn active_asks(&self) -> impl Iterator<Item = (usize, &DepthLevel)> {
        self.asks.iter().enumerate().filter(|(_, l)| l.quantity > 0)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Decoded market tick
///
/// Produced by the feed decoder and shared read-only through the pipeline as
/// `Arc<TickRecord>`. Nothing downstream mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// Exchange instrument token
    pub instrument_token: u32,
    /// Native (feed) symbol, resolved to a canonical symbol by the dispatcher
    pub symbol: Arc<str>,
    pub mode: TickMode,
    pub last_price: f64,
    pub last_quantity: u64,
    /// Cumulative traded volume for the session
    pub cumulative_volume: u64,
    pub average_price: f64,
    pub total_buy_quantity: u64,
    pub total_sell_quantity: u64,
    pub bid: Option<Quote>,
    pub ask: Option<Quote>,
    pub ohlc: Ohlc,
    /// Percentage change against the previous close
    pub change_pct: f64,
    pub open_interest: u64,
    pub depth: Option<MarketDepth>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub exchange_timestamp: DateTime<Utc>,
}

impl TickRecord {
    /// Minimal LTP-mode tick
    pub fn ltp(symbol: impl Into<Arc<str>>, last_price: f64) -> Self {
        Self {
            instrument_token: 0,
            symbol: symbol.into(),
            mode: TickMode::Ltp,
            last_price,
            last_quantity: 0,
            cumulative_volume: 0,
            average_price: 0.0,
            total_buy_quantity: 0,
            total_sell_quantity: 0,
            bid: None,
            ask: None,
            ohlc: Ohlc::default(),
            change_pct: 0.0,
            open_interest: 0,
            depth: None,
            last_trade_time: None,
            exchange_timestamp: Utc::now(),
        }
    }

    /// Quote-mode tick carrying a trade print and the running session volume
    pub fn trade(
        symbol: impl Into<Arc<str>>,
        last_price: f64,
        last_quantity: u64,
        cumulative_volume: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            mode: TickMode::Quote,
            last_quantity,
            cumulative_volume,
            last_trade_time: Some(now),
            exchange_timestamp: now,
            ..Self::ltp(symbol, last_price)
        }
    }

    pub fn with_token(mut self, instrument_token: u32) -> Self {
        self.instrument_token = instrument_token;
        self
    }

    pub fn with_quotes(mut self, bid: Quote, ask: Quote) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    pub fn with_ohlc(mut self, ohlc: Ohlc) -> Self {
        self.ohlc = ohlc;
        self
    }

    pub fn with_open_interest(mut self, open_interest: u64) -> Self {
        self.open_interest = open_interest;
        self
    }

    pub fn with_depth(mut self, depth: MarketDepth) -> Self {
        self.mode = TickMode::Full;
        self.depth = Some(depth);
        self
    }

    /// Mid-price if both sides are quoted
    pub fn mid_price(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid.price > 0.0 && ask.price > 0.0 => {
                Some((bid.price + ask.price) / 2.0)
            }
            _ => None,
        }
    }

    pub fn has_depth(&self) -> bool {
        self.depth.as_ref().is_some_and(|d| !d.is_empty())
    }
}
