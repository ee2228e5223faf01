pub mod events;
pub mod subscription;
pub mod tick;

pub use events::{DataKind, DepthOperation, DepthSide, DepthUpdate, MarketDataEvent};
pub use subscription::{
    ConsumerId, InstrumentKind, Subscriber, SubscriptionInfo, SubscriptionRequest,
};
pub use tick::{DepthLevel, MarketDepth, Ohlc, Quote, TickMode, TickRecord};
