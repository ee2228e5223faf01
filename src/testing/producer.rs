use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;

use crate::models::{DepthLevel, InstrumentKind, MarketDepth, Ohlc, Quote, TickRecord};
use crate::pipeline::TickPipeline;

/// One instrument the feed quotes
#[derive(Debug, Clone)]
pub struct FeedInstrument {
    pub symbol: String,
    pub instrument_token: u32,
    pub kind: InstrumentKind,
    pub start_price: f64,
}

impl FeedInstrument {
    pub fn new(symbol: &str, instrument_token: u32, kind: InstrumentKind, start_price: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            instrument_token,
            kind,
            start_price,
        }
    }
}

/// Synthetic feed shape
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub instruments: Vec<FeedInstrument>,
    pub ticks_per_second: u32,
    /// Largest relative price move per tick, in basis points
    pub max_move_bps: f64,
    /// Share of ticks that carry a depth ladder
    pub depth_probability: f64,
    pub depth_levels: usize,
    pub tick_size: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            instruments: vec![
                FeedInstrument::new("NIFTY 50", 256265, InstrumentKind::Index, 22_000.0),
                FeedInstrument::new("NIFTY BANK", 260105, InstrumentKind::Index, 48_000.0),
                FeedInstrument::new("RELIANCE", 738561, InstrumentKind::Equity, 2_900.0),
                FeedInstrument::new("INFY", 408065, InstrumentKind::Equity, 1_500.0),
                FeedInstrument::new("HDFCBANK", 341249, InstrumentKind::Equity, 1_600.0),
                FeedInstrument::new("SBIN", 779521, InstrumentKind::Equity, 800.0),
                FeedInstrument::new("NIFTY24DECFUT", 13238786, InstrumentKind::Future, 22_050.0),
            ],
            ticks_per_second: 2_000,
            max_move_bps: 5.0,
            depth_probability: 0.25,
            depth_levels: 5,
            tick_size: 0.05,
        }
    }
}

#[derive(Debug, Clone)]
struct InstrumentState {
    symbol: Arc<str>,
    instrument_token: u32,
    kind: InstrumentKind,
    price: f64,
    cumulative_volume: u64,
    open_interest: u64,
    ohlc: Ohlc,
}

/// Kite-style random-walk tick generator feeding a pipeline
pub struct SyntheticFeed {
    pipeline: Arc<TickPipeline>,
    config: FeedConfig,
    instruments: Mutex<Vec<InstrumentState>>,
    running: AtomicBool,
    generated: AtomicU64,
    rejected: AtomicU64,
}

impl SyntheticFeed {
    pub fn new(pipeline: Arc<TickPipeline>, config: FeedConfig) -> Self {
        let instruments = config
            .instruments
            .iter()
            .map(|instrument| InstrumentState {
                symbol: Arc::from(instrument.symbol.as_str()),
                instrument_token: instrument.instrument_token,
                kind: instrument.kind,
                price: instrument.start_price,
                cumulative_volume: 0,
                open_interest: if instrument.kind == InstrumentKind::Future { 1_000_000 } else { 0 },
                ohlc: Ohlc {
                    open: instrument.start_price,
                    high: instrument.start_price,
                    low: instrument.start_price,
                    close: instrument.start_price,
                },
            })
            .collect();

        Self {
            pipeline,
            config,
            instruments: Mutex::new(instruments),
            running: AtomicBool::new(false),
            generated: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Generate and enqueue ticks until `stop()` is called
    pub async fn run(self: Arc<Self>) {
        if self.config.instruments.is_empty() || self.config.ticks_per_second == 0 {
            info!("📡 Synthetic feed has nothing to produce");
            return;
        }

        self.running.store(true, Ordering::Release);
        info!(
            "📡 Synthetic feed starting: {} instruments at {} ticks/s",
            self.config.instruments.len(),
            self.config.ticks_per_second
        );

        // Emit in 1ms batches; a per-tick timer cannot keep up at high rates
        let per_batch = (self.config.ticks_per_second as u64 / 1000).max(1) as usize;
        let period = if self.config.ticks_per_second >= 1000 {
            Duration::from_millis(1)
        } else {
            Duration::from_micros(1_000_000 / self.config.ticks_per_second as u64)
        };
        let mut ticker = interval(period);

        while self.running.load(Ordering::Acquire) {
            ticker.tick().await;
            self.publish(per_batch);
        }

        info!(
            "📡 Synthetic feed stopped: generated={}, rejected={}",
            self.generated(),
            self.rejected()
        );
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Generate `count` ticks and offer them to the pipeline
    pub fn publish(&self, count: usize) {
        for tick in self.generate_batch(count) {
            self.generated.fetch_add(1, Ordering::Relaxed);
            if !self.pipeline.try_enqueue(Arc::new(tick)) {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Advance random instruments by one tick each
    pub fn generate_batch(&self, count: usize) -> Vec<TickRecord> {
        let mut instruments = self.instruments.lock();
        if instruments.is_empty() {
            return Vec::new();
        }

        let mut rng = rand::rng();
        (0..count)
            .map(|_| {
                let index = rng.random_range(0..instruments.len());
                self.next_tick(&mut instruments[index], &mut rng)
            })
            .collect()
    }

    fn next_tick(&self, state: &mut InstrumentState, rng: &mut impl Rng) -> TickRecord {
        let tick_size = self.config.tick_size;
        let move_bps = rng.random_range(-self.config.max_move_bps..=self.config.max_move_bps);
        let raw = state.price * (1.0 + move_bps / 10_000.0);
        state.price = ((raw / tick_size).round() * tick_size).max(tick_size);

        state.ohlc.high = state.ohlc.high.max(state.price);
        state.ohlc.low = state.ohlc.low.min(state.price);
        state.ohlc.close = state.price;

        let mut tick = if state.kind.is_index() {
            TickRecord::ltp(Arc::clone(&state.symbol), state.price)
        } else {
            let quantity = rng.random_range(1..=500u64);
            state.cumulative_volume += quantity;
            TickRecord::trade(
                Arc::clone(&state.symbol),
                state.price,
                quantity,
                state.cumulative_volume,
            )
            .with_quotes(
                Quote {
                    price: state.price - tick_size,
                    quantity: rng.random_range(1..=2_000),
                },
                Quote {
                    price: state.price + tick_size,
                    quantity: rng.random_range(1..=2_000),
                },
            )
        };

        tick = tick.with_token(state.instrument_token).with_ohlc(state.ohlc);

        if state.kind == InstrumentKind::Future {
            state.open_interest = state
                .open_interest
                .saturating_add_signed(rng.random_range(-500..=500));
            tick = tick.with_open_interest(state.open_interest);
        }

        if !state.kind.is_index()
            && self.config.depth_levels > 0
            && rng.random_bool(self.config.depth_probability.clamp(0.0, 1.0))
        {
            tick = tick.with_depth(self.depth_ladder(state.price, rng));
        }

        tick
    }

    fn depth_ladder(&self, price: f64, rng: &mut impl Rng) -> MarketDepth {
        let tick_size = self.config.tick_size;
        // Ladders shrink and grow so consumers see inserts and removes
        let levels = rng.random_range(1..=self.config.depth_levels);

        let mut depth = MarketDepth {
            bids: Vec::with_capacity(levels),
            asks: Vec::with_capacity(levels),
        };
        for i in 0..levels {
            let offset = tick_size * (i + 1) as f64;
            depth.bids.push(DepthLevel {
                price: price - offset,
                quantity: rng.random_range(1..=5_000),
                orders: rng.random_range(1..=40),
            });
            depth.asks.push(DepthLevel {
                price: price + offset,
                quantity: rng.random_range(1..=5_000),
                orders: rng.random_range(1..=40),
            });
        }
        depth
    }
}
