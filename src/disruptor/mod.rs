//! Fixed-capacity slot ring backing every shard
//!
//! Slots are allocated once and reused for the life of the pipeline.

pub mod ring_buffer;

pub use ring_buffer::{SlotEntry, TickRing};
