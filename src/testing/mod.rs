//! Test doubles and a synthetic feed for demos, tests and benchmarks

pub mod producer;
pub mod sinks;

pub use producer::{FeedConfig, FeedInstrument, SyntheticFeed};
pub use sinks::{CountingSink, FailingSink, FailureMode, LoggingSink, RecordingSink};
