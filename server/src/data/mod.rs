//! In-memory trace data
//!
//! - `store` - Per-trace aggregation buffer with expiry and a flush loop
//! - `collector` - Flushed spans gathered for the current test run

pub mod collector;
pub mod store;

pub use collector::SpanCollector;
pub use store::{FlushedTrace, StoreStats, TraceStore};
