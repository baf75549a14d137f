//! Trace processing
//!
//! - `reconstruct` - Rebuild span trees and classify broken traces
//! - `analyze` - Per-trace summary (errors, slow roots, per-name stats)
//! - `pipeline` - Consumer of the flush sink

mod analyze;
mod pipeline;
mod reconstruct;

pub use analyze::{NameStats, TraceSummary, summarize};
pub use pipeline::TracePipeline;
pub use reconstruct::{ReconstructError, Reconstruction, SimpleSpan, reconstruct_traces};
