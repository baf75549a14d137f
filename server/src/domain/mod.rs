//! Domain logic for interop trace verification
//!
//! - `span` - Span identity model and OTLP conversion
//! - `traces` - Reconstruction, analysis and the flush pipeline
//! - `interop` - Service registry and test orchestration

pub mod interop;
pub mod span;
pub mod traces;

pub use span::{Span, SpanError, SpanId, TraceId};
pub use traces::TracePipeline;
