//! Per-trace analysis
//!
//! Summarizes a flushed trace: span counts and total durations per
//! `Kind.name`, whether any span failed, and whether the root was slow.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::domain::span::{Span, SpanId, SpanKind, SpanStatus, TraceId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NameStats {
    pub count: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    pub span_count: usize,
    pub root_span_id: Option<SpanId>,
    pub root_duration_ms: Option<u64>,
    pub has_error: bool,
    pub slow_root: bool,
    pub by_name: BTreeMap<String, NameStats>,
}

impl TraceSummary {
    pub fn needs_attention(&self) -> bool {
        self.has_error || self.slow_root
    }
}

/// Stats key for a span, client and server spans are prefixed with their kind
fn describe(span: &Span) -> String {
    match span.kind {
        SpanKind::Client => format!("Client.{}", span.name),
        SpanKind::Server => format!("Server.{}", span.name),
        _ => span.name.clone(),
    }
}

pub fn summarize(trace_id: TraceId, spans: &[Span], slow_threshold: Duration) -> TraceSummary {
    let mut by_name: BTreeMap<String, NameStats> = BTreeMap::new();
    for span in spans {
        // Spans without usable timestamps are left out of the per-name stats
        let Some(duration) = span.duration() else {
            continue;
        };
        let stats = by_name.entry(describe(span)).or_default();
        stats.count += 1;
        stats.total_duration_ms += duration.as_millis() as u64;
    }

    let root = spans.iter().find(|s| s.is_root());
    let root_duration = root.and_then(Span::duration);

    TraceSummary {
        trace_id,
        span_count: spans.len(),
        root_span_id: root.map(|s| s.span_id),
        root_duration_ms: root_duration.map(|d| d.as_millis() as u64),
        has_error: spans.iter().any(|s| s.status == SpanStatus::Error),
        slow_root: root_duration.is_some_and(|d| d > slow_threshold),
        by_name,
    }
}
