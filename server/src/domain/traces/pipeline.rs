//! Trace pipeline
//!
//! Single consumer of the store's flush sink:
//!
//! ```text
//! TraceStore ──mpsc──▶ TracePipeline ──▶ summarize ──▶ log
//!                                     └─▶ SpanCollector
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::analyze::summarize;
use crate::data::collector::SpanCollector;
use crate::data::store::FlushedTrace;

/// Per-message receive timeout while draining on shutdown
const DRAIN_TIMEOUT_MS: u64 = 100;

pub struct TracePipeline {
    collector: Arc<SpanCollector>,
    slow_threshold: Duration,
}

impl TracePipeline {
    pub fn new(collector: Arc<SpanCollector>, slow_threshold: Duration) -> Self {
        Self {
            collector,
            slow_threshold,
        }
    }

    /// Start consuming flushed traces until shutdown or until the sink closes
    pub fn start(
        self,
        mut rx: mpsc::Receiver<FlushedTrace>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!("TracePipeline started");
            let mut shutdown_requested = false;

            loop {
                if shutdown_requested {
                    match tokio::time::timeout(Duration::from_millis(DRAIN_TIMEOUT_MS), rx.recv())
                        .await
                    {
                        Ok(Some(trace)) => {
                            self.run(trace);
                            continue;
                        }
                        _ => break,
                    }
                }

                tokio::select! {
                    biased;
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            tracing::debug!("TracePipeline received shutdown, draining...");
                            shutdown_requested = true;
                        }
                    }
                    msg = rx.recv() => {
                        match msg {
                            Some(trace) => self.run(trace),
                            None => break,
                        }
                    }
                }
            }

            tracing::debug!("TracePipeline shutdown complete");
        })
    }

    fn run(&self, trace: FlushedTrace) {
        let summary = summarize(trace.trace_id, &trace.spans, self.slow_threshold);
        if summary.needs_attention() {
            tracing::warn!(
                trace_id = %summary.trace_id,
                spans = summary.span_count,
                root_duration_ms = ?summary.root_duration_ms,
                has_error = summary.has_error,
                slow_root = summary.slow_root,
                "Trace flagged"
            );
        } else {
            tracing::debug!(
                trace_id = %summary.trace_id,
                spans = summary.span_count,
                has_root = summary.root_span_id.is_some(),
                root_duration_ms = ?summary.root_duration_ms,
                "Trace received"
            );
        }
        for (name, stats) in &summary.by_name {
            tracing::trace!(
                trace_id = %summary.trace_id,
                name = %name,
                count = stats.count,
                total_duration_ms = stats.total_duration_ms,
                "Span stats"
            );
        }

        self.collector.add(trace);
    }
}
