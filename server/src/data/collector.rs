//! Span collector
//!
//! Accumulates flushed traces for the current test run. The orchestration
//! layer waits on it for an expected span count and then takes the batch.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::store::FlushedTrace;
use crate::domain::span::{Span, TraceId};

#[derive(Default)]
pub struct SpanCollector {
    traces: Mutex<HashMap<TraceId, Vec<Span>>>,
    notify: Notify,
}

impl SpanCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a flushed trace and wake any waiter
    pub fn add(&self, trace: FlushedTrace) {
        {
            let mut traces = self.traces.lock();
            traces
                .entry(trace.trace_id)
                .or_default()
                .extend(trace.spans);
        }
        self.notify.notify_waiters();
    }

    pub fn span_count(&self) -> usize {
        self.traces.lock().values().map(Vec::len).sum()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.lock().len()
    }

    /// Wait until at least `expected` spans are collected.
    ///
    /// Returns `false` if the timeout elapses first.
    pub async fn wait_for_spans(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so an add() between the check
            // and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.span_count() >= expected {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.span_count() >= expected;
            }
        }
    }

    /// Remove and return all collected spans
    pub fn take_all(&self) -> Vec<Span> {
        let traces = std::mem::take(&mut *self.traces.lock());
        traces.into_values().flatten().collect()
    }
}
