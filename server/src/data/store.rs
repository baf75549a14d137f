//! Trace aggregation store
//!
//! Buffers spans per trace until the trace's expiry deadline passes, then
//! hands the whole trace to a bounded sink from a background flush loop.
//!
//! ## Expiry
//!
//! - Non-root span: deadline moves to `now + expiry` if that is later.
//! - Root span: deadline moves to `now + root_expiry` if that is sooner, so a
//!   trace whose root has arrived flushes quickly. A later non-root span
//!   extends it again.
//!
//! The flush loop never holds the lock while sending to the sink. A trace the
//! sink does not accept within `sink_send_timeout` is dropped and counted.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::config::StoreConfig;
use crate::domain::span::{Span, TraceId};

/// A trace removed from the store, ready for downstream processing
#[derive(Debug, Clone)]
pub struct FlushedTrace {
    pub trace_id: TraceId,
    pub spans: Vec<Span>,
}

/// Snapshot of store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub spans_received: u64,
    pub traces_flushed: u64,
    pub spans_flushed: u64,
    pub traces_dropped: u64,
    pub pending_traces: usize,
}

struct PendingTrace {
    spans: Vec<Span>,
    expire_at: Instant,
}

#[derive(Default)]
struct Counters {
    spans_received: AtomicU64,
    traces_flushed: AtomicU64,
    spans_flushed: AtomicU64,
    traces_dropped: AtomicU64,
}

pub struct TraceStore {
    pending: Mutex<HashMap<TraceId, PendingTrace>>,
    expiry: Duration,
    root_expiry: Duration,
    tick: Duration,
    send_timeout: Duration,
    counters: Counters,
}

impl TraceStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            expiry: Duration::from_millis(config.expiry_ms),
            root_expiry: Duration::from_millis(config.root_expiry_ms),
            tick: Duration::from_millis(config.tick_ms),
            send_timeout: Duration::from_millis(config.sink_send_timeout_ms),
            counters: Counters::default(),
        }
    }

    /// Buffer a span under its trace id
    pub fn put_span(&self, span: Span) {
        self.put_span_at(span, Instant::now());
    }

    pub(crate) fn put_span_at(&self, span: Span, now: Instant) {
        let is_root = span.is_root();
        let candidate = now + if is_root { self.root_expiry } else { self.expiry };

        self.counters.spans_received.fetch_add(1, Ordering::Relaxed);

        let mut pending = self.pending.lock();
        match pending.entry(span.trace_id) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.spans.push(span);
                entry.expire_at = if is_root {
                    entry.expire_at.min(candidate)
                } else {
                    entry.expire_at.max(candidate)
                };
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingTrace {
                    spans: vec![span],
                    expire_at: candidate,
                });
            }
        }
    }

    /// Remove and return every trace whose deadline is at or before `now`
    pub(crate) fn expire(&self, now: Instant) -> Vec<FlushedTrace> {
        let mut pending = self.pending.lock();
        let expired: Vec<TraceId> = pending
            .iter()
            .filter(|(_, entry)| entry.expire_at <= now)
            .map(|(trace_id, _)| *trace_id)
            .collect();

        expired
            .into_iter()
            .filter_map(|trace_id| {
                pending.remove(&trace_id).map(|entry| FlushedTrace {
                    trace_id,
                    spans: entry.spans,
                })
            })
            .collect()
    }

    /// Remove and return every pending trace regardless of deadline
    pub(crate) fn drain(&self) -> Vec<FlushedTrace> {
        self.pending
            .lock()
            .drain()
            .map(|(trace_id, entry)| FlushedTrace {
                trace_id,
                spans: entry.spans,
            })
            .collect()
    }

    pub fn pending_traces(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            spans_received: self.counters.spans_received.load(Ordering::Relaxed),
            traces_flushed: self.counters.traces_flushed.load(Ordering::Relaxed),
            spans_flushed: self.counters.spans_flushed.load(Ordering::Relaxed),
            traces_dropped: self.counters.traces_dropped.load(Ordering::Relaxed),
            pending_traces: self.pending_traces(),
        }
    }

    /// Start the flush loop. Everything still pending is flushed on shutdown.
    pub fn start(
        self: &Arc<Self>,
        sink: mpsc::Sender<FlushedTrace>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(store.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(
                expiry_ms = store.expiry.as_millis() as u64,
                root_expiry_ms = store.root_expiry.as_millis() as u64,
                tick_ms = store.tick.as_millis() as u64,
                "Trace store flush loop started"
            );

            loop {
                tokio::select! {
                    biased;
                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let expired = store.expire(Instant::now());
                        store.hand_off(&sink, expired).await;
                    }
                }
            }

            let remaining = store.drain();
            if !remaining.is_empty() {
                tracing::debug!(traces = remaining.len(), "Flushing pending traces on shutdown");
            }
            store.hand_off(&sink, remaining).await;
            tracing::debug!("Trace store flush loop stopped");
        })
    }

    async fn hand_off(&self, sink: &mpsc::Sender<FlushedTrace>, traces: Vec<FlushedTrace>) {
        for trace in traces {
            let trace_id = trace.trace_id;
            let span_count = trace.spans.len();
            match sink.send_timeout(trace, self.send_timeout).await {
                Ok(()) => {
                    self.counters.traces_flushed.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .spans_flushed
                        .fetch_add(span_count as u64, Ordering::Relaxed);
                    tracing::trace!(%trace_id, span_count, "Trace flushed");
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    self.counters.traces_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%trace_id, span_count, "Trace sink full, dropping trace");
                }
                Err(SendTimeoutError::Closed(_)) => {
                    self.counters.traces_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(%trace_id, span_count, "Trace sink closed, dropping trace");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::span::SpanId;

    fn config() -> StoreConfig {
        StoreConfig {
            expiry_ms: 10_000,
            root_expiry_ms: 100,
            tick_ms: 10,
            sink_capacity: 16,
            sink_send_timeout_ms: 50,
        }
    }

    fn tid(n: u8) -> TraceId {
        TraceId::from_bytes([n; 16])
    }

    fn root(trace: u8, span: u8) -> Span {
        Span::new(tid(trace), SpanId::from_bytes([span; 8]), None)
    }

    fn child(trace: u8, span: u8, parent: u8) -> Span {
        Span::new(
            tid(trace),
            SpanId::from_bytes([span; 8]),
            Some(SpanId::from_bytes([parent; 8])),
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_non_root_uses_full_expiry() {
        let store = TraceStore::new(&config());
        let t0 = Instant::now();
        store.put_span_at(child(1, 2, 1), t0);

        assert!(store.expire(t0 + ms(9_999)).is_empty());
        let flushed = store.expire(t0 + ms(10_000));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].trace_id, tid(1));
        assert_eq!(store.pending_traces(), 0);
    }

    #[test]
    fn test_non_root_extends_deadline() {
        let store = TraceStore::new(&config());
        let t0 = Instant::now();
        store.put_span_at(child(1, 2, 1), t0);
        store.put_span_at(child(1, 3, 1), t0 + ms(5_000));

        assert!(store.expire(t0 + ms(10_000)).is_empty());
        assert_eq!(store.expire(t0 + ms(15_000))[0].spans.len(), 2);
    }

    #[test]
    fn test_root_shortens_deadline() {
        let store = TraceStore::new(&config());
        let t0 = Instant::now();
        store.put_span_at(child(1, 2, 1), t0);
        store.put_span_at(root(1, 1), t0 + ms(1_000));

        assert!(store.expire(t0 + ms(1_099)).is_empty());
        let flushed = store.expire(t0 + ms(1_100));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].spans.len(), 2);
    }

    #[test]
    fn test_late_child_extends_after_root() {
        let store = TraceStore::new(&config());
        let t0 = Instant::now();
        store.put_span_at(root(1, 1), t0);
        store.put_span_at(child(1, 2, 1), t0 + ms(50));

        assert!(store.expire(t0 + ms(200)).is_empty());
        assert_eq!(store.expire(t0 + ms(10_050))[0].spans.len(), 2);
    }

    #[test]
    fn test_expire_only_takes_due_traces() {
        let store = TraceStore::new(&config());
        let t0 = Instant::now();
        store.put_span_at(root(1, 1), t0);
        store.put_span_at(child(2, 2, 1), t0);

        let flushed = store.expire(t0 + ms(100));
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].trace_id, tid(1));
        assert_eq!(store.pending_traces(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_span_loses_nothing() {
        let store = Arc::new(TraceStore::new(&config()));
        let mut handles = Vec::new();
        for worker in 0..8u8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..250u32 {
                    let trace = (i % 5) as u8 + 1;
                    let mut span = child(trace, worker, 0xff);
                    span.name = format!("{}-{}", worker, i);
                    store.put_span(span);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let drained = store.drain();
        assert_eq!(drained.len(), 5);
        let total: usize = drained.iter().map(|t| t.spans.len()).sum();
        assert_eq!(total, 2_000);
        for trace in &drained {
            assert_eq!(trace.spans.len(), 400);
            assert!(trace.spans.iter().all(|s| s.trace_id == trace.trace_id));
        }
        assert_eq!(store.stats().spans_received, 2_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_span_while_expiring_loses_nothing() {
        let store = Arc::new(TraceStore::new(&StoreConfig {
            expiry_ms: 1,
            root_expiry_ms: 1,
            tick_ms: 1,
            sink_capacity: 4_096,
            sink_send_timeout_ms: 1_000,
        }));
        let (tx, mut rx) = mpsc::channel(4_096);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flush_loop = store.start(tx, shutdown_rx);

        let consumer = tokio::spawn(async move {
            let mut flushes = 0usize;
            let mut spans = 0usize;
            while let Some(trace) = rx.recv().await {
                assert!(trace.spans.iter().all(|s| s.trace_id == trace.trace_id));
                flushes += 1;
                spans += trace.spans.len();
            }
            (flushes, spans)
        });

        let mut writers = Vec::new();
        for worker in 0..8u8 {
            let store = Arc::clone(&store);
            writers.push(tokio::spawn(async move {
                for i in 0..250u32 {
                    let trace = (i % 5) as u8 + 1;
                    let span = if i % 50 == 0 {
                        root(trace, worker)
                    } else {
                        child(trace, worker, 0xff)
                    };
                    store.put_span(span);
                    if i % 25 == 0 {
                        tokio::time::sleep(ms(1)).await;
                    } else {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        shutdown_tx.send(true).unwrap();
        flush_loop.await.unwrap();
        // The flush loop owned the only sender, so the consumer sees the channel close
        let (flushes, spans) = consumer.await.unwrap();

        assert_eq!(spans, 2_000);
        assert!(flushes >= 5);
        let stats = store.stats();
        assert_eq!(stats.spans_received, 2_000);
        assert_eq!(stats.spans_flushed, 2_000);
        assert_eq!(stats.traces_flushed, flushes as u64);
        assert_eq!(stats.traces_dropped, 0);
        assert_eq!(stats.pending_traces, 0);
    }

    #[tokio::test]
    async fn test_flush_loop_emits_rooted_trace() {
        let store = Arc::new(TraceStore::new(&config()));
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = store.start(tx, shutdown_rx);

        store.put_span(child(1, 2, 1));
        store.put_span(root(1, 1));

        let flushed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(flushed.trace_id, tid(1));
        assert_eq!(flushed.spans.len(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let stats = store.stats();
        assert_eq!(stats.traces_flushed, 1);
        assert_eq!(stats.spans_flushed, 2);
        assert_eq!(stats.traces_dropped, 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let store = Arc::new(TraceStore::new(&config()));
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = store.start(tx, shutdown_rx);

        store.put_span(child(3, 2, 1));
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let flushed = rx.recv().await.unwrap();
        assert_eq!(flushed.trace_id, tid(3));
        assert_eq!(store.pending_traces(), 0);
    }

    #[tokio::test]
    async fn test_full_sink_drops_after_timeout() {
        let store = TraceStore::new(&config());
        let (tx, _rx) = mpsc::channel(1);
        let t0 = Instant::now();
        store.put_span_at(root(1, 1), t0);
        store.put_span_at(root(2, 1), t0);

        let expired = store.expire(t0 + ms(100));
        store.hand_off(&tx, expired).await;

        let stats = store.stats();
        assert_eq!(stats.traces_flushed, 1);
        assert_eq!(stats.traces_dropped, 1);
    }

    #[tokio::test]
    async fn test_closed_sink_drops() {
        let store = TraceStore::new(&config());
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        store.put_span(child(1, 2, 1));

        let drained = store.drain();
        store.hand_off(&tx, drained).await;
        assert_eq!(store.stats().traces_dropped, 1);
    }
}
