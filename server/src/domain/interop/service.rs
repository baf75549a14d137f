//! Interop run orchestration
//!
//! A run sends one test request per registered server, waits until the
//! expected spans have been collected (or the wait elapses), reconstructs
//! every trace it received and records a report. Runs execute one at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use super::error::InteropError;
use super::executor::TestExecutor;
use super::registry::ServiceRegistry;
use super::types::{CaseResult, RunReport, RunState, Status, TestRequest, TraceVerdict};
use crate::core::config::CoordinatorConfig;
use crate::data::SpanCollector;
use crate::domain::span::{Span, TraceId};
use crate::domain::traces::reconstruct_traces;

#[derive(Default)]
struct RunTable {
    states: HashMap<u64, RunState>,
    completed: VecDeque<u64>,
}

pub struct InteropService {
    registry: Arc<ServiceRegistry>,
    collector: Arc<SpanCollector>,
    executor: Arc<dyn TestExecutor>,
    span_wait: Duration,
    max_results: usize,
    next_id: AtomicU64,
    runs: Mutex<RunTable>,
    run_lock: tokio::sync::Mutex<()>,
}

impl InteropService {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        collector: Arc<SpanCollector>,
        executor: Arc<dyn TestExecutor>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            collector,
            executor,
            span_wait: Duration::from_secs(config.span_wait_secs),
            max_results: config.max_results.max(1),
            next_id: AtomicU64::new(u64::from(rand::random::<u32>()) + 1),
            runs: Mutex::new(RunTable::default()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Start a run in the background and return its id
    pub fn run(self: &Arc<Self>) -> Result<u64, InteropError> {
        if self.registry.is_empty() {
            return Err(InteropError::NoRegisteredServers);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started_at = Utc::now();
        self.runs
            .lock()
            .states
            .insert(id, RunState::Running { id, started_at });
        tracing::info!(run_id = id, servers = self.registry.len(), "Interop run queued");

        let service = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = service.run_lock.lock().await;
            let report = service.execute_run(id, started_at).await;
            service.complete(report);
        });

        Ok(id)
    }

    /// State of a run, if it is still retained
    pub fn result(&self, id: u64) -> Option<RunState> {
        self.runs.lock().states.get(&id).cloned()
    }

    async fn execute_run(&self, id: u64, started_at: chrono::DateTime<Utc>) -> RunReport {
        let cases: Vec<TestRequest> = self
            .registry
            .list()
            .into_iter()
            .enumerate()
            .map(|(i, (name, service_hops))| TestRequest {
                id: i as u64 + 1,
                name,
                service_hops,
            })
            .collect();

        let stale = self.collector.take_all();
        if !stale.is_empty() {
            tracing::debug!(run_id = id, spans = stale.len(), "Discarded stale spans");
        }

        let outcomes =
            futures::future::join_all(cases.iter().map(|case| self.executor.execute(case))).await;

        let mut spans_expected = 0;
        let mut case_results = Vec::with_capacity(cases.len());
        for (case, outcome) in cases.iter().zip(outcomes) {
            let expected_spans = case.expected_spans();
            match outcome.map_err(InteropError::from) {
                Ok(_) => {
                    spans_expected += expected_spans;
                    case_results.push(CaseResult {
                        id: case.id,
                        name: case.name.clone(),
                        status: Status::Success,
                        expected_spans,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(run_id = id, case = %case.name, error = %e, "Test case failed");
                    case_results.push(CaseResult {
                        id: case.id,
                        name: case.name.clone(),
                        status: Status::Failure,
                        expected_spans,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if spans_expected > 0
            && !self
                .collector
                .wait_for_spans(spans_expected, self.span_wait)
                .await
        {
            tracing::warn!(
                run_id = id,
                expected = spans_expected,
                received = self.collector.span_count(),
                "Timed out waiting for spans"
            );
        }

        let spans = self.collector.take_all();
        let traces = verify_traces(&spans);
        let status = RunReport::overall_status(&case_results, &traces);

        RunReport {
            id,
            status,
            started_at,
            finished_at: Utc::now(),
            spans_expected,
            spans_received: spans.len(),
            cases: case_results,
            traces,
        }
    }

    fn complete(&self, report: RunReport) {
        tracing::info!(
            run_id = report.id,
            status = ?report.status,
            cases = report.cases.len(),
            traces = report.traces.len(),
            spans_expected = report.spans_expected,
            spans_received = report.spans_received,
            "Interop run completed"
        );

        let mut runs = self.runs.lock();
        let id = report.id;
        runs.states.insert(id, RunState::Completed(report));
        runs.completed.push_back(id);
        while runs.completed.len() > self.max_results {
            if let Some(evicted) = runs.completed.pop_front() {
                runs.states.remove(&evicted);
            }
        }
    }
}

/// Reconstruct a batch of spans into per-trace verdicts, ordered by trace id
pub fn verify_traces(spans: &[Span]) -> Vec<TraceVerdict> {
    let mut counts: HashMap<TraceId, usize> = HashMap::new();
    for span in spans {
        *counts.entry(span.trace_id).or_default() += 1;
    }

    let (roots, errors) = reconstruct_traces(spans);
    let mut verdicts: Vec<TraceVerdict> = roots
        .into_iter()
        .map(|(trace_id, root)| TraceVerdict {
            trace_id,
            status: Status::Success,
            span_count: counts.get(&trace_id).copied().unwrap_or_default(),
            error: None,
            tree: Some(root),
        })
        .chain(errors.into_iter().map(|(trace_id, e)| TraceVerdict {
            trace_id,
            status: Status::Failure,
            span_count: counts.get(&trace_id).copied().unwrap_or_default(),
            error: Some(e.to_string()),
            tree: None,
        }))
        .collect();
    verdicts.sort_by_key(|v| v.trace_id);
    verdicts
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::data::FlushedTrace;
    use crate::domain::interop::error::ExecutorError;
    use crate::domain::interop::types::{Propagation, Service, TestResponse, Transport};
    use crate::domain::span::SpanId;

    enum Behavior {
        /// Emit a well-formed chain of spans for the request
        Emit,
        /// Emit spans whose middle link is missing
        EmitBroken,
        Fail,
    }

    struct FakeExecutor {
        collector: Arc<SpanCollector>,
        behavior: Behavior,
        calls: Mutex<Vec<TestRequest>>,
    }

    impl FakeExecutor {
        fn new(collector: Arc<SpanCollector>, behavior: Behavior) -> Self {
            Self {
                collector,
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    fn chain(trace_byte: u8, len: usize) -> Vec<Span> {
        let trace_id = TraceId::from_bytes([trace_byte; 16]);
        (0..len)
            .map(|i| {
                let parent = (i > 0).then(|| SpanId::from_bytes([i as u8; 8]));
                Span::new(trace_id, SpanId::from_bytes([i as u8 + 1; 8]), parent)
            })
            .collect()
    }

    #[async_trait]
    impl TestExecutor for FakeExecutor {
        async fn execute(&self, request: &TestRequest) -> Result<TestResponse, ExecutorError> {
            self.calls.lock().push(request.clone());
            let trace_byte = request.id as u8;
            match self.behavior {
                Behavior::Fail => return Err(ExecutorError::Rejected("boom".to_string())),
                Behavior::Emit => {
                    let spans = chain(trace_byte, request.expected_spans());
                    self.collector.add(FlushedTrace {
                        trace_id: spans[0].trace_id,
                        spans,
                    });
                }
                Behavior::EmitBroken => {
                    let mut spans = chain(trace_byte, request.expected_spans());
                    spans.remove(1);
                    self.collector.add(FlushedTrace {
                        trace_id: spans[0].trace_id,
                        spans,
                    });
                }
            }
            Ok(TestResponse {
                id: request.id,
                status: Status::Success,
                error: None,
            })
        }
    }

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 9000,
            transport: Transport::Http,
            propagation: Propagation::TraceContext,
        }
    }

    fn setup(behavior: Behavior, max_results: usize) -> (Arc<InteropService>, Arc<FakeExecutor>) {
        let registry = Arc::new(ServiceRegistry::new());
        registry
            .register("go", vec![service("go-http"), service("go-grpc")])
            .unwrap();
        registry
            .register("java", vec![service("java-http"), service("java-grpc"), service("java-b3")])
            .unwrap();

        let collector = Arc::new(SpanCollector::new());
        let executor = Arc::new(FakeExecutor::new(Arc::clone(&collector), behavior));
        let config = CoordinatorConfig {
            span_wait_secs: 1,
            request_timeout_secs: 1,
            max_results,
        };
        let service = Arc::new(InteropService::new(
            registry,
            collector,
            Arc::clone(&executor) as Arc<dyn TestExecutor>,
            &config,
        ));
        (service, executor)
    }

    async fn wait_completed(service: &InteropService, id: u64) -> RunReport {
        for _ in 0..200 {
            if let Some(RunState::Completed(report)) = service.result(id) {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {id} did not complete");
    }

    #[tokio::test]
    async fn test_run_success() {
        let (service, executor) = setup(Behavior::Emit, 10);
        let id = service.run().unwrap();
        let report = wait_completed(&service, id).await;

        assert_eq!(report.status, Status::Success);
        assert_eq!(report.cases.len(), 2);
        // go: 2 hops -> 3 spans, java: 3 hops -> 5 spans
        assert_eq!(report.spans_expected, 8);
        assert_eq!(report.spans_received, 8);
        assert_eq!(report.traces.len(), 2);
        assert!(report.traces.iter().all(|t| t.tree.is_some()));
        assert!(report.traces[0].trace_id < report.traces[1].trace_id);

        let calls = executor.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "go");
        assert_eq!(calls[1].service_hops.len(), 3);
    }

    #[tokio::test]
    async fn test_run_broken_trace_fails() {
        let (service, _) = setup(Behavior::EmitBroken, 10);
        let id = service.run().unwrap();
        let report = wait_completed(&service, id).await;

        assert_eq!(report.status, Status::Failure);
        assert!(report.cases.iter().all(|c| c.status == Status::Success));
        assert!(report.traces.iter().all(|t| t.status == Status::Failure));
        assert_eq!(
            report.traces[0].error.as_deref(),
            Some("found orphan span")
        );
    }

    #[tokio::test]
    async fn test_run_executor_failure() {
        let (service, _) = setup(Behavior::Fail, 10);
        let id = service.run().unwrap();
        let report = wait_completed(&service, id).await;

        assert_eq!(report.status, Status::Failure);
        assert_eq!(report.spans_expected, 0);
        assert!(report.traces.is_empty());
        assert!(
            report.cases[0]
                .error
                .as_deref()
                .unwrap()
                .contains("boom")
        );
    }

    #[tokio::test]
    async fn test_run_without_servers() {
        let service = Arc::new(InteropService::new(
            Arc::new(ServiceRegistry::new()),
            Arc::new(SpanCollector::new()),
            Arc::new(FakeExecutor::new(
                Arc::new(SpanCollector::new()),
                Behavior::Emit,
            )),
            &CoordinatorConfig::default(),
        ));
        assert!(matches!(
            service.run(),
            Err(InteropError::NoRegisteredServers)
        ));
    }

    #[tokio::test]
    async fn test_stale_spans_discarded() {
        let (service, _) = setup(Behavior::Emit, 10);
        service.collector.add(FlushedTrace {
            trace_id: TraceId::from_bytes([0xee; 16]),
            spans: chain(0xee, 2),
        });

        let id = service.run().unwrap();
        let report = wait_completed(&service, id).await;
        assert_eq!(report.traces.len(), 2);
        assert!(
            report
                .traces
                .iter()
                .all(|t| t.trace_id != TraceId::from_bytes([0xee; 16]))
        );
    }

    #[tokio::test]
    async fn test_results_evicted_beyond_limit() {
        let (service, _) = setup(Behavior::Emit, 1);
        let first = service.run().unwrap();
        wait_completed(&service, first).await;
        let second = service.run().unwrap();
        wait_completed(&service, second).await;

        assert_ne!(first, second);
        assert!(service.result(first).is_none());
        assert!(service.result(second).is_some());
    }

    #[test]
    fn test_verify_traces_counts_and_orders() {
        let mut spans = chain(2, 3);
        spans.extend(chain(1, 2));
        let mut orphan = chain(3, 3);
        orphan.remove(0);
        spans.extend(orphan);

        let verdicts = verify_traces(&spans);
        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[0].trace_id, TraceId::from_bytes([1; 16]));
        assert_eq!(verdicts[0].span_count, 2);
        assert_eq!(verdicts[1].span_count, 3);
        assert_eq!(verdicts[2].status, Status::Failure);
        assert_eq!(verdicts[2].span_count, 2);
    }

    #[test]
    fn test_verify_traces_renders_deep_trace() {
        let trace_id = TraceId::from_bytes([9; 16]);
        let id = |n: u64| SpanId::from_bytes(n.to_be_bytes());
        let spans: Vec<Span> = (1..=20_000u64)
            .rev()
            .map(|n| Span::new(trace_id, id(n), (n > 1).then(|| id(n - 1))))
            .collect();

        let verdicts = verify_traces(&spans);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].status, Status::Success);
        assert_eq!(verdicts[0].tree.as_ref().unwrap().depth(), 20_000);

        let json = serde_json::to_string(&verdicts).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["tree"]["spans"].as_array().unwrap().len(), 20_000);
    }
}
