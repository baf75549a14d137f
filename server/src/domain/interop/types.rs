//! Interop test data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::span::TraceId;
use crate::domain::traces::SimpleSpan;

/// Wire transport a service under test listens on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Http,
    Grpc,
}

/// Context propagation format a service uses on outgoing calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    #[default]
    TraceContext,
    B3,
    BinaryFormat,
}

/// One service exposed by a registered test server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub propagation: Propagation,
}

/// Test request sent to the first hop, which forwards it along the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequest {
    pub id: u64,
    pub name: String,
    pub service_hops: Vec<Service>,
}

impl TestRequest {
    /// Spans a healthy run of this request produces: one server span per hop
    /// plus one client span per forwarded call.
    pub fn expected_spans(&self) -> usize {
        (self.service_hops.len() * 2).saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Success,
    Failure,
}

/// Response from the first hop of a test request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResponse {
    pub id: u64,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Registration of a test server and the services it exposes
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    pub server_name: String,
    pub services: Vec<Service>,
}

// ============================================================================
// RESULTS
// ============================================================================

/// Outcome of executing one test case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub id: u64,
    pub name: String,
    pub status: Status,
    pub expected_spans: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of reconstructing one trace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceVerdict {
    pub trace_id: TraceId,
    pub status: Status,
    pub span_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<SimpleSpan>,
}

/// Completed run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub id: u64,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub spans_expected: usize,
    pub spans_received: usize,
    pub cases: Vec<CaseResult>,
    pub traces: Vec<TraceVerdict>,
}

impl RunReport {
    /// Success only when every case and trace succeeded and at least one
    /// trace was verified
    pub fn overall_status(cases: &[CaseResult], traces: &[TraceVerdict]) -> Status {
        let all_ok = cases.iter().all(|c| c.status == Status::Success)
            && traces.iter().all(|t| t.status == Status::Success);
        if all_ok && !traces.is_empty() {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Running {
        id: u64,
        started_at: DateTime<Utc>,
    },
    Completed(RunReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> Service {
        Service {
            name: name.to_string(),
            host: "localhost".to_string(),
            port: 8080,
            transport: Transport::Http,
            propagation: Propagation::TraceContext,
        }
    }

    #[test]
    fn test_expected_spans() {
        let mut request = TestRequest {
            id: 1,
            name: "java".to_string(),
            service_hops: vec![],
        };
        assert_eq!(request.expected_spans(), 0);
        request.service_hops = vec![service("a")];
        assert_eq!(request.expected_spans(), 1);
        request.service_hops = vec![service("a"), service("b"), service("c")];
        assert_eq!(request.expected_spans(), 5);
    }

    #[test]
    fn test_service_defaults_when_omitted() {
        let svc: Service =
            serde_json::from_str(r#"{ "name": "go", "host": "127.0.0.1", "port": 9000 }"#).unwrap();
        assert_eq!(svc.transport, Transport::Http);
        assert_eq!(svc.propagation, Propagation::TraceContext);

        let svc: Service = serde_json::from_str(
            r#"{ "name": "go", "host": "h", "port": 1, "transport": "grpc", "propagation": "b3" }"#,
        )
        .unwrap();
        assert_eq!(svc.transport, Transport::Grpc);
        assert_eq!(svc.propagation, Propagation::B3);
    }

    #[test]
    fn test_overall_status() {
        let ok_case = CaseResult {
            id: 1,
            name: "a".to_string(),
            status: Status::Success,
            expected_spans: 1,
            error: None,
        };
        let ok_trace = TraceVerdict {
            trace_id: TraceId::from_bytes([1; 16]),
            status: Status::Success,
            span_count: 1,
            error: None,
            tree: None,
        };
        assert_eq!(
            RunReport::overall_status(&[ok_case.clone()], &[ok_trace.clone()]),
            Status::Success
        );
        // Nothing verified
        assert_eq!(RunReport::overall_status(&[ok_case.clone()], &[]), Status::Failure);

        let bad_trace = TraceVerdict {
            status: Status::Failure,
            ..ok_trace.clone()
        };
        assert_eq!(
            RunReport::overall_status(&[ok_case], &[ok_trace, bad_trace]),
            Status::Failure
        );
    }

    #[test]
    fn test_run_state_serializes_tagged() {
        let running = RunState::Running {
            id: 7,
            started_at: Utc::now(),
        };
        let json = serde_json::to_value(&running).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["id"], 7);
    }
}
