//! gRPC OTLP trace receiver

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use prost::Message;
use tokio::sync::watch;
use tonic::transport::Server as TonicServer;
use tonic::{Request, Response, Status};

use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
    trace_service_server::{TraceService, TraceServiceServer},
};

use crate::core::constants::OTLP_GRPC_MAX_MESSAGE_SIZE;
use crate::data::TraceStore;
use crate::domain::span::Span;
use crate::utils::otlp::{count_spans, service_name};

pub struct OtlpGrpcServer {
    addr: SocketAddr,
    store: Arc<TraceStore>,
}

impl OtlpGrpcServer {
    pub fn new(host: &str, port: u16, store: Arc<TraceStore>) -> Result<Self> {
        let addr = SocketAddr::new(host.parse()?, port);
        Ok(Self { addr, store })
    }

    pub async fn start(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        let addr = self.addr;

        tracing::debug!(%addr, "Starting OTLP gRPC receiver");

        TonicServer::builder()
            .add_service(
                TraceServiceServer::new(OtlpTraceService::new(self.store))
                    .max_decoding_message_size(OTLP_GRPC_MAX_MESSAGE_SIZE)
                    .max_encoding_message_size(OTLP_GRPC_MAX_MESSAGE_SIZE),
            )
            .serve_with_shutdown(addr, async move {
                let _ = shutdown_rx.wait_for(|&v| v).await;
                tracing::debug!("OTLP gRPC receiver shutting down");
            })
            .await?;

        Ok(())
    }
}

/// Accepted and rejected span counts for one export request
#[derive(Debug, Default, PartialEq, Eq)]
struct IngestOutcome {
    accepted: usize,
    rejected: usize,
    last_error: Option<String>,
}

/// Convert every span in the request and hand the valid ones to the store
fn ingest(store: &TraceStore, request: &ExportTraceServiceRequest) -> IngestOutcome {
    let mut outcome = IngestOutcome::default();

    for resource_spans in &request.resource_spans {
        let node = service_name(resource_spans.resource.as_ref());
        for scope_spans in &resource_spans.scope_spans {
            for otlp_span in &scope_spans.spans {
                match Span::from_otlp(otlp_span) {
                    Ok(span) => {
                        tracing::debug!(
                            node = %node,
                            trace_id = %span.trace_id,
                            span_id = %span.span_id,
                            parent_span_id = ?span.parent_span_id.map(|p| p.to_string()),
                            name = %span.name,
                            "Received span"
                        );
                        store.put_span(span);
                        outcome.accepted += 1;
                    }
                    Err(e) => {
                        tracing::warn!(node = %node, error = %e, "Rejected invalid span");
                        outcome.rejected += 1;
                        outcome.last_error = Some(e.to_string());
                    }
                }
            }
        }
    }

    outcome
}

/// gRPC trace service
struct OtlpTraceService {
    store: Arc<TraceStore>,
}

impl OtlpTraceService {
    fn new(store: Arc<TraceStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl TraceService for OtlpTraceService {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let req = request.into_inner();
        let total = count_spans(&req);
        let outcome = ingest(&self.store, &req);

        tracing::debug!(
            bytes = req.encoded_len(),
            total,
            accepted = outcome.accepted,
            rejected = outcome.rejected,
            "OTLP trace export"
        );

        let partial_success = (outcome.rejected > 0).then(|| ExportTracePartialSuccess {
            rejected_spans: outcome.rejected as i64,
            error_message: outcome.last_error.unwrap_or_default(),
        });

        Ok(Response::new(ExportTraceServiceResponse { partial_success }))
    }
}
