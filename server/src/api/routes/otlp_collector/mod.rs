//! OpenTelemetry Protocol (OTLP) span ingestion

mod grpc;

pub use grpc::OtlpGrpcServer;
