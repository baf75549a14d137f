//! Interop test orchestration

mod error;
mod executor;
mod registry;
mod service;
mod types;

pub use error::{ExecutorError, InteropError};
pub use executor::{HttpTestExecutor, TestExecutor};
pub use registry::ServiceRegistry;
pub use service::{InteropService, verify_traces};
pub use types::{
    CaseResult, Propagation, RegistrationRequest, RunReport, RunState, Service, Status,
    TestRequest, TestResponse, TraceVerdict, Transport,
};
