use thiserror::Error;

/// Errors from sending a test request to a service under test
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("test request has no service hops")]
    NoHops,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service responded with HTTP {0}")]
    Status(u16),

    #[error("service reported failure: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum InteropError {
    #[error("{0} already registered")]
    AlreadyRegistered(String),

    #[error("server name must not be empty")]
    InvalidServerName,

    #[error("server {0} has no services")]
    NoServices(String),

    #[error("no servers registered")]
    NoRegisteredServers,

    #[error("test execution failed: {0}")]
    Execution(#[from] ExecutorError),
}
