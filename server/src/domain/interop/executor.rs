//! Test request execution against services under test

use std::time::Duration;

use async_trait::async_trait;

use super::error::ExecutorError;
use super::types::{Status, TestRequest, TestResponse};
use crate::core::constants::TEST_REQUEST_PATH;

/// Sends one test request into a chain of services
#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn execute(&self, request: &TestRequest) -> Result<TestResponse, ExecutorError>;
}

/// Posts the request as JSON to the first hop's test endpoint
pub struct HttpTestExecutor {
    client: reqwest::Client,
}

impl HttpTestExecutor {
    pub fn new(timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TestExecutor for HttpTestExecutor {
    async fn execute(&self, request: &TestRequest) -> Result<TestResponse, ExecutorError> {
        let first = request.service_hops.first().ok_or(ExecutorError::NoHops)?;
        let url = format!("http://{}:{}{}", first.host, first.port, TEST_REQUEST_PATH);

        tracing::debug!(
            id = request.id,
            name = %request.name,
            hops = request.service_hops.len(),
            %url,
            "Sending test request"
        );

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExecutorError::Status(status.as_u16()));
        }

        let body: TestResponse = response.json().await?;
        if body.status == Status::Failure {
            return Err(ExecutorError::Rejected(
                body.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};

    use super::*;
    use crate::domain::interop::types::{Propagation, Service, Transport};

    async fn spawn_server(router: Router) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    fn request(port: u16) -> TestRequest {
        TestRequest {
            id: 42,
            name: "java".to_string(),
            service_hops: vec![Service {
                name: "java-http".to_string(),
                host: "127.0.0.1".to_string(),
                port,
                transport: Transport::Http,
                propagation: Propagation::TraceContext,
            }],
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let router = Router::new().route(
            TEST_REQUEST_PATH,
            post(|Json(req): Json<TestRequest>| async move {
                Json(TestResponse {
                    id: req.id,
                    status: Status::Success,
                    error: None,
                })
            }),
        );
        let port = spawn_server(router).await;

        let executor = HttpTestExecutor::new(Duration::from_secs(5)).unwrap();
        let response = executor.execute(&request(port)).await.unwrap();
        assert_eq!(response.id, 42);
        assert_eq!(response.status, Status::Success);
    }

    #[tokio::test]
    async fn test_execute_reported_failure() {
        let router = Router::new().route(
            TEST_REQUEST_PATH,
            post(|| async {
                Json(TestResponse {
                    id: 42,
                    status: Status::Failure,
                    error: Some("downstream unreachable".to_string()),
                })
            }),
        );
        let port = spawn_server(router).await;

        let executor = HttpTestExecutor::new(Duration::from_secs(5)).unwrap();
        let err = executor.execute(&request(port)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Rejected(ref m) if m == "downstream unreachable"));
    }

    #[tokio::test]
    async fn test_execute_http_error_status() {
        let router = Router::new().route(
            TEST_REQUEST_PATH,
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let port = spawn_server(router).await;

        let executor = HttpTestExecutor::new(Duration::from_secs(5)).unwrap();
        let err = executor.execute(&request(port)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Status(500)));
    }

    #[tokio::test]
    async fn test_execute_no_hops() {
        let executor = HttpTestExecutor::new(Duration::from_secs(1)).unwrap();
        let mut req = request(1);
        req.service_hops.clear();
        let err = executor.execute(&req).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NoHops));
    }

    #[tokio::test]
    async fn test_execute_connection_refused() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let executor = HttpTestExecutor::new(Duration::from_secs(1)).unwrap();
        let err = executor.execute(&request(port)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Http(_)));
    }
}
