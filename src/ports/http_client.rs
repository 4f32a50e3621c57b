use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// The backend could not be reached at all
    #[error("Connection error: {0}")]
    Connect(String),

    /// The connection was established but the exchange failed
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The caller's deadline elapsed; the exchange may still be running
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Connection failures are the only errors that say something about the backend itself.
    pub fn is_connect(&self) -> bool {
        matches!(self, HttpClientError::Connect(_))
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for forwarding requests to one backend
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send `req` and return the buffered response, or `Timeout` once `deadline` elapses.
    ///
    /// Returning at the deadline must not abandon the underlying exchange: the
    /// connection and any concurrency permit are released when the real I/O ends.
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        deadline: Duration,
    ) -> HttpClientResult<Response<AxumBody>>;
}
