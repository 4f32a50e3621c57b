//! Built-in interceptors.
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Body as AxumBody;
use hyper::Response;

use crate::adapters::dispatcher::{HandlerInterceptor, RequestSummary};

/// Logs one line per completed request with method, host, path, status and latency.
#[derive(Debug, Default)]
pub struct AccessLogInterceptor {
    logged: AtomicU64,
}

impl AccessLogInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests logged so far
    pub fn logged(&self) -> u64 {
        self.logged.load(Ordering::Relaxed)
    }
}

impl HandlerInterceptor for AccessLogInterceptor {
    fn post_handle(&self, summary: &RequestSummary, response: &mut Response<AxumBody>) {
        self.logged.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            method = %summary.method,
            host = %summary.host,
            path = %summary.path,
            status = response.status().as_u16(),
            elapsed_ms = summary.elapsed().as_millis() as u64,
            remote = ?summary.remote_addr,
            "request completed"
        );
    }
}
