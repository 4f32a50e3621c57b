use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http_body_util::BodyExt;
use hyper::{Request, Response, Uri, Version, header, header::HeaderValue};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::{
    config::models::DEFAULT_MAX_CONNS,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// Bounds applied to every exchange with one backend, independent of the
/// per-request deadline.
#[derive(Debug, Clone, Copy)]
pub struct BackendClientOptions {
    pub max_conns: usize,
    /// Bound on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Bound on the whole background exchange, body included
    pub read_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for BackendClientOptions {
    fn default() -> Self {
        Self {
            max_conns: DEFAULT_MAX_CONNS,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(120),
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Pooled HTTP/1.1 client for a single backend address.
///
/// Each exchange runs in its own task holding one of `max_conns` permits. A
/// caller whose deadline elapses gets [`HttpClientError::Timeout`] right away
/// while the task keeps running until the backend answers or `read_timeout`
/// fires, so the pooled connection and the permit are always given back.
pub struct BackendClient {
    addr: String,
    client: Client<HttpConnector, AxumBody>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    options: BackendClientOptions,
}

impl BackendClient {
    pub fn new(addr: impl Into<String>, options: BackendClientOptions) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(options.connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(options.idle_timeout)
            .pool_max_idle_per_host(options.max_conns)
            .build(connector);

        Self {
            addr: addr.into(),
            client,
            permits: Arc::new(Semaphore::new(options.max_conns)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            options,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Exchanges currently running in the background, including detached ones
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn options(&self) -> &BackendClientOptions {
        &self.options
    }

    /// Point the request at this backend, keeping the inbound `Host` header.
    /// HTTP/2 requests carry the host only as the URI authority, which then
    /// becomes the `Host` header.
    fn retarget(&self, req: Request<AxumBody>) -> HttpClientResult<Request<AxumBody>> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let uri: Uri = format!("http://{}{}", self.addr, path_and_query)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| {
                HttpClientError::InvalidRequest(e.to_string())
            })?;

        let (mut parts, body) = req.into_parts();
        if !parts.headers.contains_key(header::HOST) {
            if let Some(authority) = parts.uri.authority() {
                let host = HeaderValue::from_str(authority.as_str())
                    .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
                parts.headers.insert(header::HOST, host);
            }
        }
        parts.uri = uri;
        parts.version = Version::HTTP_11;
        Ok(Request::from_parts(parts, body))
    }

    async fn exchange(
        client: Client<HttpConnector, AxumBody>,
        req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let response = client.request(req).await.map_err(|e| {
            if e.is_connect() {
                HttpClientError::Connect(e.to_string())
            } else {
                HttpClientError::Protocol(e.to_string())
            }
        })?;

        let (mut parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| HttpClientError::Protocol(e.to_string()))?
            .to_bytes();

        // the body is fully buffered, framing is decided again downstream
        parts.headers.remove(header::TRANSFER_ENCODING);
        parts.headers.remove(header::CONNECTION);

        Ok(Response::from_parts(parts, AxumBody::from(bytes)))
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl HttpClient for BackendClient {
    async fn send_request(
        &self,
        req: Request<AxumBody>,
        deadline: Duration,
    ) -> HttpClientResult<Response<AxumBody>> {
        let req = self.retarget(req)?;

        let span = tracing::debug_span!(
            "backend_request",
            backend = %self.addr,
            http.method = %req.method(),
            http.path = %req.uri().path(),
        );

        // a request still queued for a slot when the deadline passes is never sent
        let started = Instant::now();
        let permit = match tokio::time::timeout(deadline, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(HttpClientError::Protocol(
                    "connection limiter closed".to_string(),
                ));
            }
            Err(_) => {
                tracing::debug!(
                    backend = %self.addr,
                    deadline_ms = deadline.as_millis() as u64,
                    "deadline elapsed waiting for a connection slot"
                );
                return Err(HttpClientError::Timeout(deadline));
            }
        };
        let remaining = deadline.saturating_sub(started.elapsed());

        let client = self.client.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let read_timeout = self.options.read_timeout;

        let exchange = tokio::spawn(
            async move {
                let _permit = permit;
                let _guard = InFlightGuard::enter(&in_flight);

                tokio::time::timeout(read_timeout, Self::exchange(client, req))
                    .await
                    .map_err(|_| HttpClientError::Timeout(read_timeout))?
            }
            .instrument(span),
        );

        // dropping the handle on timeout detaches the task, it is not aborted
        match tokio::time::timeout(remaining, exchange).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(HttpClientError::Protocol(format!(
                "backend exchange task failed: {join_error}"
            ))),
            Err(_) => {
                tracing::debug!(
                    backend = %self.addr,
                    deadline_ms = deadline.as_millis() as u64,
                    "deadline elapsed, exchange continues in background"
                );
                Err(HttpClientError::Timeout(deadline))
            }
        }
    }
}
