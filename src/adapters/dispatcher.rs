//! Request dispatch.
//!
//! The [`Dispatcher`] asks each [`HandlerMapping`] in priority order (reverse
//! proxy first, then static files) for a [`HandlerExecutionChain`]. The first
//! chain found runs its interceptors around the terminal handler. When no
//! mapping matches, the response is an empty 404.
use std::{
    fmt,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::body::Body as AxumBody;
use hyper::{Method, Request, Response, StatusCode, header};

use crate::{
    adapters::handlers::{HandlerRegistry, TerminalHandler},
    core::routing::HostRoutingTable,
};

/// What interceptors see of the inbound request, captured before the
/// terminal handler consumes it.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    pub host: String,
    pub path: String,
    pub remote_addr: Option<SocketAddr>,
    pub started: Instant,
}

impl RequestSummary {
    pub fn from_request(req: &Request<AxumBody>, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: req.method().clone(),
            host: request_host(req).to_string(),
            path: req.uri().path().to_string(),
            remote_addr,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// `Host` header, falling back to the URI authority used by HTTP/2.
fn request_host(req: &Request<AxumBody>) -> &str {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| req.uri().authority().map(|authority| authority.as_str()))
        .unwrap_or("")
}

/// Hooks run around a terminal handler.
///
/// `pre_handle` runs in registration order; returning false stops the chain
/// and whatever the interceptor wrote into `response` is sent as is.
/// `post_handle` and `after_completion` run in reverse order.
pub trait HandlerInterceptor: Send + Sync + 'static {
    fn pre_handle(
        &self,
        _summary: &RequestSummary,
        _request: &mut Request<AxumBody>,
        _response: &mut Response<AxumBody>,
    ) -> bool {
        true
    }

    fn post_handle(&self, _summary: &RequestSummary, _response: &mut Response<AxumBody>) {}

    fn after_completion(&self, _summary: &RequestSummary, _response: &Response<AxumBody>) {}
}

/// A terminal handler plus the interceptors wrapped around it for one request.
pub struct HandlerExecutionChain {
    handler: Arc<TerminalHandler>,
    interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    /// Index of the last interceptor whose `pre_handle` ran
    interceptor_index: Option<usize>,
}

impl fmt::Debug for HandlerExecutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerExecutionChain")
            .field("handler", &self.handler.kind())
            .field("interceptors", &self.interceptors.len())
            .field("interceptor_index", &self.interceptor_index)
            .finish()
    }
}

impl HandlerExecutionChain {
    pub fn with_interceptors(
        handler: Arc<TerminalHandler>,
        interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    ) -> Self {
        Self {
            handler,
            interceptors,
            interceptor_index: None,
        }
    }

    pub fn handler(&self) -> &Arc<TerminalHandler> {
        &self.handler
    }

    fn apply_pre_handle(
        &mut self,
        summary: &RequestSummary,
        request: &mut Request<AxumBody>,
        response: &mut Response<AxumBody>,
    ) -> bool {
        for (i, interceptor) in self.interceptors.iter().enumerate() {
            self.interceptor_index = Some(i);
            if !interceptor.pre_handle(summary, request, response) {
                self.trigger_after_completion(summary, response);
                return false;
            }
        }
        true
    }

    fn apply_post_handle(&self, summary: &RequestSummary, response: &mut Response<AxumBody>) {
        for interceptor in self.interceptors.iter().rev() {
            interceptor.post_handle(summary, response);
        }
    }

    fn trigger_after_completion(&self, summary: &RequestSummary, response: &Response<AxumBody>) {
        if let Some(last) = self.interceptor_index {
            for interceptor in self.interceptors[..=last].iter().rev() {
                interceptor.after_completion(summary, response);
            }
        }
    }

    /// Run the chain for one request.
    pub async fn execute(
        mut self,
        summary: &RequestSummary,
        mut request: Request<AxumBody>,
    ) -> Response<AxumBody> {
        let mut response = Response::new(AxumBody::empty());
        if !self.apply_pre_handle(summary, &mut request, &mut response) {
            return response;
        }

        let mut response = self.handler.handle(request).await;
        self.apply_post_handle(summary, &mut response);
        self.trigger_after_completion(summary, &response);
        response
    }
}

/// Which rule target a mapping accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingKind {
    Routing,
    StaticFile,
}

/// Resolves a host and path to an execution chain for one kind of target.
pub struct HandlerMapping {
    kind: MappingKind,
    routes: Arc<HostRoutingTable>,
    registry: Arc<HandlerRegistry>,
    interceptors: Vec<Arc<dyn HandlerInterceptor>>,
}

impl HandlerMapping {
    pub fn new(
        kind: MappingKind,
        routes: Arc<HostRoutingTable>,
        registry: Arc<HandlerRegistry>,
        interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    ) -> Self {
        Self {
            kind,
            routes,
            registry,
            interceptors,
        }
    }

    pub fn kind(&self) -> MappingKind {
        self.kind
    }

    pub async fn get_handler(&self, host: &str, path: &str) -> Option<HandlerExecutionChain> {
        let rules = self.routes.rules_for(host)?;
        let rule = self.registry.gateway().match_rule(rules, path).await?;

        // the first matching rule decides, even when it belongs to the other mapping
        let accepted = match self.kind {
            MappingKind::Routing => rule.upstream_id().is_some(),
            MappingKind::StaticFile => rule.is_static(),
        };
        if !accepted {
            return None;
        }

        match self.registry.resolve(&rule).await {
            Ok(handler) => Some(HandlerExecutionChain::with_interceptors(
                handler,
                self.interceptors.clone(),
            )),
            Err(e) => {
                tracing::error!(rule = %rule.id, error = %e, "failed to build handler");
                None
            }
        }
    }
}

/// Front door for every request on one listener.
pub struct Dispatcher {
    mappings: Vec<HandlerMapping>,
}

impl Dispatcher {
    /// Routing mapping first, then static files, sharing one interceptor list.
    pub fn new(
        routes: Arc<HostRoutingTable>,
        registry: Arc<HandlerRegistry>,
        interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    ) -> Self {
        let mappings = [MappingKind::Routing, MappingKind::StaticFile]
            .into_iter()
            .map(|kind| {
                HandlerMapping::new(
                    kind,
                    Arc::clone(&routes),
                    Arc::clone(&registry),
                    interceptors.clone(),
                )
            })
            .collect();
        Self { mappings }
    }

    pub fn mappings(&self) -> &[HandlerMapping] {
        &self.mappings
    }

    pub async fn dispatch(
        &self,
        request: Request<AxumBody>,
        remote_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let summary = RequestSummary::from_request(&request, remote_addr);

        for mapping in &self.mappings {
            if let Some(chain) = mapping.get_handler(&summary.host, &summary.path).await {
                return chain.execute(&summary, request).await;
            }
        }

        tracing::debug!(host = %summary.host, path = %summary.path, "no route matched");
        let mut response = Response::new(AxumBody::empty());
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }
}
