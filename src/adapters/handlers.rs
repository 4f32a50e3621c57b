//! Terminal handlers and their build-once cache.
//!
//! A matched [`LocationRule`] resolves to exactly one [`TerminalHandler`]:
//! either a [`RoutingHandler`] forwarding to an upstream or a
//! [`StaticFileHandler`] serving from a directory. Handlers are built on the
//! first request that reaches their rule and shared afterwards.
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Instant,
};

use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode, header};
use scc::hash_map::Entry;
use thiserror::Error;

use crate::{
    adapters::{
        client_pool::{BackendClientSet, ClientPool},
        file_system::FileSystemAdapter,
    },
    core::{
        gateway::GatewayService,
        routing::{LocationRule, RuleId, RuleTarget},
        upstream::effective_timeout,
    },
    ports::{
        file_system::{FileSystem, FileSystemError},
        http_client::HttpClient,
    },
};

const BAD_GATEWAY_BODY: &str = "Bad Gateway";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("Unknown upstream '{upstream}' for {rule}")]
    UnknownUpstream { upstream: String, rule: RuleId },

    #[error("Upstream '{0}' has no servers")]
    EmptyUpstream(String),
}

/// Reverse-proxy forwarder bound to one rule and one upstream.
pub struct RoutingHandler {
    rule: Arc<LocationRule>,
    clients: Arc<BackendClientSet>,
    demote_on_failure: bool,
}

impl RoutingHandler {
    pub fn new(
        rule: Arc<LocationRule>,
        clients: Arc<BackendClientSet>,
        demote_on_failure: bool,
    ) -> Result<Self, HandlerError> {
        if clients.is_empty() {
            return Err(HandlerError::EmptyUpstream(
                clients.upstream().id().to_string(),
            ));
        }
        Ok(Self {
            rule,
            clients,
            demote_on_failure,
        })
    }

    pub fn upstream_id(&self) -> &str {
        self.clients.upstream().id()
    }

    pub async fn handle(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        // keep backend connections reusable
        req.headers_mut().remove(header::CONNECTION);
        self.rule.request_headers.apply(req.headers_mut());

        let mut response = match self.clients.select() {
            Some((server, client)) => {
                let deadline = effective_timeout(self.rule.timeout, self.clients.upstream().timeout());
                let started = Instant::now();

                match client.send_request(req, deadline).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(
                            upstream = self.upstream_id(),
                            backend = server.addr(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            error = %e,
                            "backend request failed"
                        );
                        if e.is_connect() && self.demote_on_failure && server.mark_down() {
                            tracing::warn!(
                                upstream = self.upstream_id(),
                                backend = server.addr(),
                                "backend marked down"
                            );
                        }
                        bad_gateway()
                    }
                }
            }
            None => {
                tracing::error!(upstream = self.upstream_id(), "no backend available");
                bad_gateway()
            }
        };

        self.rule.response_headers.apply(response.headers_mut());
        response
    }
}

fn bad_gateway() -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from(BAD_GATEWAY_BODY));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

/// Serves files under a rule's root directory.
pub struct StaticFileHandler {
    rule: Arc<LocationRule>,
    root: PathBuf,
    index_names: Vec<String>,
    files: FileSystemAdapter,
}

impl StaticFileHandler {
    pub fn new(
        rule: Arc<LocationRule>,
        root: PathBuf,
        index_names: Vec<String>,
        files: FileSystemAdapter,
    ) -> Self {
        Self {
            rule,
            root,
            index_names,
            files,
        }
    }

    pub async fn handle(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        self.rule.request_headers.apply(req.headers_mut());

        let mut response = match self
            .files
            .serve_file(&self.root, &self.index_names, req)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(root = %self.root.display(), error = %e, "static file delegate failed");
                let status = match e {
                    FileSystemError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let mut response = Response::new(AxumBody::empty());
                *response.status_mut() = status;
                response
            }
        };

        self.rule.response_headers.apply(response.headers_mut());
        response
    }
}

/// The closed set of handlers a rule can resolve to.
pub enum TerminalHandler {
    Proxy(RoutingHandler),
    File(StaticFileHandler),
}

impl TerminalHandler {
    pub async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        match self {
            TerminalHandler::Proxy(handler) => handler.handle(req).await,
            TerminalHandler::File(handler) => handler.handle(req).await,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TerminalHandler::Proxy(_) => "proxy",
            TerminalHandler::File(_) => "file",
        }
    }
}

/// Handlers keyed by rule identity, built at most once per rule.
#[derive(Default)]
pub struct HandlerCache {
    handlers: scc::HashMap<RuleId, Arc<TerminalHandler>>,
    builds: AtomicUsize,
}

impl HandlerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: RuleId) -> Option<Arc<TerminalHandler>> {
        self.handlers
            .read_async(&id, |_, handler| Arc::clone(handler))
            .await
    }

    /// Return the cached handler for `id`, running `build` only if none exists.
    /// Concurrent callers for the same id wait on the entry and share one result.
    pub async fn get_or_build<F>(&self, id: RuleId, build: F) -> Result<Arc<TerminalHandler>, HandlerError>
    where
        F: FnOnce() -> Result<TerminalHandler, HandlerError>,
    {
        if let Some(handler) = self.get(id).await {
            return Ok(handler);
        }

        match self.handlers.entry_async(id).await {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let handler = Arc::new(build()?);
                self.builds.fetch_add(1, Ordering::Relaxed);
                entry.insert_entry(Arc::clone(&handler));
                Ok(handler)
            }
        }
    }

    /// Number of handlers constructed so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Everything needed to turn a rule into a handler: gateway state, the shared
/// client pool and the handler cache.
pub struct HandlerRegistry {
    gateway: Arc<GatewayService>,
    clients: ClientPool,
    handlers: HandlerCache,
    files: FileSystemAdapter,
}

impl HandlerRegistry {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self::with_client_pool(gateway, ClientPool::default())
    }

    pub fn with_client_pool(gateway: Arc<GatewayService>, clients: ClientPool) -> Self {
        Self {
            gateway,
            clients,
            handlers: HandlerCache::new(),
            files: FileSystemAdapter::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    pub fn clients(&self) -> &ClientPool {
        &self.clients
    }

    pub fn handlers(&self) -> &HandlerCache {
        &self.handlers
    }

    pub async fn resolve(&self, rule: &Arc<LocationRule>) -> Result<Arc<TerminalHandler>, HandlerError> {
        if let Some(handler) = self.handlers.get(rule.id).await {
            return Ok(handler);
        }

        match &rule.target {
            RuleTarget::Upstream(id) => {
                let upstream = self
                    .gateway
                    .upstream(id)
                    .ok_or_else(|| HandlerError::UnknownUpstream {
                        upstream: id.clone(),
                        rule: rule.id,
                    })?;
                // client sets are build-once too, so preparing one here never leaks
                let clients = self.clients.client_set(&upstream).await;
                // only the health monitor brings a demoted backend back
                let health = self.gateway.health_config();
                let demote = health.enabled && health.demote_on_failure;

                self.handlers
                    .get_or_build(rule.id, || {
                        RoutingHandler::new(Arc::clone(rule), clients, demote)
                            .map(TerminalHandler::Proxy)
                    })
                    .await
            }
            RuleTarget::Static { root, index } => {
                self.handlers
                    .get_or_build(rule.id, || {
                        Ok(TerminalHandler::File(StaticFileHandler::new(
                            Arc::clone(rule),
                            root.clone(),
                            index.clone(),
                            self.files.clone(),
                        )))
                    })
                    .await
            }
        }
    }
}
