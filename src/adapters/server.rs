//! Listener lifecycle.
//!
//! [`ServerLifecycle`] binds one listener per configured address, serves each
//! one from its own task and stops them all together when the shared
//! [`GracefulShutdown`] fires. Shutdown closes the listeners and then waits for
//! every accept loop to exit; requests already in flight are not drained.
use std::{
    future::IntoFuture,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};

use axum::{
    Router,
    extract::{ConnectInfo, Request},
    serve::{Listener, ListenerExt},
};
use eyre::{Result, WrapErr, eyre};
use futures_util::StreamExt;
use tls_listener::TlsListener;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        client_pool::ClientPool,
        dispatcher::{Dispatcher, HandlerInterceptor},
        handlers::HandlerRegistry,
        health_checker::HealthMonitor,
        interceptors::AccessLogInterceptor,
        tls::load_tls_acceptor,
    },
    core::gateway::{GatewayService, ListenerSpec},
    utils::graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken},
};

/// Adapts a stream of accepted connections (e.g. TLS handshakes) to axum's `Listener`.
struct AxumListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for AxumListener<S>
where
    S: futures_util::Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) => tracing::debug!(error = %e, "accept failed"),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

/// A bound listener and the task serving it.
pub struct ListenerHandle {
    pub listen: String,
    pub local_addr: SocketAddr,
    pub tls: bool,
    task: JoinHandle<Result<()>>,
}

/// Live listeners keyed by configured listen address.
#[derive(Default)]
pub struct ListenerRegistry {
    handles: scc::HashMap<String, ListenerHandle>,
    order: Mutex<Vec<String>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn order(&self) -> MutexGuard<'_, Vec<String>> {
        self.order.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn register(&self, handle: ListenerHandle) -> Result<()> {
        let listen = handle.listen.clone();
        self.handles
            .insert_async(listen.clone(), handle)
            .await
            .map_err(|_| eyre!("listener for {listen} registered twice"))?;
        self.order().push(listen);
        Ok(())
    }

    pub async fn local_addr(&self, listen: &str) -> Option<SocketAddr> {
        self.handles
            .read_async(listen, |_, handle| handle.local_addr)
            .await
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every registered accept loop to exit, in registration order.
    pub async fn join_all(&self) -> usize {
        let addresses = std::mem::take(&mut *self.order());
        let mut failed = 0;

        for listen in addresses {
            let Some((_, handle)) = self.handles.remove_async(&listen).await else {
                continue;
            };
            match handle.task.await {
                Ok(Ok(())) => tracing::debug!(listen = %listen, "listener stopped"),
                Ok(Err(e)) => {
                    failed += 1;
                    tracing::error!(listen = %listen, error = %e, "listener failed");
                }
                Err(e) => {
                    failed += 1;
                    tracing::error!(listen = %listen, error = %e, "listener task panicked");
                }
            }
        }
        failed
    }
}

/// Owns every listener plus the health monitor for one gateway.
pub struct ServerLifecycle {
    gateway: Arc<GatewayService>,
    registry: Arc<HandlerRegistry>,
    interceptors: Vec<Arc<dyn HandlerInterceptor>>,
    listeners: ListenerRegistry,
    shutdown: Arc<GracefulShutdown>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ServerLifecycle {
    pub fn new(gateway: Arc<GatewayService>, shutdown: Arc<GracefulShutdown>) -> Self {
        Self::with_client_pool(gateway, shutdown, ClientPool::default())
    }

    pub fn with_client_pool(
        gateway: Arc<GatewayService>,
        shutdown: Arc<GracefulShutdown>,
        clients: ClientPool,
    ) -> Self {
        let mut interceptors: Vec<Arc<dyn HandlerInterceptor>> = Vec::new();
        if gateway.application().access_log {
            interceptors.push(Arc::new(AccessLogInterceptor::new()));
        }

        Self {
            registry: Arc::new(HandlerRegistry::with_client_pool(
                Arc::clone(&gateway),
                clients,
            )),
            gateway,
            interceptors,
            listeners: ListenerRegistry::new(),
            shutdown,
            monitor: Mutex::new(None),
        }
    }

    /// Attach an interceptor to every execution chain. Call before `start`.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn HandlerInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Bound address of the listener configured as `listen`.
    pub async fn local_addr(&self, listen: &str) -> Option<SocketAddr> {
        self.listeners.local_addr(listen).await
    }

    /// Bind and start serving every configured listener.
    pub async fn start(&self) -> Result<()> {
        for spec in self.gateway.listeners() {
            let handle = self.spawn_listener(spec).await?;
            tracing::info!(
                listen = %spec.listen,
                local_addr = %handle.local_addr,
                tls = handle.tls,
                hosts = spec.routes.host_count(),
                "listener started"
            );
            self.listeners.register(handle).await?;
        }
        Ok(())
    }

    async fn spawn_listener(&self, spec: &ListenerSpec) -> Result<ListenerHandle> {
        let listener = TcpListener::bind(&spec.listen)
            .await
            .with_context(|| format!("Failed to bind to {}", spec.listen))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to get local addr")?;

        let acceptor = match &spec.tls {
            Some(files) => Some(
                load_tls_acceptor(&files.cert, &files.key)
                    .with_context(|| format!("TLS setup failed for {}", spec.listen))?,
            ),
            None => None,
        };
        let tls = acceptor.is_some();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&spec.routes),
            Arc::clone(&self.registry),
            self.interceptors.clone(),
        ));
        let app = router(dispatcher);
        let token = self.shutdown.shutdown_token();
        let listen = spec.listen.clone();

        let task = tokio::spawn(serve_listener(
            listen.clone(),
            listener,
            local_addr,
            acceptor,
            app,
            token,
        ));

        Ok(ListenerHandle {
            listen,
            local_addr,
            tls,
            task,
        })
    }

    /// Spawn the health monitor when health checking is enabled.
    pub fn start_health_monitor(&self) {
        if !self.gateway.health_config().enabled {
            tracing::info!("health checking is disabled");
            return;
        }

        let monitor = HealthMonitor::new(Arc::clone(&self.gateway));
        let token = self.shutdown.shutdown_token();
        let handle = tokio::spawn(async move { monitor.run(token).await });

        let mut slot = self.monitor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Block until shutdown is triggered and every listener has stopped.
    pub async fn wait(&self) -> Result<()> {
        let reason = self.shutdown.wait_for_shutdown_signal().await;
        tracing::info!(?reason, listeners = self.listeners.len(), "closing listeners");

        let failed = self.listeners.join_all().await;

        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                tracing::error!(error = %e, "health monitor task failed");
            }
        }

        tracing::info!("all listeners stopped");
        if failed > 0 {
            return Err(eyre!("{failed} listener(s) exited with an error"));
        }
        Ok(())
    }

    /// Trigger shutdown and wait for it to complete.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.trigger_shutdown(ShutdownReason::Requested);
        self.wait().await
    }
}

fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .fallback(
            move |ConnectInfo(remote): ConnectInfo<SocketAddr>, request: Request| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.dispatch(request, Some(remote)).await }
            },
        )
        .layer(TraceLayer::new_for_http())
}

async fn serve_listener(
    listen: String,
    listener: TcpListener,
    local_addr: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    app: Router,
    mut token: ShutdownToken,
) -> Result<()> {
    let service = app.into_make_service_with_connect_info::<SocketAddr>();

    // dropping the serve future closes the listening socket
    match acceptor {
        Some(acceptor) => {
            let tls_listener = AxumListener {
                stream: TlsListener::new(acceptor, listener),
                local_addr,
            }
            .tap_io(|_io| {});
            tokio::select! {
                result = axum::serve(tls_listener, service).into_future() => {
                    result.with_context(|| format!("Server error on {listen}"))
                }
                reason = token.wait_for_shutdown() => {
                    tracing::debug!(listen = %listen, ?reason, "listener closing");
                    Ok(())
                }
            }
        }
        None => {
            tokio::select! {
                result = axum::serve(listener, service).into_future() => {
                    result.with_context(|| format!("Server error on {listen}"))
                }
                reason = token.wait_for_shutdown() => {
                    tracing::debug!(listen = %listen, ?reason, "listener closing");
                    Ok(())
                }
            }
        }
    }
}
