//! Portico - a configuration-driven virtual-host reverse proxy and static file gateway.
//!
//! Portico binds one or more listeners, routes each request by `Host` header and
//! ordered path patterns, and either forwards it to a weighted pool of backend
//! servers or serves it from a directory on disk. The library exposes the
//! building blocks so the gateway can be embedded or driven from tests.
//!
//! # Features
//! - Virtual hosts with ordered regular-expression location rules (first match wins)
//! - Reverse proxying with weighted random backend selection and per-backend connection caps
//! - Per-rule timeouts, request and response header injection
//! - Static file serving with configurable index files
//! - Passive failure detection plus background recovery of Down backends
//! - Optional TLS termination per listener (HTTP/1.1 and HTTP/2)
//! - Interceptor chains around every handler (access logging built in)
//! - Graceful shutdown on SIGINT / SIGTERM
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{GatewayService, GracefulShutdown, ServerLifecycle};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = portico::config::load_config("config.yaml").await?;
//! let gateway = Arc::new(GatewayService::from_config(Arc::new(config))?);
//! let lifecycle = ServerLifecycle::new(gateway, Arc::new(GracefulShutdown::new()));
//! lifecycle.start().await?;
//! lifecycle.start_health_monitor();
//! lifecycle.wait().await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! routing tables, backend state and selection inside `core`. Everything in `core` is built
//! once from a validated configuration and is read-only afterwards, apart from backend
//! status flags and the build-once caches.
//!
//! # Error Handling
//! Startup APIs return `eyre::Result<T>` or a domain specific error type. Request-time
//! failures never escape a handler; they become 4xx/5xx responses and log lines.
//!
//! # Concurrency & Data Structures
//! Shared build-once maps (compiled patterns, handlers, backend clients) use `scc::HashMap`.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{AccessLogInterceptor, ClientPool, HealthMonitor, ServerLifecycle},
    core::GatewayService,
    ports::http_client::HttpClient,
    utils::{GracefulShutdown, ShutdownReason},
};
