pub mod client_pool;
pub mod dispatcher;
pub mod file_system;
pub mod handlers;
pub mod health_checker;
pub mod http_client;
pub mod interceptors;
pub mod server;
pub mod tls;

/// Re-export commonly used types from adapters
pub use client_pool::{BackendClientSet, ClientPool};
pub use dispatcher::{Dispatcher, HandlerExecutionChain, HandlerInterceptor, RequestSummary};
pub use file_system::FileSystemAdapter;
pub use handlers::{HandlerRegistry, TerminalHandler};
pub use health_checker::{HealthMonitor, TcpProbe};
pub use http_client::{BackendClient, BackendClientOptions};
pub use interceptors::AccessLogInterceptor;
pub use server::{ListenerRegistry, ServerLifecycle};
