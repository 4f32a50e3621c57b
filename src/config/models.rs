//! Configuration data structures for Portico.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. They are
//! intentionally serde‑friendly and include defaults so that minimal configs remain concise.
//! Keys are snake_case because the `config` crate folds key case while loading.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Path used by the CLI when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
/// Forwarding deadline used when neither the location nor the upstream sets one.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Health monitor tick.
pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 3_000;
/// Bound on a single health probe connection attempt.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
/// Concurrent connections allowed per backend when the server spec omits `;maxConns`.
pub const DEFAULT_MAX_CONNS: usize = 512;
/// Relative weight of a backend when none is configured.
pub const DEFAULT_WEIGHT: u32 = 1;

fn default_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root of the configuration tree.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub application: ApplicationConfig,
    pub health_check: HealthCheckConfig,
    pub upstreams: Vec<UpstreamConfig>,
    pub http: HttpConfig,
}

/// Process-wide settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Worker threads for the async runtime
    pub processes: usize,
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub log_level: String,
    pub log_format: LogFormat,
    /// Attach the access-log interceptor to every execution chain
    pub access_log: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            processes: default_processes(),
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            access_log: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Background recovery of backends marked Down.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    /// Mark a backend Down when a forwarding attempt cannot connect to it.
    /// Ignored while `enabled` is false, since nothing would bring it back.
    pub demote_on_failure: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            demote_on_failure: true,
        }
    }
}

/// A named pool of backend servers.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    pub id: String,
    /// Balancing algorithm name; empty or unknown falls back to `random`
    pub balance: String,
    /// Forwarding deadline in milliseconds, `<= 0` means unset
    pub timeout: i64,
    pub servers: Vec<BackendServerConfig>,
}

/// A backend entry: either the compact `host:port[;maxConns]` string or a table.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum BackendServerConfig {
    Address(String),
    Detailed(BackendServerDetail),
}

impl From<&str> for BackendServerConfig {
    fn from(spec: &str) -> Self {
        BackendServerConfig::Address(spec.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendServerDetail {
    pub addr: String,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub max_conns: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HttpConfig {
    pub servers: Vec<HttpServerConfig>,
}

/// One listener and the virtual hosts it answers for.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HttpServerConfig {
    pub listen: String,
    pub ssl: bool,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub hosts: Vec<VirtualHostConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct VirtualHostConfig {
    /// One or more comma-separated host names sharing the same locations
    pub host: String,
    pub locations: Vec<LocationConfig>,
}

impl VirtualHostConfig {
    /// Host names listed by this entry, trimmed and lower-cased.
    pub fn host_names(&self) -> Vec<String> {
        self.host
            .split(',')
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// A (pattern, target) binding under a virtual host.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LocationConfig {
    /// Regular expression tested against the request path
    pub pattern: String,
    pub upstream: Option<String>,
    pub root: Option<String>,
    /// Comma-separated index file names for directory requests
    pub index: Option<String>,
    /// Forwarding deadline in milliseconds, `<= 0` defers to the upstream
    pub timeout: i64,
    pub request: HashMap<String, String>,
    pub response: HashMap<String, String>,
}

impl LocationConfig {
    pub fn index_names(&self) -> Vec<String> {
        self.index
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn upstream_id(&self) -> Option<&str> {
        self.upstream
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    pub fn static_root(&self) -> Option<&str> {
        self.root
            .as_deref()
            .map(str::trim)
            .filter(|root| !root.is_empty())
    }
}
