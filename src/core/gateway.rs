//! Core gateway state.
//!
//! The `GatewayService` turns a validated [`GatewayConfig`] into the runtime
//! structures every request reads from:
//! * upstream pools with their live backend status
//! * one routing table per listener (entries sharing a listen address are merged)
//! * the shared compiled-pattern cache
//!
//! Only in-memory data lives here, which keeps it fast and easy to test in isolation.
use std::{collections::HashMap, path::PathBuf, sync::Arc};

use crate::{
    config::{
        ApplicationConfig, GatewayConfig, GatewayConfigValidator, HealthCheckConfig,
        HttpServerConfig, LocationConfig, ValidationError, ValidationResult,
    },
    core::{
        pattern_cache::PatternCache,
        routing::{HeaderInjection, HostRoutingTable, LocationRule, RuleId, RuleTarget},
        upstream::{UpstreamPool, positive_millis},
    },
};

/// Certificate material for a TLS listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// One bound address and the virtual hosts it serves.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub listen: String,
    pub tls: Option<TlsFiles>,
    pub routes: Arc<HostRoutingTable>,
}

/// Central, read-mostly gateway state shared by every listener.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    upstreams: HashMap<String, Arc<UpstreamPool>>,
    listeners: Vec<ListenerSpec>,
    patterns: PatternCache,
}

impl GatewayService {
    /// Validate `config` and build the routing state. Nothing is bound yet.
    pub fn from_config(config: Arc<GatewayConfig>) -> ValidationResult<Self> {
        GatewayConfigValidator::validate(&config)?;

        let mut upstreams = HashMap::new();
        for upstream in &config.upstreams {
            let pool = UpstreamPool::from_config(upstream).map_err(|e| {
                ValidationError::InvalidField {
                    field: format!("upstream '{}'", upstream.id),
                    message: e.to_string(),
                }
            })?;
            upstreams.insert(pool.id().to_string(), Arc::new(pool));
        }

        let listeners = Self::build_listeners(&config.http.servers)?;

        tracing::debug!(
            upstreams = upstreams.len(),
            listeners = listeners.len(),
            "gateway routing state built"
        );

        Ok(Self {
            config,
            upstreams,
            listeners,
            patterns: PatternCache::new(),
        })
    }

    /// Merge server entries by listen address, keeping declaration order.
    fn build_listeners(servers: &[HttpServerConfig]) -> ValidationResult<Vec<ListenerSpec>> {
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, (Option<TlsFiles>, HostRoutingTable)> = HashMap::new();
        let mut next_id = 0usize;

        for server in servers {
            let listen = server.listen.trim().to_string();
            if !merged.contains_key(&listen) {
                order.push(listen.clone());
            }
            let (tls, table) = merged.entry(listen).or_default();

            // the last entry for an address decides its TLS settings
            *tls = Self::tls_files(server);

            for host in &server.hosts {
                for location in &host.locations {
                    let rule = Arc::new(Self::build_rule(RuleId(next_id), location)?);
                    next_id += 1;
                    for name in host.host_names() {
                        table.push_rule(&name, Arc::clone(&rule));
                    }
                }
            }
        }

        Ok(order
            .into_iter()
            .filter_map(|listen| {
                merged.remove(&listen).map(|(tls, routes)| ListenerSpec {
                    listen,
                    tls,
                    routes: Arc::new(routes),
                })
            })
            .collect())
    }

    fn tls_files(server: &HttpServerConfig) -> Option<TlsFiles> {
        if !server.ssl {
            return None;
        }
        match (&server.cert, &server.key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            _ => None,
        }
    }

    fn build_rule(id: RuleId, location: &LocationConfig) -> ValidationResult<LocationRule> {
        let target = match (location.upstream_id(), location.static_root()) {
            (Some(upstream), _) => RuleTarget::Upstream(upstream.to_string()),
            (None, Some(root)) => RuleTarget::Static {
                root: PathBuf::from(root),
                index: location.index_names(),
            },
            (None, None) => {
                return Err(ValidationError::InvalidField {
                    field: format!("location '{}'", location.pattern),
                    message: "One of 'upstream' or 'root' is required".to_string(),
                });
            }
        };

        Ok(LocationRule {
            id,
            pattern: location.pattern.clone(),
            target,
            timeout: positive_millis(location.timeout),
            request_headers: HeaderInjection::from_map(&location.request)?,
            response_headers: HeaderInjection::from_map(&location.response)?,
        })
    }

    pub fn application(&self) -> &ApplicationConfig {
        &self.config.application
    }

    pub fn health_config(&self) -> &HealthCheckConfig {
        &self.config.health_check
    }

    pub fn upstream(&self, id: &str) -> Option<Arc<UpstreamPool>> {
        self.upstreams.get(id).cloned()
    }

    pub fn upstreams(&self) -> impl Iterator<Item = &Arc<UpstreamPool>> {
        self.upstreams.values()
    }

    pub fn listeners(&self) -> &[ListenerSpec] {
        &self.listeners
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// First rule, in declaration order, whose pattern matches `path`.
    pub async fn match_rule(
        &self,
        rules: &[Arc<LocationRule>],
        path: &str,
    ) -> Option<Arc<LocationRule>> {
        for rule in rules {
            if self.patterns.is_match(&rule.pattern, path).await {
                return Some(Arc::clone(rule));
            }
        }
        None
    }

    /// Total number of backends across every upstream.
    pub fn backend_count(&self) -> usize {
        self.upstreams.values().map(|u| u.servers().len()).sum()
    }
}
