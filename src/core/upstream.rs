use std::{sync::Arc, time::Duration};

use crate::{
    config::models::{DEFAULT_REQUEST_TIMEOUT_MS, UpstreamConfig},
    core::{
        backend::{BackendResult, BackendServer},
        load_balancer::BalanceAlgorithm,
    },
};

/// A named pool of backends sharing one balancing policy.
#[derive(Debug)]
pub struct UpstreamPool {
    id: String,
    algorithm: BalanceAlgorithm,
    timeout: Option<Duration>,
    servers: Vec<Arc<BackendServer>>,
}

impl UpstreamPool {
    pub fn new(
        id: impl Into<String>,
        algorithm: BalanceAlgorithm,
        timeout: Option<Duration>,
        servers: Vec<Arc<BackendServer>>,
    ) -> Self {
        Self {
            id: id.into(),
            algorithm,
            timeout,
            servers,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> BackendResult<Self> {
        let servers = config
            .servers
            .iter()
            .map(|server| BackendServer::from_config(server).map(Arc::new))
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(Self::new(
            config.id.trim(),
            BalanceAlgorithm::from_name(&config.balance),
            positive_millis(config.timeout),
            servers,
        ))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn algorithm(&self) -> BalanceAlgorithm {
        self.algorithm
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn servers(&self) -> &[Arc<BackendServer>] {
        &self.servers
    }

    pub fn down_servers(&self) -> impl Iterator<Item = &Arc<BackendServer>> {
        self.servers.iter().filter(|server| !server.is_up())
    }
}

/// Forwarding deadline for one request: the rule's own timeout, then the
/// upstream's, then the process default.
pub fn effective_timeout(rule: Option<Duration>, upstream: Option<Duration>) -> Duration {
    rule.or(upstream)
        .unwrap_or(Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS))
}

/// Configured millisecond values `<= 0` mean "unset".
pub fn positive_millis(ms: i64) -> Option<Duration> {
    u64::try_from(ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
