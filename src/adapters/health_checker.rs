use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::{net::TcpStream, time::MissedTickBehavior};

use crate::{
    core::{backend::BackendServer, gateway::GatewayService},
    ports::health_probe::{BackendProbe, ProbeError, ProbeResult},
    utils::graceful_shutdown::ShutdownToken,
};

/// Probe that succeeds when a TCP connection to the backend can be opened.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl BackendProbe for TcpProbe {
    async fn probe(&self, addr: &str, timeout: Duration) -> ProbeResult<()> {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(source)) => Err(ProbeError::Unreachable {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(ProbeError::Timeout {
                addr: addr.to_string(),
                timeout,
            }),
        }
    }
}

/// Background loop that brings Down backends back once they accept connections again.
///
/// Only Down backends are probed; Up backends are demoted by the forwarding
/// path when a connection attempt fails.
pub struct HealthMonitor {
    gateway: Arc<GatewayService>,
    probe: Arc<dyn BackendProbe>,
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self::with_probe(gateway, Arc::new(TcpProbe))
    }

    pub fn with_probe(gateway: Arc<GatewayService>, probe: Arc<dyn BackendProbe>) -> Self {
        let config = gateway.health_config();
        let interval = Duration::from_millis(config.interval_ms.max(1));
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        Self {
            gateway,
            probe,
            interval,
            timeout,
        }
    }

    /// Run until `shutdown` fires. The first check happens one interval after start.
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            backends = self.gateway.backend_count(),
            "health monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // probes in flight must not hold up shutdown
                    tokio::select! {
                        recovered = self.check_once() => {
                            if recovered > 0 {
                                tracing::debug!(recovered, "health check cycle completed");
                            }
                        }
                        reason = shutdown.wait_for_shutdown() => {
                            tracing::info!(?reason, "health monitor stopping mid-cycle");
                            break;
                        }
                    }
                }
                reason = shutdown.wait_for_shutdown() => {
                    tracing::info!(?reason, "health monitor stopping");
                    break;
                }
            }
        }
    }

    /// Probe every Down backend once, concurrently. Returns how many came back Up.
    pub async fn check_once(&self) -> usize {
        let down: Vec<(String, Arc<BackendServer>)> = self
            .gateway
            .upstreams()
            .flat_map(|upstream| {
                upstream
                    .down_servers()
                    .map(|server| (upstream.id().to_string(), Arc::clone(server)))
            })
            .collect();

        if down.is_empty() {
            return 0;
        }

        let probes = down.iter().map(|(upstream, server)| async move {
            tracing::info!(upstream = %upstream, backend = server.addr(), "backend is down, probing");
            match self.probe.probe(server.addr(), self.timeout).await {
                Ok(()) => {
                    if server.mark_up() {
                        tracing::info!(upstream = %upstream, backend = server.addr(), "backend recovered");
                        return true;
                    }
                    false
                }
                Err(e) => {
                    tracing::debug!(upstream = %upstream, backend = server.addr(), error = %e, "backend still down");
                    false
                }
            }
        });

        join_all(probes).await.into_iter().filter(|up| *up).count()
    }
}
