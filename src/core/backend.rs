use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use thiserror::Error;

use crate::config::models::{BackendServerConfig, DEFAULT_MAX_CONNS, DEFAULT_WEIGHT};

const STATUS_DOWN: u8 = 0;
const STATUS_UP: u8 = 1;

/// Errors related to backend operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    #[error("Invalid backend address '{0}': expected host:port")]
    InvalidAddress(String),

    #[error("Invalid connection limit in '{spec}': {reason}")]
    InvalidMaxConns { spec: String, reason: String },

    #[error("Invalid weight for backend '{0}': must be greater than 0")]
    InvalidWeight(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Availability of a backend as seen by the balancer and the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Up,
    Down,
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendStatus::Up => f.write_str("up"),
            BackendStatus::Down => f.write_str("down"),
        }
    }
}

/// One network endpoint of an upstream pool.
///
/// The status flag is the only state mutated in steady state. Forwarding
/// requests read it on every selection while the health monitor and the
/// failure path flip it, so it lives in an atomic.
#[derive(Debug)]
pub struct BackendServer {
    addr: String,
    weight: u32,
    max_conns: usize,
    status: AtomicU8,
}

impl BackendServer {
    /// Creates a backend in the Up state
    pub fn new(addr: impl Into<String>, weight: u32, max_conns: usize) -> Self {
        Self {
            addr: addr.into(),
            weight,
            max_conns,
            status: AtomicU8::new(STATUS_UP),
        }
    }

    /// Parse the compact `host:port[;maxConns]` form.
    pub fn parse(spec: &str) -> BackendResult<Self> {
        let (addr, max_conns) = match spec.split_once(';') {
            Some((addr, limit)) => {
                let limit = limit.trim();
                let max_conns = limit.parse::<usize>().map_err(|e| BackendError::InvalidMaxConns {
                    spec: spec.to_string(),
                    reason: e.to_string(),
                })?;
                (addr.trim(), max_conns)
            }
            None => (spec.trim(), DEFAULT_MAX_CONNS),
        };

        Self::with_limits(addr, DEFAULT_WEIGHT, max_conns, spec)
    }

    pub fn from_config(config: &BackendServerConfig) -> BackendResult<Self> {
        match config {
            BackendServerConfig::Address(spec) => Self::parse(spec),
            BackendServerConfig::Detailed(detail) => Self::with_limits(
                detail.addr.trim(),
                detail.weight.unwrap_or(DEFAULT_WEIGHT),
                detail.max_conns.unwrap_or(DEFAULT_MAX_CONNS),
                &detail.addr,
            ),
        }
    }

    fn with_limits(addr: &str, weight: u32, max_conns: usize, spec: &str) -> BackendResult<Self> {
        if !is_host_port(addr) {
            return Err(BackendError::InvalidAddress(addr.to_string()));
        }
        if max_conns == 0 {
            return Err(BackendError::InvalidMaxConns {
                spec: spec.to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if weight == 0 {
            return Err(BackendError::InvalidWeight(addr.to_string()));
        }
        Ok(Self::new(addr, weight, max_conns))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_conns(&self) -> usize {
        self.max_conns
    }

    pub fn status(&self) -> BackendStatus {
        if self.status.load(Ordering::Acquire) == STATUS_UP {
            BackendStatus::Up
        } else {
            BackendStatus::Down
        }
    }

    pub fn is_up(&self) -> bool {
        self.status() == BackendStatus::Up
    }

    /// Flip Down → Up. Returns true only for the caller that made the transition.
    pub fn mark_up(&self) -> bool {
        self.status
            .compare_exchange(STATUS_DOWN, STATUS_UP, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Flip Up → Down. Returns true only for the caller that made the transition.
    pub fn mark_down(&self) -> bool {
        self.status
            .compare_exchange(STATUS_UP, STATUS_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

fn is_host_port(addr: &str) -> bool {
    let Some((host, port)) = addr.rsplit_once(':') else {
        return false;
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return false;
    }
    // bare IPv6 literals must be bracketed
    if host.starts_with('[') {
        host.ends_with(']')
    } else {
        !host.contains(':')
    }
}
