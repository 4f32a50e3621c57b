use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProbeError {
    #[error("Backend {addr} unreachable: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend {addr} did not accept a connection within {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Connectivity check used to bring a Down backend back into rotation
#[async_trait]
pub trait BackendProbe: Send + Sync + 'static {
    async fn probe(&self, addr: &str, timeout: Duration) -> ProbeResult<()>;
}
