use std::sync::{Arc, OnceLock};

use tokio::{signal, sync::broadcast};

/// Why the process is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from code, e.g. tests or an embedding application
    Requested,
}

/// Coordinates shutdown between the signal handler, every listener task and
/// the health monitor.
///
/// The first trigger wins; its reason is recorded so components that start
/// waiting late still observe it.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Trigger shutdown. Returns false if it was already under way.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self.reason.set(reason).is_err() {
            tracing::debug!(?reason, "shutdown already initiated, ignoring");
            return false;
        }
        tracing::info!(?reason, "shutdown initiated");
        // no receivers simply means nothing is running yet
        let _ = self.shutdown_tx.send(reason);
        true
    }

    /// Listen for SIGINT / SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) {
        tracing::info!("signal handler started, listening for SIGINT and SIGTERM");

        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => {
                        self.trigger_shutdown(ShutdownReason::Interrupt);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to listen for SIGINT");
                        std::future::pending::<()>().await;
                    }
                }
            }
            _ = Self::wait_for_sigterm() => {
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
            reason = self.wait_for_shutdown_signal() => {
                tracing::debug!(?reason, "signal handler stopping");
            }
        }
    }

    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        // On non-Unix systems, we only have Ctrl+C
        std::future::pending::<()>().await;
    }

    /// Wait until shutdown is triggered, returning immediately if it already was
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        self.shutdown_token().wait_for_shutdown().await
    }

    /// Create a shutdown token that can be used to cancel operations
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.subscribe(),
            reason: Arc::clone(&self.reason),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A token that can be used to check for shutdown signals
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            reason: Arc::clone(&self.reason),
        }
    }
}

impl ShutdownToken {
    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Non-blocking check
    pub fn try_shutdown(&mut self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&mut self) -> ShutdownReason {
        // the reason is recorded before it is broadcast, so checking it after
        // subscribing cannot miss a trigger
        if let Some(reason) = self.reason.get() {
            return *reason;
        }
        match self.receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => self
                .reason
                .get()
                .copied()
                .unwrap_or(ShutdownReason::Requested),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
        assert_eq!(shutdown.reason(), None);
    }

    #[tokio::test]
    async fn test_first_trigger_wins() {
        let shutdown = GracefulShutdown::new();

        assert!(shutdown.trigger_shutdown(ShutdownReason::Terminate));
        assert!(!shutdown.trigger_shutdown(ShutdownReason::Interrupt));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Terminate));
    }

    #[tokio::test]
    async fn test_shutdown_token() {
        let shutdown = GracefulShutdown::new();
        let mut token = shutdown.shutdown_token();

        assert!(!token.is_shutdown_initiated());
        assert!(token.try_shutdown().is_none());

        shutdown.trigger_shutdown(ShutdownReason::Requested);

        assert!(token.is_shutdown_initiated());
        assert_eq!(token.try_shutdown(), Some(ShutdownReason::Requested));
    }

    #[tokio::test]
    async fn test_late_waiters_observe_earlier_trigger() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger_shutdown(ShutdownReason::Interrupt);

        let mut token = shutdown.shutdown_token();
        let reason = timeout(Duration::from_millis(100), token.wait_for_shutdown())
            .await
            .expect("token should resolve immediately");
        assert_eq!(reason, ShutdownReason::Interrupt);
    }

    #[tokio::test]
    async fn test_cloned_tokens_all_wake() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let token = shutdown.shutdown_token();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let mut token = token.clone();
                tokio::spawn(async move { token.wait_for_shutdown().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger_shutdown(ShutdownReason::Requested);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), ShutdownReason::Requested);
        }
    }
}
