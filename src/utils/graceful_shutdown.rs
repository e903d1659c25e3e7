use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast, time::timeout};

/// Why the server is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM / SIGINT or a manual trigger
    Graceful,
    /// Drain deadline exceeded or the channel closed
    Force,
}

/// Broadcasts a single shutdown signal to every interested task (server, sweepers).
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    /// How long in-flight requests may drain after the signal.
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a manager with a 30-second drain deadline.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            drain_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Signal shutdown. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!(reason = ?reason, "Shutdown triggered");
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!("Shutdown already initiated, ignoring trigger");
        }
    }

    /// Wait for SIGINT or SIGTERM, then trigger a graceful shutdown.
    pub async fn run_signal_handler(&self) {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
        self.trigger_shutdown(ShutdownReason::Graceful);
    }

    /// A future resolving once shutdown has been triggered; suitable for
    /// `axum::serve(..).with_graceful_shutdown`.
    pub fn signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.subscribe();
        let initiated = self.shutdown_initiated.clone();
        async move {
            if initiated.load(Ordering::Relaxed) {
                return;
            }
            let _ = receiver.recv().await;
        }
    }

    /// Drive `drained` for at most the drain deadline; `None` if it had to be cut off.
    pub async fn wait_for_drain<F>(&self, drained: F) -> Option<F::Output>
    where
        F: Future,
    {
        match timeout(self.drain_timeout, drained).await {
            Ok(output) => Some(output),
            Err(_) => {
                tracing::error!(timeout = ?self.drain_timeout, "Drain timeout exceeded, forcing shutdown");
                None
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
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
            tracing::error!(error = %e, "Failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C is available here.
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
        assert_eq!(shutdown.drain_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_trigger_reaches_existing_subscribers_once() {
        let shutdown = GracefulShutdown::new();
        let mut receiver1 = shutdown.subscribe();
        let mut receiver2 = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Graceful);
        shutdown.trigger_shutdown(ShutdownReason::Force);
        assert!(shutdown.is_shutdown_initiated());

        assert_eq!(receiver1.try_recv().unwrap(), ShutdownReason::Graceful);
        assert_eq!(receiver2.try_recv().unwrap(), ShutdownReason::Graceful);
        assert!(receiver1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_future_resolves() {
        let shutdown = GracefulShutdown::new();
        let signal = shutdown.signal();
        shutdown.trigger_shutdown(ShutdownReason::Graceful);
        tokio::time::timeout(Duration::from_secs(1), signal)
            .await
            .unwrap();

        // Created after the trigger: resolves immediately.
        tokio::time::timeout(Duration::from_secs(1), shutdown.signal())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_drain() {
        let shutdown = GracefulShutdown::with_timeout(Duration::from_millis(20));
        assert_eq!(shutdown.wait_for_drain(async { 7 }).await, Some(7));
        assert_eq!(
            shutdown
                .wait_for_drain(std::future::pending::<()>())
                .await,
            None
        );
    }
}
