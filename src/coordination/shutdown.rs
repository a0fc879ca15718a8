//! Shutdown coordination
//!
//! One `Shutdown` handle per process; the observer loop and anything else
//! long-running hold a `ShutdownToken` and stop when it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT); background threads get
    /// the configured grace period
    Graceful,
    /// Urgent shutdown (SIGQUIT); background threads are cancelled and not
    /// waited for
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

pub struct Shutdown {
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (signal_tx, _) = watch::channel(None);
        Self {
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Request shutdown; later requests are ignored
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    /// Token that also sees requests made before it was created
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }
}

#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.signal_rx.borrow_and_update() {
                return signal;
            }
            if self.signal_rx.changed().await.is_err() {
                // Handle dropped without a request; nothing can fire any more
                return std::future::pending().await;
            }
        }
    }
}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<Shutdown>) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;

        let shutdown_sigterm = shutdown.clone();
        tokio::spawn(async move {
            sigterm.recv().await;
            info!("Received SIGTERM");
            shutdown_sigterm.request_shutdown(ShutdownSignal::Graceful);
        });

        // Handle SIGINT (Ctrl+C)
        let shutdown_sigint = shutdown.clone();
        tokio::spawn(async move {
            sigint.recv().await;
            info!("Received SIGINT");
            shutdown_sigint.request_shutdown(ShutdownSignal::Graceful);
        });

        // Handle SIGQUIT (Ctrl+\)
        tokio::spawn(async move {
            sigquit.recv().await;
            warn!("Received SIGQUIT - urgent shutdown");
            shutdown.request_shutdown(ShutdownSignal::Urgent);
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => warn!("Ctrl+C handler failed: {}", e),
            }
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
    }

    #[tokio::test]
    async fn test_token_sees_earlier_request() {
        let shutdown = Shutdown::new();
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let mut token = shutdown.token();
        assert!(token.is_shutdown_requested());
        assert_eq!(token.wait_for_shutdown().await, ShutdownSignal::Urgent);
    }

    #[tokio::test]
    async fn test_token_wakes_on_request() {
        let shutdown = Arc::new(Shutdown::new());
        let mut token = shutdown.token();
        assert!(!token.is_shutdown_requested());

        let waiter = tokio::spawn(async move { token.wait_for_shutdown().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let signal = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signal, ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_dropped_handle_never_fires() {
        let mut token = Shutdown::new().token();
        let waited = tokio::time::timeout(Duration::from_millis(20), token.wait_for_shutdown()).await;
        assert!(waited.is_err());
    }
}
