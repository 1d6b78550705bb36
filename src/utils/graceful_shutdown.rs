use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::broadcast};

/// Why the server loop is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGTERM or SIGINT: unload every handler library and exit
    Graceful,
    /// SIGUSR1: unload, re-read the configuration and serve again
    Restart,
    /// The signal channel went away
    Force,
}

/// Turns OS signals into a broadcast the server loop waits on.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a receiver for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Re-arm after a restart has been carried out
    pub fn reset(&self) {
        self.shutdown_initiated.store(false, Ordering::Relaxed);
    }

    /// Trigger shutdown without a signal. Only the first trigger until
    /// [`reset`](Self::reset) is broadcast.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Shutdown triggered: {:?}", reason);
            if self.shutdown_tx.send(reason).is_err() {
                tracing::debug!("No one is waiting for the shutdown signal");
            }
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Listen for OS signals until the process exits.
    pub async fn run_signal_handler(&self) -> Result<()> {
        let mut sigterm = Self::unix_signal(SignalKind::Terminate)?;
        let mut sigusr1 = Self::unix_signal(SignalKind::Restart)?;
        tracing::info!(
            "Signal handler started. Listening for SIGTERM, SIGINT (shutdown) and SIGUSR1 (restart)"
        );

        loop {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result.wrap_err("Failed to listen for Ctrl+C")?;
                    tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                    self.trigger_shutdown(ShutdownReason::Graceful);
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    self.trigger_shutdown(ShutdownReason::Graceful);
                }
                _ = sigusr1.recv() => {
                    tracing::info!("Received SIGUSR1, initiating restart...");
                    self.trigger_shutdown(ShutdownReason::Restart);
                }
            }
        }
    }

    #[cfg(unix)]
    fn unix_signal(kind: SignalKind) -> Result<UnixSignal> {
        use tokio::signal::unix;
        let signal_kind = match kind {
            SignalKind::Terminate => unix::SignalKind::terminate(),
            SignalKind::Restart => unix::SignalKind::user_defined1(),
        };
        let signal = unix::signal(signal_kind)
            .wrap_err_with(|| format!("Failed to register {kind:?} handler"))?;
        Ok(UnixSignal(Some(signal)))
    }

    #[cfg(not(unix))]
    fn unix_signal(_kind: SignalKind) -> Result<UnixSignal> {
        Ok(UnixSignal(None))
    }

    /// Wait for the next shutdown signal (used in the main server loop)
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();

        match receiver.recv().await {
            Ok(reason) => {
                tracing::info!("Shutdown signal received: {:?}", reason);
                reason
            }
            Err(_) => {
                tracing::warn!("Shutdown channel closed unexpectedly");
                ShutdownReason::Force
            }
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
enum SignalKind {
    Terminate,
    Restart,
}

/// A registered signal stream; never fires where signals don't exist.
#[cfg(unix)]
struct UnixSignal(Option<tokio::signal::unix::Signal>);

#[cfg(not(unix))]
struct UnixSignal(Option<()>);

impl UnixSignal {
    #[cfg(unix)]
    async fn recv(&mut self) {
        match self.0.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
