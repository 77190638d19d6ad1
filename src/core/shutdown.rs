//! Shutdown coordination
//!
//! A cloneable stop signal shared by the dispatcher, the worker pool and the
//! binary's signal handlers. Observers either poll [`ShutdownCoordinator::is_shutdown_requested`]
//! between iterations or await a broadcast receiver inside `tokio::select!`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Coordinates graceful shutdown across the engine
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_requested: Arc<AtomicBool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(8);
        Self {
            shutdown_tx,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown notifications
    ///
    /// Subscribe before checking [`Self::is_shutdown_requested`]: a receiver
    /// created after the trigger never sees the broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown_requested() {
            return;
        }
        // Lagged or closed both mean a trigger happened or can no longer happen
        let _ = rx.recv().await;
    }

    /// Install process signal handlers that trigger this coordinator
    ///
    /// The first SIGINT/SIGTERM/SIGHUP/SIGQUIT starts a graceful drain; a
    /// second one exits immediately with status 130.
    pub fn install_signal_handlers(&self) {
        setup_signal_handlers(self.shutdown_tx.clone(), self.shutdown_requested.clone());
    }
}

fn setup_signal_handlers(shutdown_tx: broadcast::Sender<()>, shutdown_requested: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use std::sync::atomic::AtomicUsize;
        use tokio::signal::unix::{signal, SignalKind};
        let signal_count = Arc::new(AtomicUsize::new(0));
        let signals = [
            SignalKind::interrupt(),
            SignalKind::terminate(),
            SignalKind::hangup(),
            SignalKind::quit(),
        ];

        for kind in signals {
            let tx = shutdown_tx.clone();
            let requested = shutdown_requested.clone();
            let sig_ctr = signal_count.clone();

            tokio::spawn(async move {
                let Ok(mut sig) = signal(kind) else {
                    return;
                };
                while sig.recv().await.is_some() {
                    let prev = sig_ctr.fetch_add(1, Ordering::AcqRel);
                    requested.store(true, Ordering::Release);
                    let _ = tx.send(());
                    if prev >= 1 {
                        log::warn!("Second shutdown signal received; exiting without drain");
                        std::process::exit(130);
                    }
                    log::info!("Shutdown signal received; draining in-flight jobs");
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            let mut count = 0usize;
            while tokio::signal::ctrl_c().await.is_ok() {
                shutdown_requested.store(true, Ordering::Release);
                let _ = shutdown_tx.send(());
                count += 1;
                if count > 1 {
                    std::process::exit(130);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_shutdown_coordinator_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        coordinator.trigger_shutdown();

        assert!(coordinator.is_shutdown_requested());
        let signal_received = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(signal_received.is_ok(), "Should receive shutdown signal");
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let coordinator = ShutdownCoordinator::new();
        let clone = coordinator.clone();

        clone.trigger_shutdown();

        assert!(coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_wait_returns_after_trigger() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.trigger_shutdown();

        assert!(timeout(Duration::from_millis(200), handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_triggered() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger_shutdown();
        assert!(timeout(Duration::from_millis(50), coordinator.wait()).await.is_ok());
    }
}
