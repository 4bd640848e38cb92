//! Shutdown signalling for background tasks
//!
//! Every background loop holds a [`ShutdownToken`] and selects on
//! [`ShutdownToken::cancelled`] next to its work, so stopping the process is
//! deterministic rather than a best-effort flag check.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Owner side of the shutdown signal
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a token for a background task to watch
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal every token holder to stop
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by background tasks; resolves once shutdown is requested
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is triggered. Also resolves if the [`Shutdown`]
    /// owner is dropped, so orphaned tasks do not outlive the process.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

/// Install Ctrl+C / SIGTERM handlers that trigger the given shutdown
pub fn listen_for_signals(shutdown: Arc<Shutdown>) {
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down");
        on_ctrl_c.trigger();
    });

    #[cfg(unix)]
    {
        let on_term = shutdown;
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM, shutting down");
                    on_term.trigger();
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        });
    }
}
