//! Shutdown request token.

use std::sync::Arc;
use tokio::sync::watch;

/// Coordinator for graceful shutdown.
///
/// Whoever owns a `Shutdown` can request it (the OS signal adapter, a test harness);
/// the lifecycle manager waits on a [`ShutdownSignal`]. Requests are sticky, so a
/// signal subscribed after the trigger still observes it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown request.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Request shutdown. Returns `true` for the first request only.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
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

/// Receiving side of [`Shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is requested.
    ///
    /// Dropping every [`Shutdown`] handle also counts as a request.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|requested| *requested).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
