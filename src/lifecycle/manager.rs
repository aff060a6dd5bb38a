//! Server lifecycle manager.
//!
//! # Responsibilities
//! - Bind the listen address and start the HTTP engine in the background
//! - Wait for either a shutdown request or the accept loop failing
//! - On shutdown: disable keep-alive, close the listener, wait (bounded) for drain
//! - Publish the lifecycle state for observers
//!
//! # Design Decisions
//! - Config is passed in, never read from globals
//! - Shutdown arrives as a `ShutdownSignal`, so tests drive it without OS signals
//! - The accept loop reports its end on a single oneshot; one `select!` decides
//!   between that and the shutdown request, so close runs at most once

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};

use crate::config::ServerConfig;
use crate::http::{HttpServer, ServeError};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::lifecycle::startup;
use crate::lifecycle::state::{LifecycleState, LifecycleStatus};
use crate::net::{DrainingListener, ListenerError};
use crate::observability::metrics;

/// Why the server did not reach a graceful shutdown.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("server failed to start: {0}")]
    Bind(#[source] ListenerError),
    #[error(transparent)]
    Serve(#[from] ServeError),
    #[error("accept loop stopped unexpectedly")]
    ServeStopped,
}

/// How a requested shutdown ended.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// Every connection finished before the deadline.
    Drained,
    /// Connections were still open after the configured maximum wait.
    DrainTimedOut(Duration),
    /// The listener could not be closed; nothing was waited for.
    CloseFailed(ListenerError),
}

impl ShutdownOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ShutdownOutcome::Drained)
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ShutdownOutcome::Drained => "drained",
            ShutdownOutcome::DrainTimedOut(_) => "timed_out",
            ShutdownOutcome::CloseFailed(_) => "close_failed",
        }
    }
}

/// Owns the HTTP engine for one process run and drives it from start to termination.
pub struct ServerLifecycleManager {
    config: ServerConfig,
    app: Router,
    status: watch::Sender<LifecycleStatus>,
}

impl ServerLifecycleManager {
    /// Create a manager for `app`. Unset config values are replaced by defaults.
    pub fn new(config: ServerConfig, app: Router) -> Self {
        let (status, _) = watch::channel(LifecycleStatus::default());
        Self {
            config: config.normalized(),
            app,
            status,
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Observe state changes.
    pub fn status(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.subscribe()
    }

    /// Bind the configured address, then serve until shutdown or failure.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<ShutdownOutcome, LifecycleError> {
        let raw = match startup::bind_listener(&self.config.listener).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(
                    address = %self.config.listener.bind_address(),
                    error = %e,
                    "Failed to bind listen address"
                );
                self.transition(LifecycleState::FailedToBind);
                return Err(LifecycleError::Bind(e));
            }
        };

        self.serve_on(raw, shutdown).await
    }

    /// Serve on an already bound listener until shutdown or failure.
    pub async fn serve_on(
        self,
        raw: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<ShutdownOutcome, LifecycleError> {
        let listener = match DrainingListener::new(raw, self.config.shutdown.max_wait()) {
            Ok(listener) => Arc::new(listener),
            Err(source) => {
                self.transition(LifecycleState::FailedToBind);
                return Err(LifecycleError::Bind(ListenerError::Bind {
                    address: self.config.listener.bind_address(),
                    source,
                }));
            }
        };
        self.serve_listener(listener, shutdown).await
    }

    /// Serve on a draining listener until shutdown or until its accept loop ends.
    pub(crate) async fn serve_listener(
        self,
        listener: Arc<DrainingListener>,
        mut shutdown: ShutdownSignal,
    ) -> Result<ShutdownOutcome, LifecycleError> {
        let local_addr = listener.local_addr();

        let server = HttpServer::new(self.app.clone(), &self.config.http);
        let keep_alive = server.keep_alive_switch();
        let (serve_tx, serve_rx) = oneshot::channel();
        tokio::spawn({
            let listener = Arc::clone(&listener);
            async move {
                let _ = serve_tx.send(server.serve(listener).await);
            }
        });

        self.status.send_modify(|status| status.local_addr = Some(local_addr));
        self.transition(LifecycleState::Running);
        tracing::info!(
            address = %local_addr,
            max_wait = ?self.config.shutdown.max_wait(),
            "Server running"
        );

        tokio::select! {
            result = serve_rx => {
                let err = match result {
                    Ok(Err(e)) => LifecycleError::Serve(e),
                    Ok(Ok(())) | Err(_) => LifecycleError::ServeStopped,
                };
                tracing::error!(address = %local_addr, error = %err, "Server stopped while running");
                self.transition(LifecycleState::Terminated);
                Err(err)
            }
            () = shutdown.recv() => {
                self.transition(LifecycleState::Draining);
                keep_alive.disable();

                let start = Instant::now();
                let outcome = match listener.close().await {
                    Ok(()) => {
                        tracing::info!(elapsed = ?start.elapsed(), "Server gracefully stopped");
                        ShutdownOutcome::Drained
                    }
                    Err(ListenerError::DrainTimeout(max_wait)) => {
                        tracing::error!(
                            max_wait = ?max_wait,
                            open_connections = listener.open_connections(),
                            "Server stopped with connections still open"
                        );
                        ShutdownOutcome::DrainTimedOut(max_wait)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to close listener");
                        ShutdownOutcome::CloseFailed(e)
                    }
                };
                metrics::record_shutdown(outcome.label(), start.elapsed());

                self.transition(LifecycleState::Terminated);
                Ok(outcome)
            }
        }
    }

    fn transition(&self, next: LifecycleState) {
        self.status.send_modify(|status| {
            debug_assert!(
                status.state.can_transition_to(next),
                "illegal lifecycle transition {} -> {}",
                status.state,
                next
            );
            tracing::info!(from = %status.state, to = %next, "Lifecycle transition");
            status.state = next;
        });
    }
}
