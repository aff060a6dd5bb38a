//! Draining TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections and register each with the tracker
//! - Close: stop accepting, then wait (bounded) for tracked connections to finish
//!
//! # Design Decisions
//! - The raw listener lives in an `ArcSwapOption`; close swaps it out, so accept and
//!   close never contend on a lock
//! - Ordering on close: closed flag → listener released → tracker shutdown → drain wait
//! - A connection accepted while close is running is released, never handed out

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::net::connection::TrackedConnection;
use crate::net::tracker::ConnectionTracker;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    /// The raw accept call failed.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
    /// The listener has been closed; no further connections will be accepted.
    #[error("listener is closed")]
    Closed,
    /// Closing the raw listener failed; the drain wait was skipped.
    #[error("failed to close listener: {0}")]
    Close(#[source] io::Error),
    /// Connections were still open when the drain deadline passed.
    #[error("cannot complete graceful shutdown in {0:?}")]
    DrainTimeout(Duration),
}

/// Bind a raw TCP listener on `host:port`.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| ListenerError::Bind {
            address: format!("{host}:{port}"),
            source,
        })
}

/// A TCP listener that can be closed gracefully.
///
/// Every accepted connection is counted until its [`TrackedConnection`] is closed or
/// dropped. [`close`](Self::close) waits up to `max_wait` for the count to reach zero.
#[derive(Debug)]
pub struct DrainingListener {
    inner: ArcSwapOption<TcpListener>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    tracker: ConnectionTracker,
    max_wait: Duration,
}

impl DrainingListener {
    /// Wrap a bound listener.
    pub fn new(listener: TcpListener, max_wait: Duration) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (closed_tx, _) = watch::channel(false);

        tracing::info!(
            address = %local_addr,
            max_wait = ?max_wait,
            "Draining listener ready"
        );

        Ok(Self {
            inner: ArcSwapOption::from_pointee(listener),
            local_addr,
            closed: AtomicBool::new(false),
            closed_tx,
            tracker: ConnectionTracker::new(),
            max_wait,
        })
    }

    /// Accept a new connection.
    ///
    /// Returns [`ListenerError::Closed`] once [`close`](Self::close) has started, and
    /// [`ListenerError::Accept`] with the raw error for any other failure. Either way
    /// the caller should stop its accept loop.
    pub async fn accept(&self) -> Result<TrackedConnection, ListenerError> {
        let Some(inner) = self.inner.load_full() else {
            return Err(ListenerError::Closed);
        };
        let mut closed = self.closed_tx.subscribe();

        let (stream, peer_addr) = tokio::select! {
            biased;
            _ = closed.wait_for(|closed| *closed) => return Err(ListenerError::Closed),
            accepted = inner.accept() => accepted.map_err(ListenerError::Accept)?,
        };
        drop(inner);

        // Count first, then check the flag: close() sets the flag before reading the
        // count, so one side always sees the other.
        let guard = self.tracker.track();
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(peer_addr = %peer_addr, "Dropping connection accepted during close");
            drop(stream);
            drop(guard);
            return Err(ListenerError::Closed);
        }

        tracing::debug!(
            peer_addr = %peer_addr,
            connection_id = %guard.id(),
            open_connections = self.tracker.open_count(),
            "Connection accepted"
        );

        Ok(TrackedConnection::new(stream, peer_addr, guard))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections accepted and not yet closed.
    pub fn open_connections(&self) -> u64 {
        self.tracker.open_count()
    }

    /// Stop accepting and wait for open connections to finish.
    ///
    /// Fails with [`ListenerError::Close`] without waiting if the listener was already
    /// closed, and with [`ListenerError::DrainTimeout`] if connections are still open
    /// after `max_wait`. Open connections are never severed here.
    pub async fn close(&self) -> Result<(), ListenerError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::Close(io::Error::new(
                io::ErrorKind::NotConnected,
                "listener already closed",
            )));
        }

        // Release our handle to the socket and wake any pending accept so it drops its own.
        drop(self.inner.swap(None));
        self.closed_tx.send_replace(true);

        let open = self.tracker.open_count();
        tracing::info!(
            address = %self.local_addr,
            open_connections = open,
            max_wait = ?self.max_wait,
            "Listener closed, draining connections"
        );

        let start = Instant::now();
        self.tracker.begin_shutdown();
        if self.tracker.wait_drained(self.max_wait).await {
            tracing::info!(elapsed = ?start.elapsed(), "All connections drained");
            Ok(())
        } else {
            tracing::warn!(
                open_connections = self.tracker.open_count(),
                max_wait = ?self.max_wait,
                "Drain deadline passed with connections still open"
            );
            Err(ListenerError::DrainTimeout(self.max_wait))
        }
    }
}
