//! HTTP serving engine.
//!
//! # Responsibilities
//! - Wrap the application router with middleware (request ID, tracing, body limit)
//! - Run the accept loop against a draining listener
//! - Enforce per-peer and global connection limits
//! - Serve each connection with hyper's HTTP/1 state machine
//! - Stop keep-alive reuse on request (max requests, max age, shutdown)

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Request},
    Router,
};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tower::ServiceExt;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::HttpConfig;
use crate::http::limits::{PeerLimiter, PeerSlot};
use crate::http::request::UuidRequestId;
use crate::net::{DrainingListener, ListenerError, TrackedConnection};
use crate::observability::metrics;

/// Error that ends the accept loop while the server is still meant to be running.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("accept loop failed: {0}")]
    Accept(#[source] ListenerError),
}

/// Handle used to stop keep-alive reuse on every live connection.
#[derive(Debug, Clone)]
pub struct KeepAliveSwitch {
    tx: Arc<watch::Sender<bool>>,
}

impl KeepAliveSwitch {
    /// Ask every connection to finish its current request and then close.
    pub fn disable(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!(
                connections = self.tx.receiver_count(),
                "Keep-alive disabled for all connections"
            );
        }
    }

    pub fn is_disabled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionLimits {
    max_requests: usize,
    keep_alive: Duration,
}

const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a connection was turned away before being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    PeerLimit,
    Concurrency,
}

impl Rejection {
    fn label(self) -> &'static str {
        match self {
            Rejection::PeerLimit => "peer_limit",
            Rejection::Concurrency => "concurrency",
        }
    }

    /// Complete HTTP/1.1 response written before the connection is closed.
    fn response(self) -> &'static [u8] {
        match self {
            Rejection::PeerLimit => b"HTTP/1.1 429 Too Many Requests\r\n\
                  Content-Type: text/plain\r\n\
                  Content-Length: 38\r\n\
                  Connection: close\r\n\r\n\
                  too many connections from your address",
            Rejection::Concurrency => b"HTTP/1.1 503 Service Unavailable\r\n\
                  Content-Type: text/plain\r\n\
                  Content-Length: 33\r\n\
                  Connection: close\r\n\r\n\
                  server concurrency limit exceeded",
        }
    }
}

/// Slots a connection holds for as long as it is served.
struct ConnectionSlots {
    _peer: PeerSlot,
    _permit: OwnedSemaphorePermit,
}

/// HTTP server driving the application router.
pub struct HttpServer {
    router: Router,
    limits: ConnectionLimits,
    peers: PeerLimiter,
    concurrency: Arc<Semaphore>,
    keep_alive_off: Arc<watch::Sender<bool>>,
}

impl HttpServer {
    /// Create a new HTTP server around `app`.
    pub fn new(app: Router, config: &HttpConfig) -> Self {
        let router = Self::build_router(app, config);
        let (keep_alive_off, _) = watch::channel(false);

        Self {
            router,
            limits: ConnectionLimits {
                max_requests: config.max_requests_per_conn,
                keep_alive: config.keep_alive(),
            },
            peers: PeerLimiter::new(config.max_conns_per_ip),
            concurrency: Arc::new(Semaphore::new(
                config.concurrency.min(Semaphore::MAX_PERMITS),
            )),
            keep_alive_off: Arc::new(keep_alive_off),
        }
    }

    /// Wrap the application router with the engine's middleware layers.
    fn build_router(app: Router, config: &HttpConfig) -> Router {
        app.layer(RequestBodyLimitLayer::new(config.max_request_body()))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Switch used to stop keep-alive reuse once draining starts.
    pub fn keep_alive_switch(&self) -> KeepAliveSwitch {
        KeepAliveSwitch {
            tx: Arc::clone(&self.keep_alive_off),
        }
    }

    /// Run the accept loop until the listener is closed or fails.
    ///
    /// Returns `Ok(())` when the listener was closed, `Err` for any other accept error.
    pub async fn serve(self, listener: Arc<DrainingListener>) -> Result<(), ServeError> {
        tracing::info!(
            address = %listener.local_addr(),
            max_conns_per_ip = self.peers.max_per_peer(),
            concurrency = self.concurrency.available_permits(),
            "HTTP server accepting connections"
        );

        loop {
            let connection = match listener.accept().await {
                Ok(connection) => connection,
                Err(ListenerError::Closed) => {
                    tracing::info!("Listener closed, accept loop stopped");
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, stopping accept loop");
                    return Err(ServeError::Accept(e));
                }
            };
            metrics::record_connection_accepted();

            let peer_addr = connection.peer_addr();
            let Some(peer) = self.peers.try_acquire(peer_addr.ip()) else {
                tracing::warn!(
                    peer_addr = %peer_addr,
                    limit = self.peers.max_per_peer(),
                    "Too many connections from peer, closing"
                );
                tokio::spawn(reject(connection, Rejection::PeerLimit));
                continue;
            };
            let Ok(permit) = Arc::clone(&self.concurrency).try_acquire_owned() else {
                tracing::warn!(peer_addr = %peer_addr, "Concurrency limit reached, closing");
                tokio::spawn(reject(connection, Rejection::Concurrency));
                continue;
            };

            tokio::spawn(serve_connection(
                connection,
                self.router.clone(),
                self.limits,
                self.keep_alive_off.subscribe(),
                ConnectionSlots {
                    _peer: peer,
                    _permit: permit,
                },
            ));
        }
    }
}

/// Answer a connection that will not be served with an error status, then close it.
async fn reject(mut connection: TrackedConnection, rejection: Rejection) {
    metrics::record_connection_rejected(rejection.label());

    let written =
        tokio::time::timeout(REJECT_WRITE_TIMEOUT, connection.write_all(rejection.response())).await;
    match written {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %connection.id(), error = %e, "Failed to write rejection");
        }
        Err(_) => {
            tracing::debug!(connection_id = %connection.id(), "Timed out writing rejection");
        }
    }
    if let Err(e) = connection.close().await {
        tracing::trace!(connection_id = %connection.id(), error = %e, "Close after rejection failed");
    }
}

/// Serve one connection until the peer leaves or keep-alive ends it.
///
/// Keep-alive ends when the connection outlives `limits.keep_alive` or when the
/// engine's keep-alive switch is flipped; in both cases the in-flight request
/// completes before the connection closes.
async fn serve_connection(
    connection: TrackedConnection,
    router: Router,
    limits: ConnectionLimits,
    mut keep_alive_off: watch::Receiver<bool>,
    _slots: ConnectionSlots,
) {
    let connection_id = connection.id();
    let peer_addr = connection.peer_addr();
    metrics::connection_opened();

    let served = AtomicUsize::new(0);
    let service = service_fn(move |request: Request<Incoming>| {
        let router = router.clone();
        let nth = served.fetch_add(1, Ordering::Relaxed) + 1;
        async move {
            let mut response = router.oneshot(request).await?;
            if limits.max_requests > 0 && nth >= limits.max_requests {
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));
            }
            Ok::<_, Infallible>(response)
        }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(connection), service);
    tokio::pin!(conn);

    let max_age = tokio::time::sleep(limits.keep_alive);
    tokio::pin!(max_age);
    let mut closing = false;

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(connection_id = %connection_id, peer_addr = %peer_addr, error = %e, "Connection error");
                }
                break;
            }
            _ = &mut max_age, if !closing => {
                tracing::trace!(connection_id = %connection_id, "Keep-alive duration reached");
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
            _ = keep_alive_off.wait_for(|off| *off), if !closing => {
                tracing::debug!(connection_id = %connection_id, "Draining connection");
                conn.as_mut().graceful_shutdown();
                closing = true;
            }
        }
    }

    metrics::connection_closed();
    tracing::trace!(connection_id = %connection_id, peer_addr = %peer_addr, "Connection finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[test]
    fn rejection_responses_are_complete() {
        for (rejection, status) in [
            (Rejection::PeerLimit, "HTTP/1.1 429 "),
            (Rejection::Concurrency, "HTTP/1.1 503 "),
        ] {
            let text = std::str::from_utf8(rejection.response()).unwrap();
            assert!(text.starts_with(status));
            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            assert!(head.contains(&format!("Content-Length: {}", body.len())));
            assert!(head.contains("Connection: close"));
        }
    }

    #[test]
    fn keep_alive_switch_is_shared() {
        let server = HttpServer::new(Router::new(), &HttpConfig::default());
        let a = server.keep_alive_switch();
        let b = server.keep_alive_switch();
        assert!(!a.is_disabled());

        b.disable();
        assert!(a.is_disabled());
        b.disable();
        assert!(a.is_disabled());
    }

    #[tokio::test]
    async fn serve_returns_ok_when_listener_closes() {
        let raw = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listener = Arc::new(DrainingListener::new(raw, Duration::from_millis(100)).unwrap());
        let app = Router::new().route("/", get(|| async { "ok" }));
        let server = HttpServer::new(app, &HttpConfig::default());

        let task = tokio::spawn(server.serve(Arc::clone(&listener)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
