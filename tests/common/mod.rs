//! Shared utilities for lifecycle integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use fin_server::config::ServerConfig;
use fin_server::lifecycle::{
    LifecycleError, LifecycleState, LifecycleStatus, ServerLifecycleManager, Shutdown,
    ShutdownOutcome,
};

/// A server started on an ephemeral loopback port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub status: watch::Receiver<LifecycleStatus>,
    pub handle: JoinHandle<Result<ShutdownOutcome, LifecycleError>>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request shutdown and wait for the manager to finish.
    pub async fn stop(self) -> Result<ShutdownOutcome, LifecycleError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("manager did not terminate")
            .expect("manager task panicked")
    }
}

/// Start a manager for `app` and wait until it reports `Running`.
pub async fn start_server(config: ServerConfig, app: Router) -> TestServer {
    let raw = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = raw.local_addr().unwrap();

    let manager = ServerLifecycleManager::new(config, app);
    let mut status = manager.status();
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();
    let handle = tokio::spawn(async move { manager.serve_on(raw, signal).await });

    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == LifecycleState::Running),
    )
    .await
    .expect("server never reached Running")
    .unwrap();

    TestServer {
        addr,
        shutdown,
        status,
        handle,
    }
}

/// Router with a fast `/` and a `/slow` route that signals `started` and then sleeps.
#[allow(dead_code)]
pub fn slow_app(delay: Duration, started: Arc<Notify>) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route(
            "/slow",
            get(move || {
                let started = started.clone();
                async move {
                    started.notify_one();
                    tokio::time::sleep(delay).await;
                    "slow done"
                }
            }),
        )
}

/// HTTP client that never reuses connections.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
