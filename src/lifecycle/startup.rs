//! Startup orchestration.
//!
//! # Responsibilities
//! - Bind the configured listen address
//! - Report the bound address
//!
//! # Design Decisions
//! - Fail fast: a bind error is fatal and never retried

use tokio::net::TcpListener;

use crate::config::ListenerConfig;
use crate::net::listener::{self, ListenerError};

/// Bind the raw listener described by `config`.
pub async fn bind_listener(config: &ListenerConfig) -> Result<TcpListener, ListenerError> {
    let listener = listener::bind(&config.host, config.port).await?;
    match listener.local_addr() {
        Ok(addr) => tracing::info!(address = %addr, "Listener bound"),
        Err(_) => tracing::info!(address = %config.bind_address(), "Listener bound"),
    }
    Ok(listener)
}
