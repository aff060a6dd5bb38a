//! Graceful-shutdown HTTP server core.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{ServerLifecycleManager, Shutdown, ShutdownOutcome};
pub use net::{ConnectionTracker, DrainingListener};
