//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TrackedConnection (from net::listener)
//!     → server.rs (limits, hyper HTTP/1 connection, keep-alive policy)
//!     → request.rs (request ID)
//!     → application Router
//!     → Send response to client
//! ```

pub mod limits;
pub mod request;
pub mod server;

pub use request::UuidRequestId;
pub use server::{HttpServer, KeepAliveSwitch, ServeError};
