//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, register with tracker)
//!     → connection.rs (TrackedConnection, releases its slot on close/drop)
//!     → Hand off to HTTP layer
//!
//! Shutdown:
//!     listener.rs close → tracker.rs begin_shutdown → wait for drained (bounded)
//! ```
//!
//! # Design Decisions
//! - Every accepted connection is counted exactly once and released exactly once
//! - No new connection is handed out after close starts
//! - Draining never severs a connection; the waiter just stops waiting

pub mod connection;
pub mod listener;
pub mod tracker;

pub use connection::TrackedConnection;
pub use listener::{DrainingListener, ListenerError};
pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker};
