//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs, manager.rs):
//!     Config → Bind → Wrap in DrainingListener → Spawn accept loop → Running
//!
//! Shutdown (shutdown.rs, manager.rs):
//!     Shutdown requested → Disable keep-alive → Close listener → Drain (bounded) → Terminated
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, terminate
//! - Shutdown has a timeout; a timeout is reported, never silently ignored
//! - Terminal state is reached exactly once per manager

pub mod manager;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use manager::{LifecycleError, ServerLifecycleManager, ShutdownOutcome};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use state::{LifecycleState, LifecycleStatus};
