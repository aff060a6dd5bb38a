//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (FIN_GO_* environment overrides)
//!     → schema.rs normalized() (defaults for unset / non-positive values)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → passed by value to the lifecycle manager
//! ```
//!
//! # Design Decisions
//! - No global config: the manager receives its config explicitly
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    HttpConfig, ListenerConfig, LogFormat, ObservabilityConfig, ServerConfig, ShutdownConfig,
};
