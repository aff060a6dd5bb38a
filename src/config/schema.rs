//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8081;
/// Default maximum concurrent connections from a single peer IP.
pub const DEFAULT_MAX_CONNS_PER_IP: usize = 5000;
/// Default maximum requests served on one connection before it is closed.
pub const DEFAULT_MAX_REQUESTS_PER_CONN: usize = 100;
/// Default maximum number of concurrently served connections.
pub const DEFAULT_CONCURRENCY: usize = 100_000;
/// Default maximum keep-alive duration in milliseconds.
pub const DEFAULT_KEEP_ALIVE_MS: u64 = 500;
/// Default request body limit (4 GiB).
pub const DEFAULT_MAX_REQUEST_BODY_BYTES: u64 = 4 * 1024 * 1024 * 1024;
/// Default maximum wait for connections to drain on shutdown, in milliseconds.
pub const DEFAULT_SHUTDOWN_MAX_WAIT_MS: u64 = 2000;

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub listener: ListenerConfig,

    /// Connection and request limits for the HTTP engine.
    pub http: HttpConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Replace unset (empty or zero) values with their defaults.
    pub fn normalized(mut self) -> Self {
        let listener_defaults = ListenerConfig::default();
        if self.listener.host.trim().is_empty() {
            self.listener.host = listener_defaults.host;
        }
        if self.listener.port == 0 {
            self.listener.port = listener_defaults.port;
        }

        let http = &mut self.http;
        if http.max_conns_per_ip == 0 {
            http.max_conns_per_ip = DEFAULT_MAX_CONNS_PER_IP;
        }
        if http.max_requests_per_conn == 0 {
            http.max_requests_per_conn = DEFAULT_MAX_REQUESTS_PER_CONN;
        }
        if http.concurrency == 0 {
            http.concurrency = DEFAULT_CONCURRENCY;
        }
        if http.keep_alive_ms == 0 {
            http.keep_alive_ms = DEFAULT_KEEP_ALIVE_MS;
        }
        if http.max_request_body_bytes == 0 {
            http.max_request_body_bytes = DEFAULT_MAX_REQUEST_BODY_BYTES;
        }

        if self.shutdown.max_wait_ms == 0 {
            self.shutdown.max_wait_ms = DEFAULT_SHUTDOWN_MAX_WAIT_MS;
        }

        if self.observability.log_level.trim().is_empty() {
            self.observability.log_level = ObservabilityConfig::default().log_level;
        }

        self
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind (e.g., "0.0.0.0").
    pub host: String,

    /// TCP port.
    pub port: u16,
}

impl ListenerConfig {
    /// `host:port` form, for logging.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Limits applied by the HTTP engine.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum concurrent connections per peer IP.
    pub max_conns_per_ip: usize,

    /// Maximum requests per connection; the last response carries `Connection: close`.
    pub max_requests_per_conn: usize,

    /// Maximum concurrently served connections.
    pub concurrency: usize,

    /// Maximum keep-alive duration in milliseconds.
    pub keep_alive_ms: u64,

    /// Maximum request body size in bytes.
    pub max_request_body_bytes: u64,
}

impl HttpConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn max_request_body(&self) -> usize {
        usize::try_from(self.max_request_body_bytes).unwrap_or(usize::MAX)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_conns_per_ip: DEFAULT_MAX_CONNS_PER_IP,
            max_requests_per_conn: DEFAULT_MAX_REQUESTS_PER_CONN,
            concurrency: DEFAULT_CONCURRENCY,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            max_request_body_bytes: DEFAULT_MAX_REQUEST_BODY_BYTES,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Maximum time to wait for open connections to finish, in milliseconds.
    pub max_wait_ms: u64,
}

impl ShutdownConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_SHUTDOWN_MAX_WAIT_MS,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (trace, debug, info, warn, error, or a full directive).
    pub log_level: String,

    /// Console log format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServerConfig::default();
        assert_eq!(config.listener.port, 8081);
        assert_eq!(config.shutdown.max_wait(), Duration::from_secs(2));
        assert_eq!(config.http.keep_alive(), Duration::from_millis(500));
        assert_eq!(config.http.max_requests_per_conn, 100);
    }

    #[test]
    fn normalized_fills_zero_values() {
        let mut config = ServerConfig::default();
        config.listener.host = "  ".into();
        config.listener.port = 0;
        config.http.concurrency = 0;
        config.http.keep_alive_ms = 0;
        config.shutdown.max_wait_ms = 0;

        let config = config.normalized();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn normalized_keeps_explicit_values() {
        let mut config = ServerConfig::default();
        config.listener.port = 9000;
        config.shutdown.max_wait_ms = 50;
        config.http.max_conns_per_ip = 3;

        let normalized = config.clone().normalized();
        assert_eq!(normalized, config);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            port = 9100

            [shutdown]
            max_wait_ms = 750

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.listener.port, 9100);
        assert_eq!(config.shutdown.max_wait(), Duration::from_millis(750));
        assert_eq!(config.http, HttpConfig::default());
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
