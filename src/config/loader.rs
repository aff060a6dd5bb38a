//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "FIN_GO_";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then `FIN_GO_*` environment overrides,
/// then defaults for anything unset, then validation.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => ServerConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    let config = config.normalized();

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` (keys without the prefix are never
/// queried). A value that does not parse counts as unset and falls back to the
/// default once the config is normalized.
pub fn apply_env_overrides<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(host) = var("HOST") {
        config.listener.host = host;
    }
    if let Some(raw) = var("PORT") {
        config.listener.port = parse_or_zero("PORT", &raw);
    }
    if let Some(raw) = var("HTTP_MAX_CONN_PER_IP") {
        config.http.max_conns_per_ip = parse_or_zero("HTTP_MAX_CONN_PER_IP", &raw);
    }
    if let Some(raw) = var("HTTP_MAX_REQUEST_PER_CONN") {
        config.http.max_requests_per_conn = parse_or_zero("HTTP_MAX_REQUEST_PER_CONN", &raw);
    }
    if let Some(raw) = var("HTTP_MAX_CONCURRENCY") {
        config.http.concurrency = parse_or_zero("HTTP_MAX_CONCURRENCY", &raw);
    }
    if let Some(raw) = var("HTTP_MAX_KEEP_ALIVE_DURATION") {
        config.http.keep_alive_ms = parse_or_zero("HTTP_MAX_KEEP_ALIVE_DURATION", &raw);
    }
    if let Some(raw) = var("SHUTDOWN_MAX_WAIT") {
        config.shutdown.max_wait_ms = parse_or_zero("SHUTDOWN_MAX_WAIT", &raw);
    }
    if let Some(level) = var("LOG_LEVEL") {
        config.observability.log_level = level;
    }
}

fn parse_or_zero<T>(name: &str, raw: &str) -> T
where
    T: FromStr + Default,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(
                variable = %format!("{ENV_PREFIX}{name}"),
                value = %raw,
                "Ignoring unparseable environment override"
            );
            T::default()
        }
    }
}
