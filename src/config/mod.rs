/// Configuration management for the flowgate engine
///
/// Server, database, engine defaults and outbound service endpoints. Everything is read from
/// `FLOWGATE_*` environment variables with container-friendly defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    /// Key: service name (e.g. "Apollo"), Value: base URL
    pub services: HashMap<String, String>,
    /// Service that receives SEND_NOTIFICATION requests; notifications are only logged when unset
    pub notification_service: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL (e.g., "sqlite://data/flowgate.db?mode=rwc")
    pub url: String,
}

/// Engine-wide defaults for actions that do not set their own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub action_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl EngineConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Parse "Apollo=https://api.apollo.io,LeadScorer=http://scorer:8080"
pub fn parse_services(spec: &str) -> HashMap<String, String> {
    spec.split(',')
        .filter_map(|entry| {
            let (name, url) = entry.split_once('=')?;
            let (name, url) = (name.trim(), url.trim());
            (!name.is_empty() && !url.is_empty()).then(|| (name.to_string(), url.to_string()))
        })
        .collect()
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("FLOWGATE_HOST", "0.0.0.0"),
                port: env_parse("FLOWGATE_PORT", 3004),
            },
            database: DatabaseConfig {
                url: env_or("FLOWGATE_DATABASE_URL", "sqlite://data/flowgate.db?mode=rwc"),
            },
            engine: EngineConfig {
                action_timeout_secs: env_parse("FLOWGATE_ACTION_TIMEOUT_SECS", 30),
                retry_attempts: env_parse("FLOWGATE_RETRY_ATTEMPTS", 3),
                retry_backoff_ms: env_parse("FLOWGATE_RETRY_BACKOFF_MS", 200),
            },
            services: parse_services(&env_or("FLOWGATE_SERVICES", "")),
            notification_service: std::env::var("FLOWGATE_NOTIFICATION_SERVICE")
                .ok()
                .filter(|name| !name.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services() {
        let services = parse_services("Apollo=https://api.apollo.io, LeadScorer = http://scorer:8080,broken,=x");
        assert_eq!(services.len(), 2);
        assert_eq!(services["LeadScorer"], "http://scorer:8080");
    }
}
