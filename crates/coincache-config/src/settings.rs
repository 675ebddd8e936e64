//! Configuration structures.

use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub refresh: RefreshSettings,
    #[serde(default)]
    pub service: ServiceSettings,
}

impl AppConfig {
    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.upstream.base_url.trim().is_empty(), "upstream.base_url must not be empty"),
            (self.upstream.timeout_secs == 0, "upstream.timeout_secs must be positive"),
            (self.cache.entry_ttl_secs == 0, "cache.entry_ttl_secs must be positive"),
            (self.cache.top_ttl_secs == 0, "cache.top_ttl_secs must be positive"),
            (self.refresh.interval_secs == 0, "refresh.interval_secs must be positive"),
            (self.refresh.backoff_secs == 0, "refresh.backoff_secs must be positive"),
            (self.database.path.trim().is_empty(), "database.path must not be empty"),
            (self.service.default_list_limit == 0, "service.default_list_limit must be positive"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Message(message.to_string())),
            None => Ok(()),
        }
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// General app settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    pub environment: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "coincache".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "coincache.db".to_string(),
        }
    }
}

/// CoinGecko API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            api_key_env: "COINGECKO_API_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Read the API key from the configured variable, if set.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.is_empty())
    }
}

/// Cache entry lifetimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub entry_ttl_secs: u64,
    pub top_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            entry_ttl_secs: 10,
            top_ttl_secs: 300,
        }
    }
}

impl CacheSettings {
    pub fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    pub fn top_ttl(&self) -> Duration {
        Duration::from_secs(self.top_ttl_secs)
    }
}

/// Background refresh loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    pub backoff_secs: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            backoff_secs: 5,
        }
    }
}

impl RefreshSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Read path behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub refresh_prices_on_list: bool,
    pub default_list_limit: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            refresh_prices_on_list: true,
            default_list_limit: 100,
        }
    }
}
