//! Configuration management.

mod settings;

pub use settings::{
    AppConfig, AppSettings, CacheSettings, DatabaseConfig, LoggingConfig, RefreshSettings,
    ServerConfig, ServiceSettings, UpstreamConfig,
};

use config::{Config, ConfigError, Environment, File};
use std::path::Path;

/// Load configuration from file and environment, then validate it.
///
/// The file is optional; `COINCACHE__SECTION__KEY` variables override it.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path).required(false))
        .add_source(
            Environment::with_prefix("COINCACHE")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app: AppConfig = config.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("coincache-config-does-not-exist.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.refresh.interval_secs, 60);
        assert_eq!(config.cache.entry_ttl_secs, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let raw = r#"
            [refresh]
            interval_secs = 30

            [server]
            port = 9000
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.refresh.interval_secs, 30);
        assert_eq!(config.refresh.backoff_secs, 5);
        assert!(config.refresh.enabled);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.service.refresh_prices_on_list);
    }
}
