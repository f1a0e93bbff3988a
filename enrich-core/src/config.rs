use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, str::FromStr, time::Duration};

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_CITY: &str = "Murcia";

/// Credentials and request settings for the OpenWeather API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub lang: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            lang: "es".to_string(),
            timeout_ms: 5_000,
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

impl ProviderConfig {
    /// API key, if one is set and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Address of the event broker the service listens on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl BrokerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in milliseconds; 0 disables caching.
    pub ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_ms: 1_200_000 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// default_city = "Murcia"
///
/// [provider]
/// api_key = "..."
///
/// [broker]
/// host = "127.0.0.1"
/// port = 6379
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_city: String,
    /// SQLite database file; defaults to the platform data directory.
    pub database: Option<PathBuf>,
    pub provider: ProviderConfig,
    pub broker: BrokerConfig,
    pub cache: CacheConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_city: DEFAULT_CITY.to_string(),
            database: None,
            provider: ProviderConfig::default(),
            broker: BrokerConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load config from disk (or defaults on first run) and apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_file()?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }

    /// Load config from disk only, or return defaults if it doesn't exist yet.
    pub fn load_file() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-enrich", "enrich")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Database path, falling back to `enrich.db` in the platform data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("enrich.db")),
        }
    }

    /// Overlay environment variables on top of the file configuration.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENWEATHER_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENWEATHER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(lang) = lookup("WEATHER_LANG") {
            self.provider.lang = lang;
        }
        if let Some(city) = lookup("WEATHER_DEFAULT_CITY").filter(|c| !c.trim().is_empty()) {
            self.default_city = city;
        }
        if let Some(host) = lookup("REDIS_BROKER_HOST") {
            self.broker.host = host;
        }
        if let Some(db) = lookup("ENRICH_DATABASE") {
            self.database = Some(PathBuf::from(db));
        }

        if let Some(port) = parse_env(&lookup, "REDIS_BROKER_PORT")? {
            self.broker.port = port;
        }
        if let Some(ttl) = parse_env(&lookup, "REDIS_CACHE_TTL")? {
            self.cache.ttl_ms = ttl;
        }
        if let Some(attempts) = parse_env::<u32, _>(&lookup, "WEATHER_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(ConfigError::InvalidEnv {
                    name: "WEATHER_MAX_ATTEMPTS",
                    value: attempts.to_string(),
                    reason: "must be at least 1".into(),
                });
            }
            self.provider.max_attempts = attempts;
        }
        if let Some(timeout) = parse_env(&lookup, "WEATHER_TIMEOUT_MS")? {
            self.provider.timeout_ms = timeout;
        }

        Ok(())
    }
}

fn parse_env<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_deployed_service() {
        let cfg = Config::default();

        assert_eq!(cfg.default_city, "Murcia");
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(20 * 60));
        assert_eq!(cfg.provider.max_attempts, 3);
        assert_eq!(cfg.provider.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.provider.backoff_unit(), Duration::from_secs(1));
        assert_eq!(cfg.broker.address(), "127.0.0.1:6379");
        assert!(cfg.provider.api_key().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("OPENWEATHER_API_KEY", "KEY"),
            ("REDIS_BROKER_HOST", "broker.local"),
            ("REDIS_BROKER_PORT", "7000"),
            ("REDIS_CACHE_TTL", "60000"),
            ("WEATHER_DEFAULT_CITY", "Madrid"),
            ("WEATHER_MAX_ATTEMPTS", "5"),
            ("WEATHER_TIMEOUT_MS", "250"),
        ]))
        .expect("overrides are valid");

        assert_eq!(cfg.provider.api_key(), Some("KEY"));
        assert_eq!(cfg.broker.address(), "broker.local:7000");
        assert_eq!(cfg.cache.ttl_ms, 60_000);
        assert_eq!(cfg.default_city, "Madrid");
        assert_eq!(cfg.provider.max_attempts, 5);
        assert_eq!(cfg.provider.timeout_ms, 250);
    }

    #[test]
    fn invalid_numeric_override_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(env(&[("REDIS_BROKER_PORT", "not-a-port")]))
            .unwrap_err();

        assert!(err.to_string().contains("REDIS_BROKER_PORT"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env(env(&[("WEATHER_MAX_ATTEMPTS", "0")]))
            .unwrap_err();

        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("OPENWEATHER_API_KEY", "  ")])).unwrap();

        assert!(cfg.provider.api_key().is_none());
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            default_city = "Valencia"

            [provider]
            api_key = "FILE_KEY"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.default_city, "Valencia");
        assert_eq!(cfg.provider.api_key(), Some("FILE_KEY"));
        assert_eq!(cfg.provider.max_attempts, 3);
        assert_eq!(cfg.broker.port, 6379);
    }
}
