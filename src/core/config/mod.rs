use std::str::FromStr;
use std::time::Duration;

use crate::core::aggregator::AggregatorSettings;
use crate::core::refresh::RefreshSettings;
use crate::core::upstream::client::{ClientSettings, MAX_PAGE_SIZE};

const ENV_PREFIX: &str = "TUBEFEED_";

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_DATABASE_URL: &str = "sqlite://tubefeed.db?mode=rwc";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub api_key: String,
    pub database_url: String,
    pub feed_page_size: usize,
    pub upstream_page_size: u32,
    pub max_fill_rounds: usize,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub refresh_max_pages: usize,
    pub refresh_concurrency: usize,
    pub refresh_interval: Duration,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let upstream_page_size = parse_or(&read, "UPSTREAM_PAGE_SIZE", MAX_PAGE_SIZE)?;
        if !(1..=MAX_PAGE_SIZE).contains(&upstream_page_size) {
            return Err(ConfigError::Invalid(format!(
                "{ENV_PREFIX}UPSTREAM_PAGE_SIZE must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let config = Self {
            api_base_url: read("API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: read("API_KEY").unwrap_or_default(),
            database_url: read("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            feed_page_size: positive(&read, "FEED_PAGE_SIZE", 24)?,
            upstream_page_size,
            max_fill_rounds: positive(&read, "MAX_FILL_ROUNDS", 3)?,
            cache_ttl: Duration::from_secs(parse_or(&read, "CACHE_TTL_SECS", 300)?),
            request_timeout: Duration::from_secs(positive(&read, "REQUEST_TIMEOUT_SECS", 20)?),
            max_retries: parse_or(&read, "MAX_RETRIES", 2)?,
            refresh_max_pages: positive(&read, "REFRESH_MAX_PAGES", 20)?,
            refresh_concurrency: positive(&read, "REFRESH_CONCURRENCY", 4)?,
            refresh_interval: Duration::from_secs(positive(&read, "REFRESH_INTERVAL_SECS", 600)?),
            log_level: read("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };
        Ok(config)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.api_base_url.clone(),
            api_key: self.api_key.clone(),
            timeout: self.request_timeout,
            max_retries: self.max_retries,
        }
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            page_size: self.feed_page_size,
            upstream_page_size: self.upstream_page_size,
            max_fill_rounds: self.max_fill_rounds,
        }
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            upstream_page_size: self.upstream_page_size,
            max_pages: self.refresh_max_pages,
            concurrency: self.refresh_concurrency,
        }
    }
}

fn parse_or<T, R>(read: &R, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    R: Fn(&str) -> Option<String>,
{
    match read(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::Invalid(format!("{ENV_PREFIX}{name} has unparseable value `{raw}`"))
        }),
    }
}

fn positive<T, R>(read: &R, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    R: Fn(&str) -> Option<String>,
{
    let value = parse_or(read, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid(format!("{ENV_PREFIX}{name} must be positive")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (format!("{ENV_PREFIX}{key}"), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).expect("defaults should load");

        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.feed_page_size, 24);
        assert_eq!(config.upstream_page_size, 50);
        assert_eq!(config.max_fill_rounds, 3);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.request_timeout, Duration::from_secs(20));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.refresh_max_pages, 20);
        assert_eq!(config.refresh_concurrency, 4);
        assert_eq!(config.refresh_interval, Duration::from_secs(600));
        assert_eq!(config.log_level, "info");
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn overrides_are_read_with_prefix() {
        let config = config_from(&[
            ("API_BASE_URL", "http://127.0.0.1:9000/v3/"),
            ("API_KEY", "secret"),
            ("FEED_PAGE_SIZE", "10"),
            ("MAX_RETRIES", "0"),
            ("LOG_LEVEL", " debug "),
        ])
        .expect("overrides should load");

        assert_eq!(config.api_base_url, "http://127.0.0.1:9000/v3");
        assert_eq!(config.client_settings().api_key, "secret");
        assert_eq!(config.aggregator_settings().page_size, 10);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let unparseable = config_from(&[("CACHE_TTL_SECS", "soon")]);
        let zero = config_from(&[("FEED_PAGE_SIZE", "0")]);
        let too_large = config_from(&[("UPSTREAM_PAGE_SIZE", "51")]);

        assert!(matches!(unparseable, Err(ConfigError::Invalid(_))));
        assert!(matches!(zero, Err(ConfigError::Invalid(_))));
        assert!(matches!(too_large, Err(ConfigError::Invalid(_))));
    }
}
