//! Configuration management for the sync runtime.

use fitsync_engine::Backoff;
use std::env;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// SQLite URL for local persistence
    pub database_url: String,
    /// Interval between retry queue ticks
    pub retry_interval: Duration,
    /// Attempts after which a queued write is reported as stalled
    pub retry_ceiling: u32,
    /// First follow-up delay after a failed pass
    pub backoff_base_ms: u64,
    /// Longest follow-up delay
    pub backoff_max_ms: u64,
    /// `host:port` to probe for connectivity, if the host has no network API
    pub probe_addr: Option<String>,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            retry_interval: Duration::from_millis(1_000),
            retry_ceiling: 20,
            backoff_base_ms: 2_000,
            backoff_max_ms: 300_000,
            probe_addr: None,
            probe_interval: Duration::from_millis(5_000),
            probe_timeout: Duration::from_millis(2_000),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables (and a `.env` file).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup. Missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_url = lookup("FITSYNC_DATABASE_URL").unwrap_or(defaults.database_url);

        let retry_interval = Duration::from_millis(parse_or(
            &lookup,
            "FITSYNC_RETRY_INTERVAL_MS",
            defaults.retry_interval.as_millis() as u64,
        )?);
        let retry_ceiling = parse_or(&lookup, "FITSYNC_RETRY_CEILING", defaults.retry_ceiling)?;
        let backoff_base_ms = parse_or(&lookup, "FITSYNC_BACKOFF_BASE_MS", defaults.backoff_base_ms)?;
        let backoff_max_ms = parse_or(&lookup, "FITSYNC_BACKOFF_MAX_MS", defaults.backoff_max_ms)?;

        let probe_addr = lookup("FITSYNC_PROBE_ADDR").filter(|addr| !addr.is_empty());
        let probe_interval = Duration::from_millis(parse_or(
            &lookup,
            "FITSYNC_PROBE_INTERVAL_MS",
            defaults.probe_interval.as_millis() as u64,
        )?);
        let probe_timeout = Duration::from_millis(parse_or(
            &lookup,
            "FITSYNC_PROBE_TIMEOUT_MS",
            defaults.probe_timeout.as_millis() as u64,
        )?);

        if retry_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "FITSYNC_RETRY_INTERVAL_MS",
                value: "0".into(),
            });
        }
        if backoff_max_ms < backoff_base_ms {
            return Err(ConfigError::Invalid {
                key: "FITSYNC_BACKOFF_MAX_MS",
                value: backoff_max_ms.to_string(),
            });
        }

        Ok(Self {
            database_url,
            retry_interval,
            retry_ceiling,
            backoff_base_ms,
            backoff_max_ms,
            probe_addr,
            probe_interval,
            probe_timeout,
        })
    }

    /// Backoff schedule for follow-up passes.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base_ms, self.backoff_max_ms)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.backoff(), Backoff::new(2_000, 300_000));
    }

    #[test]
    fn overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("FITSYNC_DATABASE_URL", "sqlite://fitsync.db"),
            ("FITSYNC_RETRY_INTERVAL_MS", "250"),
            ("FITSYNC_RETRY_CEILING", "5"),
            ("FITSYNC_PROBE_ADDR", "example.com:443"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite://fitsync.db");
        assert_eq!(config.retry_interval, Duration::from_millis(250));
        assert_eq!(config.retry_ceiling, 5);
        assert_eq!(config.probe_addr.as_deref(), Some("example.com:443"));
    }

    #[test]
    fn invalid_number() {
        let err = SyncConfig::from_lookup(lookup(&[("FITSYNC_RETRY_CEILING", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "FITSYNC_RETRY_CEILING",
                value: "lots".into()
            }
        );
    }

    #[test]
    fn inverted_backoff_rejected() {
        let err = SyncConfig::from_lookup(lookup(&[
            ("FITSYNC_BACKOFF_BASE_MS", "5000"),
            ("FITSYNC_BACKOFF_MAX_MS", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FITSYNC_BACKOFF_MAX_MS", .. }));
    }
}
