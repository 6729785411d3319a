use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ErrorKind;
use crate::pool::{PoolConfig, DEFAULT_MAX_CONNECTIONS};
use crate::retry::{
    PolicyError, RetryPolicy, DEFAULT_FACTOR, DEFAULT_INITIAL_DELAY, DEFAULT_JITTER_FRACTION,
    DEFAULT_MAX_DELAY,
};
use crate::session::{SessionConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_LINE_LENGTH};

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry, in seconds (e.g. 0.5 = 500ms).
    pub initial_delay_secs: f64,
    /// Upper bound on any single delay, in seconds.
    pub max_delay_secs: f64,
    /// Growth factor between consecutive delays.
    pub factor: f64,
    /// Jitter standard deviation as a fraction of the delay.
    pub jitter_fraction: f64,
    /// Error kinds that may be retried, e.g. ["timeout", "connection"].
    #[serde(default)]
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            initial_delay_secs: DEFAULT_INITIAL_DELAY.as_secs_f64(),
            max_delay_secs: DEFAULT_MAX_DELAY.as_secs_f64(),
            factor: DEFAULT_FACTOR,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            retryable: vec![ErrorKind::Timeout, ErrorKind::Connection],
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> Result<RetryPolicy, PolicyError> {
        RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .initial_delay(secs(self.initial_delay_secs))
            .max_delay(secs(self.max_delay_secs))
            .factor(self.factor)
            .jitter_fraction(self.jitter_fraction)
            .retry_on_all(self.retryable.iter().copied())
            .build()
    }
}

/// Negative or non-finite values become zero and are rejected by the builder.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Global configuration loaded from `~/.config/linepool/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinepoolConfig {
    /// Server address, `host:port`.
    pub address: String,
    /// Maximum concurrent connections in the pool.
    pub max_connections: usize,
    /// Seconds without traffic (while requests are outstanding) before a
    /// connection is considered dead and closed.
    pub idle_timeout_secs: u64,
    /// Longest request line accepted, in bytes.
    pub max_line_length: usize,
    /// Optional retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for LinepoolConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:11211".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            retry: None,
        }
    }
}

impl LinepoolConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections,
            session: SessionConfig {
                idle_timeout: Duration::from_secs(self.idle_timeout_secs),
                max_line_length: self.max_line_length,
            },
        }
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, PolicyError> {
        self.retry.clone().unwrap_or_default().to_policy()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("linepool")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<LinepoolConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = LinepoolConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

pub fn load_from_path(path: &Path) -> Result<LinepoolConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: LinepoolConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = LinepoolConfig::default();
        assert_eq!(cfg.address, "127.0.0.1:11211");
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.idle_timeout_secs, 60);
        assert_eq!(cfg.max_line_length, 16384);
        assert!(cfg.retry.is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let mut cfg = LinepoolConfig::default();
        cfg.retry = Some(RetryConfig::default());
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: LinepoolConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn config_toml_retry_section() {
        let toml = r#"
            address = "10.0.0.5:7000"
            max_connections = 2
            idle_timeout_secs = 5
            max_line_length = 512

            [retry]
            max_attempts = 3
            initial_delay_secs = 0.25
            max_delay_secs = 4.0
            factor = 2.0
            jitter_fraction = 0.0
            retryable = ["timeout"]
        "#;
        let cfg: LinepoolConfig = toml::from_str(toml).unwrap();
        let pool = cfg.pool_config();
        assert_eq!(pool.max_connections, 2);
        assert_eq!(pool.session.idle_timeout, Duration::from_secs(5));
        assert_eq!(pool.session.max_line_length, 512);

        let policy = cfg.retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.initial_delay(), Duration::from_millis(250));
        assert_eq!(policy.max_delay(), Duration::from_secs(4));
        assert!(policy.is_retryable(Some(ErrorKind::Timeout)));
        assert!(!policy.is_retryable(Some(ErrorKind::Connection)));
    }

    #[test]
    fn missing_retry_section_uses_defaults() {
        let cfg = LinepoolConfig::default();
        let policy = cfg.retry_policy().unwrap();
        assert_eq!(policy.max_attempts(), 7);
        assert!(policy.is_retryable(Some(ErrorKind::Connection)));
        assert!(!policy.is_retryable(Some(ErrorKind::Response)));
    }

    #[test]
    fn invalid_retry_values_are_rejected() {
        let retry = RetryConfig {
            initial_delay_secs: -1.0,
            ..RetryConfig::default()
        };
        assert_eq!(retry.to_policy().unwrap_err(), PolicyError::ZeroInitialDelay);

        let retry = RetryConfig {
            factor: 0.5,
            ..RetryConfig::default()
        };
        assert!(matches!(retry.to_policy(), Err(PolicyError::Factor(_))));
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "address = \"localhost:9\"\nmax_connections = 1\nidle_timeout_secs = 1\nmax_line_length = 64\n",
        )
        .unwrap();
        let cfg = load_from_path(&path).unwrap();
        assert_eq!(cfg.address, "localhost:9");
        assert_eq!(cfg.max_connections, 1);
    }
}
