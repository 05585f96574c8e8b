//! Configuration types for gyazo-drain

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Remote API settings (endpoint, credential, paging, timeouts)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the image API (default: "https://api.gyazo.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Pre-obtained bearer token
    ///
    /// Never serialized back out, so a dumped config cannot leak it.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,

    /// Items requested per catalog page (default: 100, the API maximum)
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Timeout for a single catalog call (list or delete) (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            access_token: None,
            per_page: default_per_page(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("per_page", &self.per_page)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Download behavior configuration (output directory, concurrency, timeouts)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory, created if absent (default: "./images")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Items of one page processed concurrently (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Timeout for establishing a blob connection (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Maximum wait for the next chunk of a blob body (default: 60 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Minimum interval between progress events (default: 500 ms)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub progress_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            progress_interval: default_progress_interval(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Completion log location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./gyazo-drain.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`Migrator`](crate::Migrator)
///
/// Fields are organized into sub-configs:
/// - [`api`](ApiConfig): endpoint, credential, paging
/// - [`download`](DownloadConfig): output directory, concurrency, timeouts
/// - [`retry`](RetryConfig): backoff for transient failures
/// - [`persistence`](PersistenceConfig): completion log
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry behavior for catalog calls and blob downloads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Completion log settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Output directory
    pub fn output_dir(&self) -> &PathBuf {
        &self.download.output_dir
    }

    /// The bearer token, or a fatal configuration error if it is missing
    pub fn access_token(&self) -> Result<&str> {
        match self.api.access_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::config(
                "access_token",
                "access token is required (set GYAZO_ACCESS_TOKEN)",
            )),
        }
    }

    /// Check the configuration for values that would make a run impossible
    ///
    /// Does not touch the filesystem; directory writability is checked when
    /// the [`Migrator`](crate::Migrator) is built.
    pub fn validate(&self) -> Result<()> {
        self.access_token()?;

        url::Url::parse(&self.api.base_url).map_err(|e| {
            Error::config("base_url", format!("invalid base URL '{}': {}", self.api.base_url, e))
        })?;

        if self.api.per_page == 0 || self.api.per_page > MAX_PER_PAGE {
            return Err(Error::config(
                "per_page",
                format!("per_page must be between 1 and {}", MAX_PER_PAGE),
            ));
        }

        if self.download.concurrency == 0 {
            return Err(Error::config("concurrency", "concurrency must be at least 1"));
        }

        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.retry.backoff_multiplier) {
            return Err(Error::config(
                "backoff_multiplier",
                format!(
                    "backoff multiplier must be between 1.0 and {}",
                    MAX_BACKOFF_MULTIPLIER
                ),
            ));
        }

        for (key, delay) in [
            ("initial_delay", self.retry.initial_delay),
            ("max_delay", self.retry.max_delay),
        ] {
            if delay > MAX_RETRY_DELAY {
                return Err(Error::config(
                    key,
                    format!("{} must not exceed {:?}", key, MAX_RETRY_DELAY),
                ));
            }
        }

        if self.download.progress_interval.is_zero() {
            return Err(Error::config(
                "progress_interval",
                "progress interval must be greater than zero",
            ));
        }

        if self.download.output_dir.as_os_str().is_empty() {
            return Err(Error::config("output_dir", "output directory must not be empty"));
        }

        Ok(())
    }
}

/// Largest page size accepted by the API
pub const MAX_PER_PAGE: u32 = 100;

/// Largest accepted backoff multiplier
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Largest accepted retry delay (initial or maximum)
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

fn default_base_url() -> String {
    "https://api.gyazo.com".into()
}

fn default_per_page() -> u32 {
    MAX_PER_PAGE
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_concurrency() -> usize {
    4
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./gyazo-drain.db")
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper (sub-second intervals)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.api.access_token = Some("token".into());
        config
    }

    #[test]
    fn defaults_are_valid_once_a_token_is_set() {
        let config = valid_config();
        config.validate().unwrap();
        assert_eq!(config.api.per_page, 100);
        assert_eq!(config.download.concurrency, 4);
        assert_eq!(config.download.progress_interval, Duration::from_millis(500));
        assert_eq!(config.output_dir(), &PathBuf::from("./images"));
    }

    #[test]
    fn missing_or_blank_token_is_a_config_error() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(ref k), .. }) if k == "access_token"
        ));

        config.api.access_token = Some("   ".into());
        assert!(matches!(config.access_token(), Err(Error::Config { .. })));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = valid_config();
        config.download.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.per_page = 101;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    fn rejected_key(config: &Config) -> Option<String> {
        match config.validate() {
            Err(Error::Config { key, .. }) => key,
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_values_that_break_timers_and_backoff() {
        let mut config = valid_config();
        config.download.progress_interval = Duration::ZERO;
        assert_eq!(rejected_key(&config).as_deref(), Some("progress_interval"));

        for multiplier in [f64::NAN, f64::INFINITY, 0.5, 1e12] {
            let mut config = valid_config();
            config.retry.backoff_multiplier = multiplier;
            assert_eq!(
                rejected_key(&config).as_deref(),
                Some("backoff_multiplier"),
                "multiplier {multiplier} should be rejected"
            );
        }

        let mut config = valid_config();
        config.retry.initial_delay = Duration::from_secs(u64::MAX / 2);
        assert_eq!(rejected_key(&config).as_deref(), Some("initial_delay"));

        let mut config = valid_config();
        config.retry.max_delay = Duration::MAX;
        assert_eq!(rejected_key(&config).as_deref(), Some("max_delay"));

        let mut config = valid_config();
        config.retry.backoff_multiplier = MAX_BACKOFF_MULTIPLIER;
        config.retry.initial_delay = MAX_RETRY_DELAY;
        config.retry.max_delay = MAX_RETRY_DELAY;
        config.validate().unwrap();
    }

    #[test]
    fn token_is_never_serialized_or_debug_printed() {
        let mut config = valid_config();
        config.api.access_token = Some("super-secret".into());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let json = r#"{
            "api": { "access_token": "abc", "per_page": 50 },
            "download": { "concurrency": 8, "progress_interval": 250 },
            "retry": { "max_attempts": 2 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.access_token().unwrap(), "abc");
        assert_eq!(config.api.per_page, 50);
        assert_eq!(config.api.base_url, "https://api.gyazo.com");
        assert_eq!(config.download.concurrency, 8);
        assert_eq!(config.download.progress_interval, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(
            config.persistence.database_path,
            PathBuf::from("./gyazo-drain.db")
        );
    }
}
