//! Configuration for the Loki client.
//!
//! A [`Config`] can be built from a push URL with defaults via [`Config::new`],
//! or loaded from environment variables via [`Config::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::backoff::BackoffConfig;
use crate::model::LabelSet;

/// Default push endpoint of a local Loki instance
const DEFAULT_URL: &str = "http://localhost:3100/loki/api/v1/push";

/// Default maximum time a batch waits before being sent
const DEFAULT_BATCH_WAIT: Duration = Duration::from_secs(1);

/// Default maximum batch size in line bytes (1 MiB)
const DEFAULT_BATCH_SIZE: usize = 1024 * 1024;

/// Default HTTP request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credentials attached to every push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
}

/// Configuration for a [`Client`](crate::client::Client).
///
/// Environment variables read by [`Config::from_env`]:
/// - `LOKI_URL`: push endpoint (default: http://localhost:3100/loki/api/v1/push)
/// - `LOKI_BATCH_WAIT_MS`: max batch age in milliseconds (default: 1000)
/// - `LOKI_BATCH_SIZE_BYTES`: max batch size in line bytes (default: 1048576)
/// - `LOKI_TIMEOUT_SECS`: per-request timeout (default: 10)
/// - `LOKI_TENANT_ID`: static tenant sent as `X-Scope-OrgID`
/// - `LOKI_EXTERNAL_LABELS`: labels added to every line, as `name=value,name=value`
/// - `LOKI_MIN_BACKOFF_MS`, `LOKI_MAX_BACKOFF_MS`, `LOKI_MAX_RETRIES`: retry policy
/// - `LOKI_BEARER_TOKEN` or `LOKI_BASIC_AUTH_USERNAME`/`LOKI_BASIC_AUTH_PASSWORD`
/// - `LOKI_TLS_INSECURE_SKIP_VERIFY`: accept invalid certificates (default: false)
#[derive(Debug, Clone)]
pub struct Config {
    /// Push endpoint URL
    pub url: Url,

    /// Maximum time a batch is held before it is sent
    pub batch_wait: Duration,

    /// Maximum batch size in line bytes
    pub batch_size: usize,

    /// Timeout for a single HTTP request
    pub timeout: Duration,

    /// Retry policy for failed pushes
    pub backoff: BackoffConfig,

    /// Tenant used when a line does not carry the reserved tenant label
    pub tenant_id: Option<String>,

    /// Labels merged under the labels of every line
    pub external_labels: LabelSet,

    pub auth: Option<Auth>,

    /// Accept invalid TLS certificates
    pub insecure_skip_verify: bool,
}

/// Error type for configuration loading failures
#[derive(Debug, Error)]
#[error("Configuration error{}: {message}", var_suffix(.env_var))]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: None,
        }
    }

    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

fn var_suffix(env_var: &Option<String>) -> String {
    env_var
        .as_ref()
        .map(|var| format!(" for {}", var))
        .unwrap_or_default()
}

impl Config {
    /// Create a configuration for the given push URL with default settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL cannot be parsed or is not http(s).
    pub fn new(url: &str) -> Result<Self, ConfigError> {
        let config = Self {
            url: parse_url(url).map_err(ConfigError::new)?,
            batch_wait: DEFAULT_BATCH_WAIT,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_TIMEOUT,
            backoff: BackoffConfig::default(),
            tenant_id: None,
            external_labels: LabelSet::new(),
            auth: None,
            insecure_skip_verify: false,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to the defaults of [`Config::new`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use loki_client::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Pushing to {}", config.url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env::var("LOKI_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let url = parse_url(&url).map_err(|e| ConfigError::for_var("LOKI_URL", e))?;

        let batch_wait = parse_var::<u64>("LOKI_BATCH_WAIT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BATCH_WAIT);
        let batch_size = parse_var::<usize>("LOKI_BATCH_SIZE_BYTES")?.unwrap_or(DEFAULT_BATCH_SIZE);
        let timeout = parse_var::<u64>("LOKI_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            min_period: parse_var::<u64>("LOKI_MIN_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_period),
            max_period: parse_var::<u64>("LOKI_MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_period),
            max_retries: parse_var::<u32>("LOKI_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
        };

        let tenant_id = env::var("LOKI_TENANT_ID").ok().filter(|t| !t.is_empty());

        let external_labels = match env::var("LOKI_EXTERNAL_LABELS") {
            Ok(value) => parse_labels(&value)
                .map_err(|e| ConfigError::for_var("LOKI_EXTERNAL_LABELS", e))?,
            Err(_) => LabelSet::new(),
        };

        let config = Self {
            url,
            batch_wait,
            batch_size,
            timeout,
            backoff,
            tenant_id,
            external_labels,
            auth: Self::parse_auth()?,
            insecure_skip_verify: parse_var::<bool>("LOKI_TLS_INSECURE_SKIP_VERIFY")?.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Read the auth settings; at most one scheme may be configured.
    fn parse_auth() -> Result<Option<Auth>, ConfigError> {
        let bearer = env::var("LOKI_BEARER_TOKEN").ok();
        let username = env::var("LOKI_BASIC_AUTH_USERNAME").ok();

        match (bearer, username) {
            (Some(_), Some(_)) => Err(ConfigError::new(
                "at most one of basic auth and bearer token may be configured",
            )),
            (Some(token), None) => Ok(Some(Auth::Bearer(token))),
            (None, Some(username)) => Ok(Some(Auth::Basic {
                username,
                password: env::var("LOKI_BASIC_AUTH_PASSWORD").unwrap_or_default(),
            })),
            (None, None) => Ok(None),
        }
    }

    /// Check the settings for values the client cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(ConfigError::new(format!(
                "unsupported URL scheme '{}'",
                self.url.scheme()
            )));
        }

        if self.batch_size == 0 {
            return Err(ConfigError::new("batch size must be greater than 0"));
        }

        if self.batch_wait.is_zero() {
            return Err(ConfigError::new("batch wait must be greater than 0"));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::new("timeout must be greater than 0"));
        }

        if self.backoff.min_period.is_zero() {
            return Err(ConfigError::new("min backoff must be greater than 0"));
        }

        if self.backoff.min_period > self.backoff.max_period {
            return Err(ConfigError::new(format!(
                "min backoff {:?} exceeds max backoff {:?}",
                self.backoff.min_period, self.backoff.max_period
            )));
        }

        Ok(())
    }
}

fn parse_url(url: &str) -> Result<Url, String> {
    Url::parse(url).map_err(|e| format!("invalid URL '{}': {}", url, e))
}

/// Parse an optional environment variable.
fn parse_var<T: FromStr>(env_var: &str) -> Result<Option<T>, ConfigError> {
    match env::var(env_var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid value", value))),
        Err(_) => Ok(None),
    }
}

/// Parse `name=value,name=value` into a label set.
fn parse_labels(value: &str) -> Result<LabelSet, String> {
    let mut labels = LabelSet::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("'{}' is not a name=value pair", pair))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("'{}' has an empty label name", pair));
        }
        labels.insert(name, value.trim());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide; serialize the tests that touch them
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "LOKI_URL",
        "LOKI_BATCH_WAIT_MS",
        "LOKI_BATCH_SIZE_BYTES",
        "LOKI_TIMEOUT_SECS",
        "LOKI_TENANT_ID",
        "LOKI_EXTERNAL_LABELS",
        "LOKI_MIN_BACKOFF_MS",
        "LOKI_MAX_BACKOFF_MS",
        "LOKI_MAX_RETRIES",
        "LOKI_BEARER_TOKEN",
        "LOKI_BASIC_AUTH_USERNAME",
        "LOKI_BASIC_AUTH_PASSWORD",
        "LOKI_TLS_INSECURE_SKIP_VERIFY",
    ];

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }

        fn remove(key: &str) -> Self {
            let original = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn clean_env() -> Vec<EnvGuard> {
        ALL_VARS.iter().map(|var| EnvGuard::remove(var)).collect()
    }

    #[test]
    fn test_new_uses_defaults() {
        let config = Config::new("http://loki:3100/loki/api/v1/push").unwrap();
        assert_eq!(config.url.host_str(), Some("loki"));
        assert_eq!(config.batch_wait, Duration::from_secs(1));
        assert_eq!(config.batch_size, 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.backoff, BackoffConfig::default());
        assert!(config.tenant_id.is_none());
        assert!(config.external_labels.is_empty());
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        let err = Config::new("not a url").unwrap_err();
        assert!(err.message.contains("invalid URL"));

        let err = Config::new("ftp://loki/push").unwrap_err();
        assert!(err.message.contains("unsupported URL scheme"));
    }

    #[test]
    fn test_validate_limits() {
        let base = Config::new(DEFAULT_URL).unwrap();

        let mut config = base.clone();
        config.batch_size = 0;
        assert!(config.validate().unwrap_err().message.contains("batch size"));

        let mut config = base.clone();
        config.batch_wait = Duration::ZERO;
        assert!(config.validate().unwrap_err().message.contains("batch wait"));

        let mut config = base.clone();
        config.timeout = Duration::ZERO;
        assert!(config.validate().unwrap_err().message.contains("timeout"));

        let mut config = base.clone();
        config.backoff.min_period = Duration::from_secs(10);
        config.backoff.max_period = Duration::from_secs(1);
        assert!(config.validate().unwrap_err().message.contains("exceeds max backoff"));
    }

    #[test]
    fn test_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clean_env();

        let config = Config::from_env().expect("Should load with defaults");
        assert_eq!(config.url.as_str(), DEFAULT_URL);
        assert_eq!(config.batch_wait, DEFAULT_BATCH_WAIT);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert!(!config.insecure_skip_verify);
    }

    #[test]
    fn test_from_env_custom_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clean_env();
        let _g1 = EnvGuard::set("LOKI_URL", "https://logs.example.com/loki/api/v1/push");
        let _g2 = EnvGuard::set("LOKI_BATCH_WAIT_MS", "250");
        let _g3 = EnvGuard::set("LOKI_BATCH_SIZE_BYTES", "4096");
        let _g4 = EnvGuard::set("LOKI_TENANT_ID", "team-a");
        let _g5 = EnvGuard::set("LOKI_EXTERNAL_LABELS", "cluster=eu-1, env = prod");
        let _g6 = EnvGuard::set("LOKI_MAX_RETRIES", "3");
        let _g7 = EnvGuard::set("LOKI_BEARER_TOKEN", "secret");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.url.host_str(), Some("logs.example.com"));
        assert_eq!(config.batch_wait, Duration::from_millis(250));
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.tenant_id.as_deref(), Some("team-a"));
        assert_eq!(config.external_labels.get("cluster"), Some("eu-1"));
        assert_eq!(config.external_labels.get("env"), Some("prod"));
        assert_eq!(config.backoff.max_retries, 3);
        assert_eq!(config.auth, Some(Auth::Bearer("secret".to_string())));
    }

    #[test]
    fn test_from_env_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clean_env();
        let _guard = EnvGuard::set("LOKI_BATCH_SIZE_BYTES", "lots");

        let err = Config::from_env().unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("LOKI_BATCH_SIZE_BYTES"));
        assert!(err.message.contains("not a valid value"));
    }

    #[test]
    fn test_from_env_conflicting_auth() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clean_env();
        let _g1 = EnvGuard::set("LOKI_BEARER_TOKEN", "secret");
        let _g2 = EnvGuard::set("LOKI_BASIC_AUTH_USERNAME", "user");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("at most one"));
    }

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels("a=1,b=2,,").unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("b"), Some("2"));

        assert!(parse_labels("novalue").is_err());
        assert!(parse_labels("=x").is_err());
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::for_var("TEST_VAR", "test error");
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError::new("general error");
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
