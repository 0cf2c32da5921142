//! Configuration types for house-photo-dl
//!
//! Settings come from an `app.env` file in the working directory, overlaid by
//! process environment variables (the environment wins).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Name of the env-style configuration file read by [`Config::load`]
pub const CONFIG_FILE_NAME: &str = "app.env";

/// Remote house service settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the paginated house listing endpoint
    pub house_service_url: String,

    /// Number of pages to fetch, starting at page 1
    pub num_pages: u32,

    /// Number of houses requested per page
    pub num_per_page: u32,

    /// Per-request HTTP timeout (default: 10 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            house_service_url: String::new(),
            num_pages: 10,
            num_per_page: 10,
            request_timeout: default_request_timeout(),
        }
    }
}

/// Download behavior configuration (output location, concurrency, failure handling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory photos are written to (default: ".")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum page fetches in flight at once (default: 8)
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Maximum photo downloads in flight at once (default: 16)
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Stop launching new fetches and downloads after the first failure (default: false)
    ///
    /// Tasks already running are never interrupted.
    #[serde(default)]
    pub cancel_on_failure: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            cancel_on_failure: false,
        }
    }
}

/// Retry policy for one kind of remote call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt (1.0 = fixed delay)
    pub backoff_multiplier: f64,

    /// Add random jitter to delays
    pub jitter: bool,
}

impl RetryConfig {
    /// Page fetches: 10 attempts, fixed 500ms between them
    pub fn page_default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Photo downloads: a single attempt
    pub fn photo_default() -> Self {
        Self {
            max_attempts: 1,
            ..Self::page_default()
        }
    }

    /// Same policy with a fixed delay between attempts
    pub fn with_fixed_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = delay;
        self.backoff_multiplier = 1.0;
        self
    }
}

/// Named retry policies, one per remote operation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicies {
    /// Policy for page fetches
    #[serde(default = "RetryConfig::page_default")]
    pub page: RetryConfig,

    /// Policy for photo downloads
    #[serde(default = "RetryConfig::photo_default")]
    pub photo: RetryConfig,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            page: RetryConfig::page_default(),
            photo: RetryConfig::photo_default(),
        }
    }
}

/// Main configuration for house-photo-dl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote service settings
    pub service: ServiceConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policies
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Config {
    /// Load configuration from `dir/app.env` and the process environment
    ///
    /// A missing file is not an error; every required key may come from the
    /// environment instead.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        let mut file_vars = HashMap::new();

        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|e| Error::Config {
                        message: format!("error reading {}: {}", path.display(), e),
                        key: None,
                    })?;
                    file_vars.insert(key, value);
                }
                tracing::debug!(path = %path.display(), keys = file_vars.len(), "Loaded configuration file");
            }
            Err(e) if e.not_found() => {
                tracing::debug!(path = %path.display(), "No configuration file, using environment only");
            }
            Err(e) => {
                return Err(Error::Config {
                    message: format!("error reading {}: {}", path.display(), e),
                    key: None,
                });
            }
        }

        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Build and validate a configuration from a key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config {
            service: ServiceConfig {
                house_service_url: lookup("HOUSE_SERVICE_URL")
                    .ok_or_else(|| Error::config("HOUSE_SERVICE_URL", "missing required value"))?,
                num_pages: require(&lookup, "NUM_PAGES")?,
                num_per_page: require(&lookup, "NUM_PER_PAGE")?,
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(secs) = optional::<u64, _>(&lookup, "REQUEST_TIMEOUT_SECS")? {
            config.service.request_timeout = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            config.download.output_dir = PathBuf::from(dir);
        }
        if let Some(n) = optional(&lookup, "MAX_CONCURRENT_FETCHES")? {
            config.download.max_concurrent_fetches = n;
        }
        if let Some(n) = optional(&lookup, "MAX_CONCURRENT_DOWNLOADS")? {
            config.download.max_concurrent_downloads = n;
        }
        if let Some(raw) = lookup("CANCEL_ON_FAILURE") {
            config.download.cancel_on_failure = parse_bool("CANCEL_ON_FAILURE", &raw)?;
        }
        if let Some(n) = optional(&lookup, "PAGE_RETRY_MAX_ATTEMPTS")? {
            config.retry.page.max_attempts = n;
        }
        if let Some(ms) = optional(&lookup, "PAGE_RETRY_DELAY_MS")? {
            config.retry.page = config
                .retry
                .page
                .with_fixed_delay(Duration::from_millis(ms));
        }
        if let Some(n) = optional(&lookup, "PHOTO_RETRY_MAX_ATTEMPTS")? {
            config.retry.photo.max_attempts = n;
        }
        if let Some(ms) = optional(&lookup, "PHOTO_RETRY_DELAY_MS")? {
            config.retry.photo = config
                .retry
                .photo
                .with_fixed_delay(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration can drive a run
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = url::Url::parse(&self.service.house_service_url) {
            return Err(Error::config(
                "HOUSE_SERVICE_URL",
                format!("invalid URL '{}': {}", self.service.house_service_url, e),
            ));
        }
        if self.service.num_per_page == 0 {
            return Err(Error::config("NUM_PER_PAGE", "must be greater than zero"));
        }
        if self.download.max_concurrent_fetches == 0 {
            return Err(Error::config(
                "MAX_CONCURRENT_FETCHES",
                "must be greater than zero",
            ));
        }
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::config(
                "MAX_CONCURRENT_DOWNLOADS",
                "must be greater than zero",
            ));
        }
        for (key, value) in [
            ("MAX_CONCURRENT_FETCHES", self.download.max_concurrent_fetches),
            ("MAX_CONCURRENT_DOWNLOADS", self.download.max_concurrent_downloads),
        ] {
            if value > Semaphore::MAX_PERMITS {
                return Err(Error::config(
                    key,
                    format!("must not exceed {}", Semaphore::MAX_PERMITS),
                ));
            }
        }
        if self.retry.page.max_attempts == 0 {
            return Err(Error::config("PAGE_RETRY_MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.retry.photo.max_attempts == 0 {
            return Err(Error::config("PHOTO_RETRY_MAX_ATTEMPTS", "must be at least 1"));
        }
        Ok(())
    }
}

fn require<T, L>(lookup: &L, key: &str) -> Result<T>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(lookup, key)?.ok_or_else(|| Error::config(key, "missing required value"))
}

fn optional<T, L>(lookup: &L, key: &str) -> Result<Option<T>>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(key, format!("invalid value '{}': {}", raw, e))),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(key, format!("invalid boolean '{}'", raw))),
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_max_concurrent_downloads() -> usize {
    16
}

// Duration as whole seconds
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

// Duration as milliseconds
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
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("HOUSE_SERVICE_URL", "http://app-homevision-staging.herokuapp.com/api_project/houses"),
            ("NUM_PAGES", "10"),
            ("NUM_PER_PAGE", "10"),
        ]
    }

    #[test]
    fn required_keys_with_defaults() {
        let config = Config::from_lookup(lookup_from(&required())).unwrap();

        assert_eq!(config.service.num_pages, 10);
        assert_eq!(config.service.num_per_page, 10);
        assert_eq!(config.service.request_timeout, Duration::from_secs(10));
        assert_eq!(config.download.output_dir, PathBuf::from("."));
        assert!(!config.download.cancel_on_failure);
        assert_eq!(config.retry.page.max_attempts, 10);
        assert_eq!(config.retry.page.initial_delay, Duration::from_millis(500));
        assert_eq!(config.retry.photo.max_attempts, 1);
    }

    #[test]
    fn missing_required_key_names_it() {
        let pairs: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "NUM_PAGES")
            .collect();

        match Config::from_lookup(lookup_from(&pairs)).unwrap_err() {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("NUM_PAGES")),
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let mut pairs = required();
        pairs.push(("MAX_CONCURRENT_DOWNLOADS", "lots"));

        match Config::from_lookup(lookup_from(&pairs)).unwrap_err() {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("MAX_CONCURRENT_DOWNLOADS"));
                assert!(message.contains("lots"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn optional_overrides_apply() {
        let mut pairs = required();
        pairs.extend([
            ("OUTPUT_DIR", "/tmp/photos"),
            ("MAX_CONCURRENT_FETCHES", "2"),
            ("MAX_CONCURRENT_DOWNLOADS", "4"),
            ("CANCEL_ON_FAILURE", "true"),
            ("REQUEST_TIMEOUT_SECS", "3"),
            ("PAGE_RETRY_MAX_ATTEMPTS", "5"),
            ("PAGE_RETRY_DELAY_MS", "20"),
            ("PHOTO_RETRY_MAX_ATTEMPTS", "3"),
        ]);

        let config = Config::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.download.output_dir, PathBuf::from("/tmp/photos"));
        assert_eq!(config.download.max_concurrent_fetches, 2);
        assert_eq!(config.download.max_concurrent_downloads, 4);
        assert!(config.download.cancel_on_failure);
        assert_eq!(config.service.request_timeout, Duration::from_secs(3));
        assert_eq!(config.retry.page.max_attempts, 5);
        assert_eq!(config.retry.page.initial_delay, Duration::from_millis(20));
        assert_eq!(config.retry.page.max_delay, Duration::from_millis(20));
        assert_eq!(config.retry.photo.max_attempts, 3);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let config = Config {
            service: ServiceConfig {
                house_service_url: "not a url".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "HOUSE_SERVICE_URL"
        ));

        let config = Config {
            service: ServiceConfig {
                house_service_url: "http://localhost/houses".to_string(),
                num_per_page: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config { key: Some(k), .. }) if k == "NUM_PER_PAGE"
        ));

        let mut config = Config {
            service: ServiceConfig {
                house_service_url: "http://localhost/houses".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        config.retry.page.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn concurrency_above_semaphore_limit_is_rejected() {
        let mut pairs = required();
        pairs.push(("MAX_CONCURRENT_DOWNLOADS", "18446744073709551615"));

        match Config::from_lookup(lookup_from(&pairs)) {
            Err(Error::Config { key, .. }) => {
                assert_eq!(key.as_deref(), Some("MAX_CONCURRENT_DOWNLOADS"))
            }
            other => panic!("expected config error, got {other:?}"),
        }

        let mut config = Config::from_lookup(lookup_from(&required())).unwrap();
        config.download.max_concurrent_fetches = Semaphore::MAX_PERMITS;
        assert!(config.validate().is_ok());
        config.download.max_concurrent_fetches = Semaphore::MAX_PERMITS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_boolean_is_rejected() {
        assert!(parse_bool("CANCEL_ON_FAILURE", "maybe").is_err());
        assert!(parse_bool("CANCEL_ON_FAILURE", " Off ").is_ok_and(|b| !b));
    }

    #[test]
    fn load_reads_app_env_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "HOUSE_SERVICE_URL=http://localhost:9/houses\nNUM_PAGES=3\nNUM_PER_PAGE=7\nCANCEL_ON_FAILURE=yes\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.service.house_service_url, "http://localhost:9/houses");
        assert_eq!(config.service.num_pages, 3);
        assert_eq!(config.service.num_per_page, 7);
        assert!(config.download.cancel_on_failure);
    }

    #[test]
    fn load_without_app_env_falls_back_to_environment() {
        if std::env::var("HOUSE_SERVICE_URL").is_ok() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        match Config::load(dir.path()) {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("HOUSE_SERVICE_URL")),
            other => panic!("expected missing key error, got {other:?}"),
        }
    }

    #[test]
    fn retry_policies_serialize_delays_in_millis() {
        let json = serde_json::to_value(RetryPolicies::default()).unwrap();
        assert_eq!(json["page"]["initial_delay"], 500);
        assert_eq!(json["photo"]["max_attempts"], 1);

        let back: RetryPolicies = serde_json::from_value(json).unwrap();
        assert_eq!(back.page.max_delay, Duration::from_millis(500));
    }
}
