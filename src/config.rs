//! Forecast configuration
//!
//! Settings arrive the way an application stores them: the API key, the cache
//! lifetime as a string-encoded number of minutes and a language tag.
//! [`ForecastSettings`] mirrors that raw shape and [`ForecastConfig`] is the
//! validated form the fetch gate works with.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Base URL of the forecast provider
pub const DEFAULT_BASE_URL: &str = "https://api.darksky.net/forecast";

/// Cache lifetime in minutes used when settings do not specify one
pub const DEFAULT_CACHE_MINUTES: u32 = 30;

/// Language tag used when the environment does not provide one
pub const DEFAULT_LANGUAGE: &str = "en";

/// Errors raised while validating settings
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No API key was configured
    #[error("Missing forecast API key")]
    MissingApiKey,

    /// The cache lifetime is not a non-negative whole number of minutes
    #[error("Invalid cache lifetime in minutes: {0:?}")]
    InvalidCacheTtl(String),
}

/// Raw settings as persisted by the application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSettings {
    /// Provider API key
    #[serde(default)]
    pub api_key: String,

    /// Cache lifetime in minutes, string-encoded
    #[serde(default = "default_cache_minutes")]
    pub cache_minutes: String,

    /// Language tag for summaries; taken from the environment when absent
    #[serde(default)]
    pub language: Option<String>,

    /// Provider base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_cache_minutes() -> String {
    DEFAULT_CACHE_MINUTES.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            cache_minutes: default_cache_minutes(),
            language: None,
            base_url: default_base_url(),
        }
    }
}

/// Validated configuration for the fetch gate
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub api_key: String,
    /// How long a cached payload may answer requests
    pub cache_ttl: Duration,
    pub language: String,
    pub base_url: String,
}

impl ForecastConfig {
    /// Creates a configuration with the default lifetime and the environment's language
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            cache_ttl: Duration::minutes(i64::from(DEFAULT_CACHE_MINUTES)),
            language: language_from_env(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Validates settings collected from the application's preference store
    pub fn from_settings(settings: &ForecastSettings) -> Result<Self, ConfigError> {
        let api_key = settings.api_key.trim();
        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(Self {
            api_key: api_key.to_string(),
            cache_ttl: parse_cache_minutes(&settings.cache_minutes)?,
            language: settings
                .language
                .as_deref()
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .unwrap_or_else(language_from_env),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.cache_ttl = cache_ttl;
        self
    }
}

/// Parses a string-encoded number of minutes
pub fn parse_cache_minutes(value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u32>()
        .map(|minutes| Duration::minutes(i64::from(minutes)))
        .map_err(|_| ConfigError::InvalidCacheTtl(value.to_string()))
}

/// Derives a language tag from `LC_ALL`, `LC_MESSAGES` or `LANG`
pub fn language_from_env() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find_map(|locale| language_from_locale(&locale))
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

/// Extracts the language part of a POSIX locale such as `de_DE.UTF-8`
pub fn language_from_locale(locale: &str) -> Option<String> {
    let language = locale
        .split(['_', '.', '@', '-'])
        .next()
        .unwrap_or_default()
        .trim();

    if language.is_empty() || language == "C" || language == "POSIX" {
        return None;
    }
    Some(language.to_ascii_lowercase())
}
