//! Client configuration.
//!
//! Configuration is resolved once into an immutable [`ClientConfig`] and
//! passed to whatever needs it. The only value read per call is the
//! process-wide poll-duration override ([`max_poll_duration`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::poll::{DEFAULT_MAX_POLL_DURATION, DEFAULT_POLL_INTERVAL, PollOptions};

pub const API_KEY_ENV: &str = "JULES_API_KEY";
pub const BASE_URL_ENV: &str = "JULES_API_BASE_URL";
pub const POLL_INTERVAL_ENV: &str = "JULES_POLL_INTERVAL";
pub const API_TIMEOUT_ENV: &str = "JULES_API_TIMEOUT";
pub const REQUEST_TIMEOUT_ENV: &str = "JULES_REQUEST_TIMEOUT_MS";
pub const MAX_POLL_DURATION_ENV: &str = "JULES_MAX_POLL_DURATION";

pub const DEFAULT_BASE_URL: &str = "https://jules.googleapis.com";
pub const API_VERSION: &str = "v1alpha";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Contents of `~/.jules/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl ConfigFile {
    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".jules").join("config.json"))
    }

    /// Load a config file. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Immutable client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    /// Versioned API root, always ending in `/v1alpha`.
    pub base_url: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_poll_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: normalize_base_url(DEFAULT_BASE_URL),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_poll_duration: DEFAULT_MAX_POLL_DURATION,
        }
    }
}

impl ClientConfig {
    /// Resolve from the process environment and `~/.jules/config.json`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::resolve(|name| std::env::var(name).ok(), ConfigFile::default_path().as_deref())
    }

    /// Resolve from a variable lookup and an optional config file.
    ///
    /// Unparsable numbers are ignored. A broken config file is logged and
    /// skipped.
    pub fn resolve<L>(lookup: L, config_file: Option<&Path>) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let millis = |name: &str| non_empty(name).and_then(|v| parse_millis(&v));

        let api_key = non_empty(API_KEY_ENV).or_else(|| {
            let path = config_file?;
            match ConfigFile::load(path) {
                Ok(file) => file.and_then(|f| f.api_key),
                Err(e) => {
                    warn!(error = %e, "Ignoring config file");
                    None
                }
            }
        });

        let defaults = Self::default();
        Self {
            api_key,
            base_url: non_empty(BASE_URL_ENV)
                .map_or(defaults.base_url, |url| normalize_base_url(&url)),
            poll_interval: millis(POLL_INTERVAL_ENV).unwrap_or(defaults.poll_interval),
            request_timeout: millis(API_TIMEOUT_ENV)
                .or_else(|| millis(REQUEST_TIMEOUT_ENV))
                .unwrap_or(defaults.request_timeout),
            max_poll_duration: defaults.max_poll_duration,
        }
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the API root; normalized to the versioned path.
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = normalize_base_url(base_url);
        self
    }

    /// Poll options for a wait, honoring explicit values, then the
    /// `JULES_MAX_POLL_DURATION` override, then `fallback`.
    #[must_use]
    pub fn poll_options(
        &self,
        interval: Option<Duration>,
        max_duration: Option<Duration>,
        fallback: Duration,
    ) -> PollOptions {
        PollOptions::new(
            interval.unwrap_or(self.poll_interval),
            max_poll_duration(max_duration, fallback),
        )
    }
}

/// Strip trailing slashes and make sure the URL ends in the API version.
#[must_use]
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.ends_with(&format!("/{API_VERSION}")) {
        trimmed.to_string()
    } else {
        format!("{trimmed}/{API_VERSION}")
    }
}

fn parse_millis(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_millis)
}

/// Maximum poll duration for one call.
///
/// Reads `JULES_MAX_POLL_DURATION` on every call.
#[must_use]
pub fn max_poll_duration(explicit: Option<Duration>, fallback: Duration) -> Duration {
    resolve_max_duration_with(
        explicit,
        std::env::var(MAX_POLL_DURATION_ENV).ok().as_deref(),
        fallback,
    )
}

/// Pure form of [`max_poll_duration`].
#[must_use]
pub fn resolve_max_duration_with(
    explicit: Option<Duration>,
    env_value: Option<&str>,
    fallback: Duration,
) -> Duration {
    explicit
        .or_else(|| env_value.and_then(parse_millis))
        .unwrap_or(fallback)
}
