//! Configuration for the M3 brokers.

use std::path::PathBuf;
use std::time::Duration;

use crate::{OdinError, Result};

/// Default freshness window for MI CSRF tokens (30 seconds).
pub const DEFAULT_CSRF_MAX_AGE: Duration = Duration::from_secs(30);

/// Default source tag used in the `x-infor-ionapi-source` header.
pub const DEFAULT_SOURCE: &str = "odin";

/// Configuration shared by the form, MI, and ION brokers.
///
/// Use the builder pattern for ergonomic configuration:
///
/// ```
/// use m3_odin::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .with_m3_url("https://m3.example.com")
///     .with_ion_api_url("https://ionapi.example.com")
///     .with_csrf_max_age(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the M3 environment (MNE + MI REST live under it).
    pub m3_url: Option<String>,

    /// Explicit ION API base URL. When unset, the ION broker resolves the
    /// URL through the form service's environment context.
    pub ion_api_url: Option<String>,

    /// Path to the bearer-token artifact file
    /// (JSON `{ authorizationHeader, expirationTimestamp }`).
    pub ion_token_file: Option<PathBuf>,

    /// Path to the cookie artifact file (raw `name=value;` text).
    pub mne_cookie_file: Option<PathBuf>,

    /// Freshness window for MI CSRF tokens (default: 30 seconds).
    pub csrf_max_age: Duration,

    /// Source tag used in the `x-infor-ionapi-source` header when a request
    /// does not carry its own (default: "odin").
    pub source: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            m3_url: None,
            ion_api_url: None,
            ion_token_file: None,
            mne_cookie_file: None,
            csrf_max_age: DEFAULT_CSRF_MAX_AGE,
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the M3 environment base URL.
    pub fn with_m3_url(mut self, url: impl Into<String>) -> Self {
        self.m3_url = Some(url.into());
        self
    }

    /// Sets an explicit ION API base URL, skipping environment-context
    /// resolution.
    pub fn with_ion_api_url(mut self, url: impl Into<String>) -> Self {
        self.ion_api_url = Some(url.into());
        self
    }

    /// Sets the bearer-token artifact file path.
    pub fn with_ion_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ion_token_file = Some(path.into());
        self
    }

    /// Sets the cookie artifact file path.
    pub fn with_mne_cookie_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mne_cookie_file = Some(path.into());
        self
    }

    /// Sets the CSRF token freshness window.
    pub fn with_csrf_max_age(mut self, max_age: Duration) -> Self {
        self.csrf_max_age = max_age;
        self
    }

    /// Sets the source tag for the `x-infor-ionapi-source` header.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Returns the M3 base URL, or a configuration error if none is set.
    ///
    /// # Errors
    ///
    /// Returns [`OdinError::Configuration`] when no M3 URL was configured.
    pub fn require_m3_url(&self) -> Result<&str> {
        self.m3_url
            .as_deref()
            .ok_or_else(|| OdinError::Configuration("no M3 URL configured".to_string()))
    }
}
