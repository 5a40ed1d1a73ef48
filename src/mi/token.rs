//! CSRF token cache for MI calls.
//!
//! MI transactions are guarded by a short-lived anti-forgery token rather
//! than a full session. The cache refreshes the token inline when it ages
//! out, remembers permanently when the environment has no CSRF support
//! (HTTP 404), and serializes refreshes so concurrent callers share one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::transport::{HttpRequest, HttpTransport, ResponseType};
use crate::{OdinError, Result};

/// Token endpoint path, relative to the M3 base URL.
pub const CSRF_PATH: &str = "/m3api-rest/csrf";

/// Whether the configured environment supports CSRF tokens at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CsrfSupport {
    #[default]
    Unknown,
    Supported,
    /// The token endpoint answered 404; never ask again.
    Unsupported,
}

#[derive(Default)]
struct CsrfState {
    token: Option<String>,
    issued_at: Option<Instant>,
    support: CsrfSupport,
}

/// Cache for the MI CSRF token.
///
/// The internal mutex is held across the refresh call, which is what makes
/// the refresh single-flight: a second caller arriving mid-refresh blocks on
/// the lock and then finds a fresh token.
pub struct CsrfTokenCache {
    transport: Arc<dyn HttpTransport>,
    config: Config,
    max_age: Duration,
    state: Mutex<CsrfState>,
}

impl CsrfTokenCache {
    /// Creates a cache using the config's `csrf_max_age` freshness window.
    pub fn new(transport: Arc<dyn HttpTransport>, config: Config) -> Self {
        let max_age = config.csrf_max_age;
        Self {
            transport,
            config,
            max_age,
            state: Mutex::new(CsrfState::default()),
        }
    }

    /// Ensures a usable token, refreshing it if stale.
    ///
    /// Returns the header value to attach, or `None` when the caller disabled
    /// tokens (`use_token: false`) or the environment has no CSRF support.
    ///
    /// # Errors
    ///
    /// - [`OdinError::TokenRefresh`]: the refresh itself was rejected with
    ///   401 (the distinguished `TOKEN` error kind)
    /// - [`OdinError::Transport`]: the refresh could not be completed
    pub async fn ensure_token(&self, use_token: bool) -> Result<Option<String>> {
        if !use_token {
            return Ok(None);
        }

        let mut state = self.state.lock().await;
        if state.support == CsrfSupport::Unsupported {
            return Ok(None);
        }

        if let (Some(token), Some(issued_at)) = (&state.token, state.issued_at) {
            if issued_at.elapsed() < self.max_age {
                return Ok(Some(token.clone()));
            }
        }

        let url = format!("{}{}", self.config.require_m3_url()?, CSRF_PATH);
        debug!(url = %url, "refreshing CSRF token");

        let request = HttpRequest::get(&url)
            .with_response_type(ResponseType::Text)
            .with_header("Cache-Control", "no-cache");
        let response = self.transport.execute(request).await?;

        match response.status {
            404 => {
                info!(url = %url, "no CSRF support in this environment, disabling token refresh");
                state.support = CsrfSupport::Unsupported;
                state.token = None;
                state.issued_at = None;
                Ok(None)
            }
            401 => {
                warn!(url = %url, "CSRF token refresh rejected");
                Err(OdinError::TokenRefresh(
                    "token refresh rejected (401)".to_string(),
                ))
            }
            _ if response.ok() => {
                let token = response.body.trim().to_string();
                state.support = CsrfSupport::Supported;
                state.issued_at = Some(Instant::now());
                state.token = Some(token.clone());
                Ok(Some(token))
            }
            status => Err(OdinError::transport(
                "token refresh",
                url,
                Some(status),
                "CSRF endpoint returned a non-success status",
            )),
        }
    }

    /// Drops the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.token = None;
        state.issued_at = None;
    }
}
