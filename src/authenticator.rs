//! Request authentication for proxied M3 traffic.
//!
//! A [`RequestAuthenticator`] guards one proxied path: it attaches the
//! current credential to outgoing requests, detects authentication failure in
//! responses, and invalidates the backing [`CredentialStore`] when the
//! backend signals a bad credential. Multiple authenticators may exist
//! concurrently (one for the ION API path, one for the MNE path), each with
//! its own store and its own expiry policy.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::credential::{ArtifactFormat, CredentialStore};
use crate::transport::HttpRequest;
use crate::transport::HttpResponse;
use crate::validation::validate_header_value;
use crate::{OdinError, Result};

/// Response header inspected for the authentication-failure signal.
const AUTH_FAILURE_HEADER: &str = "WWW-Authenticate";

/// Substring of [`AUTH_FAILURE_HEADER`] that denotes a rejected credential.
const AUTH_FAILURE_SIGNAL: &str = "error";

/// Injects credentials into proxied requests and reacts to auth failures.
///
/// Stateless aside from the store it wraps. Attachment problems are swallowed
/// (logged only) and the request proceeds without a credential; the legacy
/// proxy relied on downstream 401 handling for anonymous endpoints, and that
/// behavior is preserved here.
pub struct RequestAuthenticator {
    store: CredentialStore,
    header: &'static str,
    invalidate_on_transport_error: bool,
    label: &'static str,
}

impl RequestAuthenticator {
    /// Creates an authenticator for the ION API path.
    ///
    /// Reads the bearer-token artifact and attaches it as `Authorization`.
    /// Transport errors do not invalidate the token.
    pub fn ion_api(token_file: impl AsRef<Path>) -> Self {
        Self {
            store: CredentialStore::new(token_file, ArtifactFormat::BearerToken),
            header: "Authorization",
            invalidate_on_transport_error: false,
            label: "ionapi",
        }
    }

    /// Creates an authenticator for the MNE path.
    ///
    /// Reads the cookie artifact and attaches it as `Cookie`. A transport
    /// error invalidates the cookie, since a cookie failure is assumed to
    /// mean the cookie is bad.
    pub fn mne(cookie_file: impl AsRef<Path>) -> Self {
        Self {
            store: CredentialStore::new(cookie_file, ArtifactFormat::CookieHeader),
            header: "Cookie",
            invalidate_on_transport_error: true,
            label: "mne",
        }
    }

    /// Creates the ION API authenticator from [`Config::ion_token_file`].
    ///
    /// # Errors
    ///
    /// Returns [`OdinError::Configuration`] when no token file is configured.
    pub fn ion_api_from_config(config: &Config) -> Result<Self> {
        config
            .ion_token_file
            .as_ref()
            .map(Self::ion_api)
            .ok_or_else(|| {
                OdinError::Configuration("no ION token file configured".to_string())
            })
    }

    /// Creates the MNE authenticator from [`Config::mne_cookie_file`].
    ///
    /// # Errors
    ///
    /// Returns [`OdinError::Configuration`] when no cookie file is configured.
    pub fn mne_from_config(config: &Config) -> Result<Self> {
        config
            .mne_cookie_file
            .as_ref()
            .map(Self::mne)
            .ok_or_else(|| {
                OdinError::Configuration("no MNE cookie file configured".to_string())
            })
    }

    /// Returns the wrapped store (for inspection in tests and diagnostics).
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Attaches the current credential to an outgoing request.
    ///
    /// If the cached credential is invalid, attempts one
    /// [`CredentialStore::read`] first. When no usable credential exists, the
    /// request is forwarded unauthenticated.
    pub fn before_send(&mut self, request: &mut HttpRequest) {
        let now = Utc::now();
        if !self.store.is_valid(now) {
            self.store.read();
        }
        if !self.store.is_valid(now) {
            debug!(path = %self.label, url = %request.url, "no valid credential, forwarding unauthenticated");
            return;
        }

        let Some(value) = self.store.current().value.clone() else {
            return;
        };
        if let Err(e) = validate_header_value(&value) {
            warn!(path = %self.label, err = %e, "credential not attachable, forwarding unauthenticated");
            return;
        }

        request.headers.push((self.header.to_string(), value));
    }

    /// Inspects a response for the authentication-failure signal.
    ///
    /// Returns `false` (and invalidates the store) when the backend rejected
    /// the credential, `true` otherwise.
    pub fn after_receive(&mut self, response: &HttpResponse) -> bool {
        let failed = response
            .header(AUTH_FAILURE_HEADER)
            .is_some_and(|v| v.contains(AUTH_FAILURE_SIGNAL));

        if failed {
            warn!(path = %self.label, status = response.status, "authentication failure signaled, invalidating credential");
            self.store.invalidate();
            return false;
        }
        true
    }

    /// Handles a transport-level failure on this path.
    ///
    /// Cookie-based flows also invalidate the credential.
    pub fn on_transport_error(&mut self, context: &str, error: &OdinError) {
        warn!(path = %self.label, context = %context, err = %error, "transport error on proxied request");
        if self.invalidate_on_transport_error {
            self.store.invalidate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpRequest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cookie_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[test]
    fn test_cookie_attached() {
        let file = cookie_file("JSESSIONID=abc;");
        let mut auth = RequestAuthenticator::mne(file.path());

        let mut request = HttpRequest::get("/mne/servlet/MvxMCSvt");
        auth.before_send(&mut request);

        assert_eq!(request.header("Cookie"), Some("JSESSIONID=abc;"));
    }

    #[test]
    fn test_missing_artifact_forwards_unauthenticated() {
        let mut auth = RequestAuthenticator::mne("/nonexistent/cookie.txt");

        let mut request = HttpRequest::get("/mne/servlet/MvxMCSvt");
        auth.before_send(&mut request);

        assert!(request.header("Cookie").is_none());
        assert!(!auth.store().is_valid(Utc::now()));
    }

    #[test]
    fn test_fresh_read_after_broken_path() {
        let file = cookie_file("JSESSIONID=abc;");
        let mut auth = RequestAuthenticator::mne(file.path());

        // First call succeeds and caches the cookie.
        let mut first = HttpRequest::get("/a");
        auth.before_send(&mut first);
        assert!(first.header("Cookie").is_some());

        // Invalidate, then the next call re-reads the file.
        auth.store.invalidate();
        let mut second = HttpRequest::get("/b");
        auth.before_send(&mut second);
        assert_eq!(second.header("Cookie"), Some("JSESSIONID=abc;"));
    }

    #[test]
    fn test_auth_failure_signal_invalidates() {
        let file = cookie_file("JSESSIONID=abc;");
        let mut auth = RequestAuthenticator::mne(file.path());

        let mut request = HttpRequest::get("/a");
        auth.before_send(&mut request);

        let mut response = HttpResponse::new(401, "");
        response.headers.insert(
            "WWW-Authenticate".to_string(),
            "Bearer error=\"invalid_token\"".to_string(),
        );

        assert!(!auth.after_receive(&response));
        assert!(!auth.store().is_valid(Utc::now()));
    }

    #[test]
    fn test_clean_response_passes() {
        let file = cookie_file("JSESSIONID=abc;");
        let mut auth = RequestAuthenticator::mne(file.path());
        auth.store.read();

        assert!(auth.after_receive(&HttpResponse::new(200, "ok")));
        assert!(auth.store().is_valid(Utc::now()));
    }

    #[test]
    fn test_transport_error_invalidates_cookie_flow_only() {
        let cookie = cookie_file("JSESSIONID=abc;");
        let mut mne = RequestAuthenticator::mne(cookie.path());
        mne.store.read();

        let err = OdinError::transport("proxy", "/a", None, "reset");
        mne.on_transport_error("proxy", &err);
        assert!(!mne.store().is_valid(Utc::now()));

        let mut bearer = NamedTempFile::new().unwrap();
        write!(
            bearer,
            r#"{{"authorizationHeader":"Bearer x","expirationTimestamp":"2099-01-01T00:00:00Z"}}"#
        )
        .unwrap();
        let mut ion = RequestAuthenticator::ion_api(bearer.path());
        ion.store.read();

        ion.on_transport_error("proxy", &err);
        assert!(ion.store().is_valid(Utc::now()));
    }

    #[test]
    fn test_constructed_from_config_paths() {
        let file = cookie_file("JSESSIONID=abc;");
        let config = Config::new()
            .with_mne_cookie_file(file.path())
            .with_ion_token_file("/tmp/ion-token.json");

        let mut mne = RequestAuthenticator::mne_from_config(&config).unwrap();
        assert_eq!(mne.store().path(), file.path());

        let mut request = HttpRequest::get("/a");
        mne.before_send(&mut request);
        assert_eq!(request.header("Cookie"), Some("JSESSIONID=abc;"));

        let ion = RequestAuthenticator::ion_api_from_config(&config).unwrap();
        assert_eq!(ion.store().path(), Path::new("/tmp/ion-token.json"));
    }

    #[test]
    fn test_missing_config_paths_rejected() {
        let config = Config::new();

        assert!(matches!(
            RequestAuthenticator::ion_api_from_config(&config),
            Err(OdinError::Configuration(_))
        ));
        assert!(matches!(
            RequestAuthenticator::mne_from_config(&config),
            Err(OdinError::Configuration(_))
        ));
    }

    #[test]
    fn test_header_injection_swallowed() {
        let file = cookie_file("JSESSIONID=abc;\r\nX-Evil: 1;");
        let mut auth = RequestAuthenticator::mne(file.path());

        let mut request = HttpRequest::get("/a");
        auth.before_send(&mut request);

        // Multi-line artifact would smuggle a header; it is dropped, not fatal.
        assert!(request.header("Cookie").is_none());
    }
}
