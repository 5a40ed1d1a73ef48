//! ION API gateway types.
//!
//! The ION API is the tenant's OAuth-protected REST gateway. Requests carry a
//! short-lived bearer token obtained from a session-exchange endpoint; the
//! token and the gateway base URL together form an [`IonApiContext`] managed
//! by the [`IonContextBroker`].

use async_trait::async_trait;

use crate::transport::{Method, ResponseType};
use crate::Result;

pub mod broker;

pub use broker::IonContextBroker;

/// Relative path of the session-to-bearer-token exchange endpoint.
pub const OAUTH_PATH: &str = "/grid/rest/security/sessions/oauth";

/// EnvironmentContextSource resolves the ION API base URL for the tenant.
///
/// When no explicit URL is configured, the ION broker asks this source -
/// typically the form session broker, whose LOGON response carries the URL in
/// the user context.
#[async_trait]
pub trait EnvironmentContextSource: Send + Sync {
    /// Returns the ION API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`OdinError::Configuration`](crate::OdinError::Configuration)
    /// when the environment does not expose one.
    async fn ion_api_url(&self) -> Result<String>;
}

/// A cached ION API context: base URL plus bearer token.
#[derive(Debug, Clone)]
pub struct IonApiContext {
    /// Gateway base URL ("" means relative, i.e. through the dev proxy).
    pub url: String,
    /// Bearer token payload (without the `Bearer ` prefix).
    pub token: String,
}

impl IonApiContext {
    /// Returns the auth header name/value pair for this context.
    pub fn auth_header(&self) -> (String, String) {
        ("Authorization".to_string(), format!("Bearer {}", self.token))
    }
}

/// A request against the ION API gateway.
///
/// ```
/// use m3_odin::ion::IonRequest;
///
/// let request = IonRequest::get("M3/m3api-rest/v2/execute/CRS610MI")
///     .with_source("Foo")
///     .with_retry(false);
/// assert_eq!(request.source.as_deref(), Some("Foo"));
/// ```
#[derive(Debug, Clone)]
pub struct IonRequest {
    /// Caller tag for the `x-infor-ionapi-source` header; the configured
    /// source tag is used when unset.
    pub source: Option<String>,
    /// URL relative to the gateway base.
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub response_type: ResponseType,
    /// Overrides the retry-on-401 default when set.
    pub can_retry: Option<bool>,
}

impl IonRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            source: None,
            url: url.into(),
            method: Method::Get,
            headers: Vec::new(),
            body: None,
            response_type: ResponseType::default(),
            can_retry: None,
        }
    }

    /// Creates a POST request with a body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            source: None,
            url: url.into(),
            method: Method::Post,
            headers: Vec::new(),
            body: Some(body.into()),
            response_type: ResponseType::default(),
            can_retry: None,
        }
    }

    /// Sets the caller tag for the `x-infor-ionapi-source` header.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Forces the retry decision for this request, overriding the
    /// retry-on-401 default.
    pub fn with_retry(mut self, can_retry: bool) -> Self {
        self.can_retry = Some(can_retry);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_header() {
        let context = IonApiContext {
            url: "https://ionapi.example.com".to_string(),
            token: "tok-1".to_string(),
        };

        let (name, value) = context.auth_header();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "Bearer tok-1");
    }

    #[test]
    fn test_request_builder() {
        let request = IonRequest::post("M3/bar", "{}")
            .with_header("Accept", "application/json")
            .with_retry(true);

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.can_retry, Some(true));
        // No per-request tag; the broker falls back to the configured one.
        assert!(request.source.is_none());
    }
}
