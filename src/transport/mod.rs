//! HTTP transport seam for the M3 brokers.
//!
//! This module defines the [`HttpTransport`] trait that all concrete HTTP
//! clients must satisfy. The brokers never assume a specific client; they are
//! polymorphic over this capability, which is what makes their concurrency
//! properties testable without a network.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "reqwest-transport")]
pub mod reqwest;

/// Header injected on every proxied ION API request.
pub const HEADER_PLATFORM: &str = "x-infor-ionapi-platform";

/// Value of the platform header.
pub const PLATFORM: &str = "m3-odin";

/// Header carrying the `m3-odin-<source>` tag on ION API requests.
pub const HEADER_SOURCE: &str = "x-infor-ionapi-source";

/// Header carrying the MI CSRF token.
pub const HEADER_CSRF: &str = "fnd-csrf-token";

/// HTTP method for an outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// Expected shape of the response body.
///
/// The ION OAuth exchange returns the bearer token verbatim as text; most
/// other endpoints return JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Json,
    Text,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub response_type: ResponseType,
}

impl HttpRequest {
    /// Creates a GET request for the given URL.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            response_type: ResponseType::default(),
        }
    }

    /// Creates a POST request with the given body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
            response_type: ResponseType::default(),
        }
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the expected response body shape.
    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Returns the first header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    /// Creates a response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HttpTransport executes HTTP requests on behalf of the brokers.
///
/// All implementations must be `Send + Sync` to support concurrent access
/// across async tasks. A transport returns `Ok` for any response it received,
/// including 4xx/5xx statuses; `Err` is reserved for failures where no
/// response exists (connect errors, timeouts). Timeout policy belongs to the
/// transport, never to the brokers.
///
/// # Implementations
///
/// - **Mock** (`mock` feature): scripted in-memory transport for tests
/// - **Reqwest** (`reqwest-transport` feature): production client over rustls
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Executes a request and returns the response.
    ///
    /// # Errors
    ///
    /// Returns [`OdinError::Transport`](crate::OdinError::Transport) when the
    /// request could not be completed at all.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = HttpRequest::post("https://m3.example.com/mne/servlet/MvxMCSvt", "CMDTP=LOGON")
            .with_header("Accept", "application/json")
            .with_response_type(ResponseType::Text);

        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(request.response_type, ResponseType::Text);
    }

    #[test]
    fn test_response_ok_range() {
        assert!(HttpResponse::new(200, "").ok());
        assert!(HttpResponse::new(204, "").ok());
        assert!(!HttpResponse::new(301, "").ok());
        assert!(!HttpResponse::new(401, "").ok());
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let mut response = HttpResponse::new(401, "");
        response
            .headers
            .insert("WWW-Authenticate".to_string(), "Bearer error=\"invalid_token\"".to_string());

        assert!(response.header("www-authenticate").is_some());
    }
}
