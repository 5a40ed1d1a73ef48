//! Production transport backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::{OdinError, Result};

/// HTTP request timeout in seconds.
/// The legacy M3 endpoints can be slow; 30s fails fast enough without
/// cutting off healthy responses.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// [`HttpTransport`] implementation over a pooled [`reqwest::Client`].
///
/// Clone is cheap - `reqwest::Client` uses `Arc` internally for connection
/// pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| OdinError::transport("client init", "", None, e.to_string()))?;

        Ok(Self { client })
    }

    /// Creates a transport from an existing client (to share a pool or a
    /// custom TLS/proxy setup).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
            Method::Put => self.client.put(&request.url),
            Method::Delete => self.client.delete(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            OdinError::transport(
                request.method.to_string(),
                request.url.clone(),
                e.status().map(|s| s.as_u16()),
                e.to_string(),
            )
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(|e| {
            OdinError::transport(
                request.method.to_string(),
                request.url.clone(),
                Some(status),
                e.to_string(),
            )
        })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
