//! MI (Method Interface) client.
//!
//! MI is the ERP's RPC-style transactional API. Calls are plain REST
//! requests guarded by the short-lived CSRF token from
//! [`CsrfTokenCache`](token::CsrfTokenCache) instead of a full session.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::form::urlencode;
use crate::mi::token::CsrfTokenCache;
use crate::transport::{HttpRequest, HttpTransport, HEADER_CSRF};
use crate::{OdinError, Result};

pub mod token;

pub use token::CsrfTokenCache as TokenCache;

/// Execution path of the MI REST endpoint, relative to the M3 base URL.
pub const MI_EXECUTE_PATH: &str = "/m3api-rest/execute";

/// An MI transaction call.
///
/// ```
/// use m3_odin::mi::MiRequest;
///
/// let request = MiRequest::new("CRS610MI", "GetBasicData")
///     .with_field("CUNO", "ACME")
///     .with_max_records(1);
/// assert_eq!(request.program, "CRS610MI");
/// ```
#[derive(Debug, Clone)]
pub struct MiRequest {
    /// MI program, e.g. `CRS610MI`.
    pub program: String,
    /// Transaction within the program, e.g. `GetBasicData`.
    pub transaction: String,
    /// Input record fields.
    pub fields: Vec<(String, String)>,
    /// Caps the number of returned records when set.
    pub max_records: Option<u32>,
    /// Set false to skip the CSRF token for this call.
    pub use_token: bool,
}

impl MiRequest {
    /// Creates a call for the given program and transaction.
    pub fn new(program: impl Into<String>, transaction: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            transaction: transaction.into(),
            fields: Vec::new(),
            max_records: None,
            use_token: true,
        }
    }

    /// Adds an input field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Caps the number of returned records.
    pub fn with_max_records(mut self, max_records: u32) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Disables the CSRF token for this call.
    pub fn without_token(mut self) -> Self {
        self.use_token = false;
        self
    }
}

/// One output record, keyed by field name. Values are trimmed of the
/// engine's space padding.
pub type MiRecord = HashMap<String, String>;

/// Decoded outcome of an MI call.
#[derive(Debug, Clone, Default)]
pub struct MiResponse {
    pub records: Vec<MiRecord>,
}

#[derive(Debug, Deserialize)]
struct RawNameValue {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "NameValue", default)]
    values: Vec<RawNameValue>,
}

#[derive(Debug, Deserialize)]
struct RawMiReply {
    #[serde(rename = "MIRecord", default)]
    records: Vec<RawRecord>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// Client for MI transaction calls.
pub struct MiService {
    transport: Arc<dyn HttpTransport>,
    config: Config,
    tokens: CsrfTokenCache,
}

impl MiService {
    /// Creates an MI client with its own token cache.
    pub fn new(transport: Arc<dyn HttpTransport>, config: Config) -> Self {
        let tokens = CsrfTokenCache::new(Arc::clone(&transport), config.clone());
        Self {
            transport,
            config,
            tokens,
        }
    }

    /// Returns the token cache (for invalidation or inspection).
    pub fn tokens(&self) -> &CsrfTokenCache {
        &self.tokens
    }

    /// Executes an MI transaction.
    ///
    /// Ensures a CSRF token first (unless disabled or unsupported), then
    /// issues the REST call and decodes the record rows.
    ///
    /// # Errors
    ///
    /// - [`OdinError::TokenRefresh`]: the token refresh was rejected
    /// - [`OdinError::AuthenticationFailed`]: the call itself came back 401
    /// - [`OdinError::Application`]: the engine reported a transaction error
    pub async fn execute(&self, request: MiRequest) -> Result<MiResponse> {
        let token = self.tokens.ensure_token(request.use_token).await?;

        let url = self.build_url(&request)?;
        let mut http = HttpRequest::get(&url).with_header("Accept", "application/json");
        if let Some(token) = token {
            http = http.with_header(HEADER_CSRF, token);
        }

        let response = self.transport.execute(http).await?;
        if response.status == 401 {
            // The rejected token must not be re-attached on the next call.
            self.tokens.invalidate().await;
            return Err(OdinError::AuthenticationFailed(format!(
                "MI call {}/{} rejected",
                request.program, request.transaction
            )));
        }
        if !response.ok() {
            warn!(program = %request.program, transaction = %request.transaction, status = response.status, "MI call failed");
            return Err(OdinError::transport(
                format!("{}/{}", request.program, request.transaction),
                url,
                Some(response.status),
                "MI endpoint returned a non-success status",
            ));
        }

        let raw: RawMiReply = serde_json::from_str(&response.body)?;
        if raw.records.is_empty() {
            if let Some(message) = raw.message {
                return Err(OdinError::Application {
                    operation: format!("{}/{}: {message}", request.program, request.transaction),
                    code: -1,
                });
            }
        }

        let records = raw
            .records
            .into_iter()
            .map(|record| {
                record
                    .values
                    .into_iter()
                    .map(|nv| (nv.name, nv.value.unwrap_or_default().trim().to_string()))
                    .collect()
            })
            .collect();

        Ok(MiResponse { records })
    }

    fn build_url(&self, request: &MiRequest) -> Result<String> {
        let mut url = format!(
            "{}{}/{}/{}",
            self.config.require_m3_url()?,
            MI_EXECUTE_PATH,
            request.program,
            request.transaction
        );

        let mut separator = '?';
        if let Some(max_records) = request.max_records {
            url.push_str(&format!("{separator}maxrecs={max_records}"));
            separator = '&';
        }
        for (name, value) in &request.fields {
            url.push_str(&format!(
                "{separator}{}={}",
                urlencode(name),
                urlencode(value)
            ));
            separator = '&';
        }
        Ok(url)
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::HttpResponse;

    fn service(transport: &MockTransport) -> MiService {
        MiService::new(
            Arc::new(transport.clone()),
            Config::new().with_m3_url("https://m3.example.com"),
        )
    }

    fn reply_one_record() -> HttpResponse {
        HttpResponse::new(
            200,
            r#"{"MIRecord":[{"NameValue":[{"Name":"CUNO","Value":"ACME   "},{"Name":"CUNM","Value":"Acme Corp"}]}]}"#,
        )
    }

    #[tokio::test]
    async fn test_execute_attaches_csrf_token() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::new(200, "csrf-1")).await;
        transport.push_response(reply_one_record()).await;

        let service = service(&transport);
        let response = service
            .execute(MiRequest::new("CRS610MI", "GetBasicData").with_field("CUNO", "ACME"))
            .await
            .unwrap();

        assert_eq!(response.records.len(), 1);
        // Values come back trimmed.
        assert_eq!(response.records[0].get("CUNO").map(String::as_str), Some("ACME"));

        let requests = transport.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.ends_with("/m3api-rest/csrf"));
        assert_eq!(requests[1].header("fnd-csrf-token"), Some("csrf-1"));
        assert!(requests[1].url.contains("/m3api-rest/execute/CRS610MI/GetBasicData"));
        assert!(requests[1].url.contains("CUNO=ACME"));
    }

    #[tokio::test]
    async fn test_execute_without_token() {
        let transport = MockTransport::new();
        transport.push_response(reply_one_record()).await;

        let service = service(&transport);
        service
            .execute(MiRequest::new("CRS610MI", "GetBasicData").without_token())
            .await
            .unwrap();

        let requests = transport.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].header("fnd-csrf-token").is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_call() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::new(200, "csrf-1")).await;
        transport.push_status(401).await;

        let service = service(&transport);
        let result = service.execute(MiRequest::new("CRS610MI", "GetBasicData")).await;

        assert!(matches!(result, Err(OdinError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_unauthorized_call_invalidates_cached_token() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::new(200, "csrf-1")).await;
        transport.push_status(401).await;
        transport.push_response(HttpResponse::new(200, "csrf-2")).await;
        transport.push_response(reply_one_record()).await;

        let service = service(&transport);
        let rejected = service.execute(MiRequest::new("CRS610MI", "GetBasicData")).await;
        assert!(matches!(rejected, Err(OdinError::AuthenticationFailed(_))));

        // The next call refreshes instead of re-attaching the rejected token.
        service
            .execute(MiRequest::new("CRS610MI", "GetBasicData"))
            .await
            .unwrap();

        let requests = transport.requests().await;
        assert_eq!(requests.len(), 4);
        assert!(requests[2].url.ends_with("/m3api-rest/csrf"));
        assert_eq!(requests[3].header("fnd-csrf-token"), Some("csrf-2"));
    }

    #[tokio::test]
    async fn test_error_message_without_records() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::new(200, "csrf-1")).await;
        transport
            .push_response(HttpResponse::new(
                200,
                r#"{"Message":"Customer ACME does not exist"}"#,
            ))
            .await;

        let service = service(&transport);
        let result = service
            .execute(MiRequest::new("CRS610MI", "GetBasicData").with_field("CUNO", "ACME"))
            .await;

        match result {
            Err(OdinError::Application { operation, .. }) => {
                assert!(operation.contains("does not exist"))
            }
            other => panic!("expected Application error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_records_in_url() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::new(200, "csrf-1")).await;
        transport.push_response(reply_one_record()).await;

        let service = service(&transport);
        service
            .execute(MiRequest::new("CRS610MI", "LstByNumber").with_max_records(5))
            .await
            .unwrap();

        let requests = transport.requests().await;
        assert!(requests[1].url.contains("maxrecs=5"));
    }
}
