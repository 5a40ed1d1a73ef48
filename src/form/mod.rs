//! Form engine (MNE/"H5") protocol types and parser seam.
//!
//! The legacy form engine is session-oriented: a `LOGON` command starts the
//! single logical session, `QUIT` ends it, and every other command runs
//! inside it. The wire format of its responses is owned by an external parser
//! behind the [`FormResponseParser`] trait; this crate only depends on the
//! parsed shape.

use std::collections::HashMap;

use serde::Deserialize;

use crate::Result;

pub mod broker;

pub use broker::{SessionBroker, SessionState};

/// Session-start command.
pub const CMD_LOGON: &str = "LOGON";

/// Session-end command.
pub const CMD_QUIT: &str = "QUIT";

/// Servlet path of the form engine, relative to the M3 base URL.
pub const FORM_SERVLET_PATH: &str = "/mne/servlet/MvxMCSvt";

/// A command issued against the form engine.
#[derive(Debug, Clone)]
pub struct FormRequest {
    /// Command type (`LOGON`, `QUIT`, `RUN`, ...).
    pub command: String,
    /// Command value, when the command takes one.
    pub value: Option<String>,
    /// Additional command parameters.
    pub params: Vec<(String, String)>,
}

impl FormRequest {
    /// Creates a request for a command with no value.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            value: None,
            params: Vec::new(),
        }
    }

    /// Sets the command value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Appends a command parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Encodes the command as a form-urlencoded request body
    /// (`CMDTP=<command>&CMDVAL=<value>&...`).
    pub fn to_body(&self) -> String {
        let mut body = format!("CMDTP={}", urlencode(&self.command));
        if let Some(ref value) = self.value {
            body.push_str("&CMDVAL=");
            body.push_str(&urlencode(value));
        }
        for (name, value) in &self.params {
            body.push('&');
            body.push_str(&urlencode(name));
            body.push('=');
            body.push_str(&urlencode(value));
        }
        body
    }
}

/// Percent-encodes a form field value.
pub(crate) fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// User context carried in the LOGON response.
///
/// The form engine returns the principal user's environment with the session;
/// the ION API base URL for the tenant lives here when it is not configured
/// explicitly.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserContext {
    /// ION API base URL for the tenant, when present.
    #[serde(rename = "ionApiUrl")]
    pub ion_api_url: Option<String>,
    /// Remaining environment values, keyed by field name.
    #[serde(flatten)]
    pub values: HashMap<String, String>,
}

/// Parsed outcome of a form engine command.
///
/// `result < 0` denotes an application-level error even on HTTP 200.
#[derive(Debug, Clone, Default)]
pub struct FormResponse {
    /// Session id assigned by LOGON, echoed on later commands.
    pub session_id: Option<String>,
    /// Principal user of the session.
    pub principal_user: Option<String>,
    /// User context (LOGON responses only).
    pub user_context: Option<UserContext>,
    /// Application result code; negative means failure.
    pub result: i32,
}

/// FormResponseParser decodes a raw form engine response body.
///
/// The legacy engine speaks an XML dialect whose format is out of scope here;
/// production deployments inject their parser through this trait.
pub trait FormResponseParser: Send + Sync {
    /// Parses a raw response body.
    ///
    /// # Errors
    ///
    /// Returns an error when the body cannot be decoded at all. Application
    /// failures are expressed through [`FormResponse::result`], not as parse
    /// errors.
    fn parse(&self, body: &str) -> Result<FormResponse>;
}

/// JSON-shaped parser for development and tests.
///
/// Accepts `{ "sessionId": ..., "principalUser": ..., "userContext": {...},
/// "result": 0 }`, the shape the mock transport scripts speak.
#[cfg(feature = "mock")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormResponseParser;

#[cfg(feature = "mock")]
impl FormResponseParser for JsonFormResponseParser {
    fn parse(&self, body: &str) -> Result<FormResponse> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "sessionId")]
            session_id: Option<String>,
            #[serde(rename = "principalUser")]
            principal_user: Option<String>,
            #[serde(rename = "userContext")]
            user_context: Option<UserContext>,
            #[serde(default)]
            result: i32,
        }

        let raw: Raw = serde_json::from_str(body)?;
        Ok(FormResponse {
            session_id: raw.session_id,
            principal_user: raw.principal_user,
            user_context: raw.user_context,
            result: raw.result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logon_body_encoding() {
        let request = FormRequest::command(CMD_LOGON);
        assert_eq!(request.to_body(), "CMDTP=LOGON");
    }

    #[test]
    fn test_run_body_encoding_with_value_and_params() {
        let request = FormRequest::command("RUN")
            .with_value("MMS001 B")
            .with_param("SID", "s-1");

        assert_eq!(request.to_body(), "CMDTP=RUN&CMDVAL=MMS001+B&SID=s-1");
    }

    #[test]
    fn test_urlencode_reserved_chars() {
        assert_eq!(urlencode("a&b=c"), "a%26b%3Dc");
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_json_parser() {
        let body = r#"{"sessionId":"s-1","principalUser":"MVXUSR","userContext":{"ionApiUrl":"https://ionapi.example.com","company":"100"},"result":0}"#;
        let response = JsonFormResponseParser.parse(body).unwrap();

        assert_eq!(response.session_id.as_deref(), Some("s-1"));
        assert_eq!(response.result, 0);
        let context = response.user_context.unwrap();
        assert_eq!(context.ion_api_url.as_deref(), Some("https://ionapi.example.com"));
        assert_eq!(context.values.get("company").map(String::as_str), Some("100"));
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_json_parser_rejects_garbage() {
        assert!(JsonFormResponseParser.parse("<xml/>").is_err());
    }
}
