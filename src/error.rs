//! Error types for M3 broker operations.

use thiserror::Error;

/// Result type alias using [`OdinError`].
pub type Result<T> = std::result::Result<T, OdinError>;

/// Errors that can occur while talking to the M3 APIs.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
/// Acquisition-phase failures (login, ION context load) are broadcast to every
/// caller waiting on the shared operation; per-request failures stay with the
/// single caller whose request failed.
#[derive(Debug, Error)]
pub enum OdinError {
    /// A required setting is missing or invalid (e.g. no M3 URL configured).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential artifact file is missing, unreadable, or malformed.
    ///
    /// Recovered locally: the request proceeds without a credential and
    /// downstream 401 handling takes over.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The backend signaled an invalid or expired credential.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The form engine rejected the LOGON command.
    ///
    /// Fatal for every caller queued behind the login attempt; the broker
    /// itself recovers (the next caller triggers a fresh login).
    #[error("session login failed: {0}")]
    SessionLoginFailed(String),

    /// CSRF token refresh failed (the distinguished `TOKEN` error kind).
    ///
    /// Kept separate from [`OdinError::Transport`] so callers can tell
    /// "can't refresh token" apart from "the request itself failed".
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    /// The server returned an application-level error (`result < 0`) on an
    /// otherwise successful HTTP response.
    #[error("{operation}: server returned error code {code}")]
    Application {
        /// Command or transaction name
        operation: String,
        /// Negative result code from the response
        code: i32,
    },

    /// Generic network/HTTP failure with request context.
    #[error("{operation} {url}: {message}")]
    Transport {
        /// Operation name (execute, login, token refresh, etc.)
        operation: String,
        /// Request URL
        url: String,
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Underlying failure description
        message: String,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OdinError {
    /// Creates a transport error with request context.
    ///
    /// # Example
    ///
    /// ```
    /// use m3_odin::OdinError;
    ///
    /// let err = OdinError::transport("login", "/mne/servlet/MvxMCSvt", Some(503), "service unavailable");
    /// assert_eq!(
    ///     err.to_string(),
    ///     "login /mne/servlet/MvxMCSvt: service unavailable"
    /// );
    /// ```
    pub fn transport(
        operation: impl Into<String>,
        url: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Rebuilds an error of the same variant and message.
    ///
    /// Acquisition failures are broadcast to every queued waiter, and errors
    /// wrapping `io`/serde sources cannot be cloned directly; those collapse
    /// into a message-preserving `Other`.
    pub(crate) fn clone_shape(&self) -> Self {
        match self {
            Self::Configuration(m) => Self::Configuration(m.clone()),
            Self::CredentialUnavailable(m) => Self::CredentialUnavailable(m.clone()),
            Self::AuthenticationFailed(m) => Self::AuthenticationFailed(m.clone()),
            Self::SessionLoginFailed(m) => Self::SessionLoginFailed(m.clone()),
            Self::TokenRefresh(m) => Self::TokenRefresh(m.clone()),
            Self::Application { operation, code } => Self::Application {
                operation: operation.clone(),
                code: *code,
            },
            Self::Transport {
                operation,
                url,
                status,
                message,
            } => Self::Transport {
                operation: operation.clone(),
                url: url.clone(),
                status: *status,
                message: message.clone(),
            },
            other => Self::Other(anyhow::anyhow!("{other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = OdinError::SessionLoginFailed("invalid user".to_string());
        assert_eq!(err.to_string(), "session login failed: invalid user");
    }

    #[test]
    fn test_transport_error_context() {
        let err = OdinError::transport("refresh", "/m3api-rest/csrf", Some(500), "boom");

        let error_string = err.to_string();
        assert!(error_string.contains("refresh"));
        assert!(error_string.contains("/m3api-rest/csrf"));
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_application_error_code() {
        let err = OdinError::Application {
            operation: "LOGON".to_string(),
            code: -8,
        };
        assert!(err.to_string().contains("-8"));
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = OdinError::from(io);

        assert!(err.source().is_some());
    }
}
