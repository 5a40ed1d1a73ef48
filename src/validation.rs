//! Input validation for origins and header values.

use crate::{OdinError, Result};

/// Host names accepted as a local development origin.
const LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]"];

/// Validates that an origin refers to localhost.
///
/// Development tokens bypass the normal ION token exchange and must never be
/// shipped to a non-local context. The check accepts `http`/`https` origins
/// whose host is `localhost`, `127.0.0.1`, or `[::1]`, with or without a port.
///
/// # Errors
///
/// Returns [`OdinError::Configuration`] with the message
/// `"Development tokens are only allowed for localhost"` otherwise.
///
/// # Example
///
/// ```
/// use m3_odin::validation::validate_localhost_origin;
///
/// assert!(validate_localhost_origin("http://localhost:4200").is_ok());
/// assert!(validate_localhost_origin("https://127.0.0.1").is_ok());
///
/// assert!(validate_localhost_origin("https://m3.example.com").is_err());
/// assert!(validate_localhost_origin("").is_err());
/// ```
pub fn validate_localhost_origin(origin: &str) -> Result<()> {
    let rest = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))
        .unwrap_or(origin);

    // Strip a trailing port, taking care not to split the IPv6 brackets.
    let host = if let Some(end) = rest.find(']') {
        &rest[..=end]
    } else {
        rest.split(':').next().unwrap_or(rest)
    };

    if LOCAL_HOSTS.contains(&host) {
        Ok(())
    } else {
        Err(OdinError::Configuration(
            "Development tokens are only allowed for localhost".to_string(),
        ))
    }
}

/// Validates a value before it is attached as an HTTP header.
///
/// Rejects empty values and values containing CR/LF or other control
/// characters (header injection). Callers that attach credentials treat a
/// failure here as "proceed without the credential", not as a request abort.
///
/// # Errors
///
/// Returns [`OdinError::CredentialUnavailable`] describing the rejected value.
pub fn validate_header_value(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(OdinError::CredentialUnavailable(
            "header value is empty".to_string(),
        ));
    }

    if value.chars().any(|c| c.is_control()) {
        return Err(OdinError::CredentialUnavailable(
            "header value contains control characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_origins() {
        assert!(validate_localhost_origin("http://localhost").is_ok());
        assert!(validate_localhost_origin("http://localhost:8080").is_ok());
        assert!(validate_localhost_origin("https://127.0.0.1:4200").is_ok());
        assert!(validate_localhost_origin("http://[::1]:3000").is_ok());
        assert!(validate_localhost_origin("localhost:4200").is_ok());
    }

    #[test]
    fn test_remote_origins_rejected() {
        for origin in [
            "https://m3.example.com",
            "http://localhost.evil.com",
            "https://10.0.0.5",
            "",
        ] {
            let result = validate_localhost_origin(origin);
            assert!(result.is_err(), "expected rejection for {origin:?}");
            assert_eq!(
                result.unwrap_err().to_string(),
                "configuration error: Development tokens are only allowed for localhost"
            );
        }
    }

    #[test]
    fn test_header_values() {
        assert!(validate_header_value("Bearer abc123").is_ok());
        assert!(validate_header_value("JSESSIONID=abc;").is_ok());

        assert!(validate_header_value("").is_err());
        assert!(validate_header_value("abc\r\nX-Evil: 1").is_err());
    }
}
