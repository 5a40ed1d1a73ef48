//! Credential artifacts and the file-backed credential store.
//!
//! A [`CredentialStore`] loads one credential artifact from an external file,
//! tracks its expiration, and supports forced invalidation. Each store owns
//! its credential exclusively; brokers never share credential values.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

/// Freshness state of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialStatus {
    /// Present and within its expiry window.
    Fresh,
    /// Explicitly invalidated or past expiry.
    Stale,
    /// No successful acquisition yet.
    #[default]
    Unknown,
}

/// An opaque credential payload with optional expiry.
///
/// Created empty at store construction, populated by a successful read,
/// invalidated by expiry, an observed authentication failure, or an explicit
/// force-refresh. An absent `expires_at` means "valid until explicitly
/// invalidated".
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub value: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: CredentialStatus,
}

impl Credential {
    /// Returns true if a value is present, not marked stale, and not expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if self.value.is_none() || self.status == CredentialStatus::Stale {
            return false;
        }
        match self.expires_at {
            Some(expires) => now < expires,
            None => true,
        }
    }
}

/// On-disk shape of the credential artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// JSON `{ "authorizationHeader": ..., "expirationTimestamp": ISO-8601 }`.
    BearerToken,
    /// Raw text, a semicolon-joined `name=value;` cookie string. No expiry
    /// policy; valid until explicitly invalidated.
    CookieHeader,
}

/// Bearer-token artifact file contents.
#[derive(Debug, Deserialize)]
struct BearerArtifact {
    #[serde(rename = "authorizationHeader")]
    authorization_header: String,
    #[serde(rename = "expirationTimestamp")]
    expiration_timestamp: DateTime<Utc>,
}

/// File-backed credential store.
///
/// Reads are synchronous and performed at call time; a missing or malformed
/// artifact logs a warning and yields no credential, never an error. This
/// matches the dev-proxy behavior where requests proceed unauthenticated and
/// downstream 401 handling takes over.
///
/// # Example
///
/// ```no_run
/// use m3_odin::credential::{ArtifactFormat, CredentialStore};
/// use chrono::Utc;
///
/// let mut store = CredentialStore::new("/tmp/mne-cookie.txt", ArtifactFormat::CookieHeader);
///
/// if let Some(credential) = store.read() {
///     println!("cookie: {:?}", credential.value);
/// }
/// assert!(store.is_valid(Utc::now()) || store.read().is_none());
/// ```
pub struct CredentialStore {
    path: PathBuf,
    format: ArtifactFormat,
    current: Credential,
}

impl CredentialStore {
    /// Creates a store for the artifact at `path`. No file access happens
    /// until the first [`read`](Self::read).
    pub fn new(path: impl AsRef<Path>, format: ArtifactFormat) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format,
            current: Credential::default(),
        }
    }

    /// Returns the artifact path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current in-memory credential without touching the file.
    pub fn current(&self) -> &Credential {
        &self.current
    }

    /// Loads the credential artifact from its file.
    ///
    /// Returns `None` (and logs) if the file is absent or malformed; the
    /// previous in-memory credential is replaced by an empty one in that case
    /// so stale values are never re-attached.
    pub fn read(&mut self) -> Option<&Credential> {
        debug!(path = %self.path.display(), "reading credential artifact");

        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path.display(), err = %e, "credential artifact unreadable");
                self.current = Credential::default();
                return None;
            }
        };

        self.current = match self.format {
            ArtifactFormat::BearerToken => match serde_json::from_str::<BearerArtifact>(&contents)
            {
                Ok(artifact) => Credential {
                    value: Some(artifact.authorization_header),
                    expires_at: Some(artifact.expiration_timestamp),
                    status: CredentialStatus::Fresh,
                },
                Err(e) => {
                    warn!(path = %self.path.display(), err = %e, "credential artifact malformed");
                    self.current = Credential::default();
                    return None;
                }
            },
            ArtifactFormat::CookieHeader => {
                let cookie = contents.trim();
                if cookie.is_empty() {
                    warn!(path = %self.path.display(), "credential artifact is empty");
                    self.current = Credential::default();
                    return None;
                }
                Credential {
                    value: Some(cookie.to_string()),
                    expires_at: None,
                    status: CredentialStatus::Fresh,
                }
            }
        };

        Some(&self.current)
    }

    /// Marks the current credential stale regardless of its expiry.
    pub fn invalidate(&mut self) {
        debug!(path = %self.path.display(), "invalidating credential");
        self.current.status = CredentialStatus::Stale;
    }

    /// Returns true only if a credential is present and `now` is within its
    /// expiry window (or the credential kind carries no expiry).
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.current.is_valid(now)
    }
}
