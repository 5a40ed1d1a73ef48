//! m3-odin - Async session and credential brokers for the Infor M3 APIs.
//!
//! M3 exposes three API surfaces with three different credential lifecycles:
//! the form engine (MNE) wants a single cookie-backed session started with
//! `LOGON`, MI transactions want a short-lived CSRF token, and the ION API
//! gateway wants an OAuth bearer token exchanged from the session. This crate
//! implements one broker per surface over a shared transport seam, so callers
//! never deal with logins, token refreshes, or 401 retries themselves.
//!
//! # Features
//!
//! - **Single-flight acquisition**: concurrent callers share one login or
//!   token load; queued requests drain in FIFO order once it settles
//! - **Transport seam**: brokers are polymorphic over [`HttpTransport`];
//!   bring your own client or enable the bundled reqwest one
//! - **Failure taxonomy**: login, token, credential, and transport failures
//!   are distinct [`OdinError`] variants
//! - **Dev-proxy support**: file-backed credential injection for proxied
//!   requests, with a localhost guard for development tokens
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use m3_odin::form::{FormRequest, JsonFormResponseParser, SessionBroker};
//! use m3_odin::transport::mock::MockTransport;
//! use m3_odin::Config;
//!
//! #[tokio::main]
//! async fn main() -> m3_odin::Result<()> {
//!     let config = Config::new().with_m3_url("https://m3.example.com");
//!
//!     let broker = SessionBroker::new(
//!         Arc::new(MockTransport::new()),
//!         Arc::new(JsonFormResponseParser),
//!         config,
//!     );
//!
//!     // The first execute triggers LOGON; concurrent callers queue behind it.
//!     let response = broker.execute(FormRequest::command("RUN").with_value("MMS001")).await?;
//!     println!("result: {}", response.result);
//!
//!     broker.logoff().await?;
//!     Ok(())
//! }
//! ```
//!
//! # API surfaces
//!
//! | Surface | Broker | Credential | Lifetime |
//! |---------|--------|------------|----------|
//! | MNE (form engine) | [`form::SessionBroker`] | session cookie via `LOGON`/`QUIT` | until logoff |
//! | MI (transactions) | [`mi::MiService`] + [`mi::TokenCache`] | CSRF token | 30 seconds |
//! | ION API (gateway) | [`ion::IonContextBroker`] | bearer token | until a 401 |
//!
//! # Feature Flags
//!
//! - `mock` (default): in-memory [`transport::mock::MockTransport`] and the
//!   JSON form parser used in tests and examples
//! - `reqwest-transport`: production [`transport::reqwest::ReqwestTransport`]
//!   over rustls

pub mod authenticator;
pub mod config;
pub mod credential;
pub mod error;
pub mod form;
pub mod ion;
pub mod mi;
pub mod transport;
pub mod validation;

pub use authenticator::RequestAuthenticator;
pub use config::Config;
pub use credential::{ArtifactFormat, Credential, CredentialStatus, CredentialStore};
pub use error::{OdinError, Result};
pub use transport::{HttpRequest, HttpResponse, HttpTransport};
