//! Session broker for the form engine.
//!
//! The form engine tolerates exactly one logical session per connection, so
//! the broker serializes session acquisition: the first caller triggers
//! LOGON, every caller arriving while the login is in flight joins a FIFO
//! queue, and the queue is drained in order once the login settles. No two
//! login attempts are ever concurrently in flight for one broker instance.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::form::{
    FormRequest, FormResponse, FormResponseParser, UserContext, CMD_LOGON, CMD_QUIT,
    FORM_SERVLET_PATH,
};
use crate::ion::EnvironmentContextSource;
use crate::transport::{HttpRequest, HttpTransport};
use crate::{OdinError, Result};

/// Lifecycle state of the logical backend session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists; the next caller triggers a login.
    NoSession,
    /// A login is in flight; new callers join the pending queue.
    Acquiring,
    /// The session is established; requests dispatch immediately.
    Active,
}

/// A caller request parked while the session is being acquired.
///
/// `payload: None` marks a bare login waiter (it receives the LOGON response
/// itself instead of a dispatched command result).
struct Pending {
    payload: Option<FormRequest>,
    reply: oneshot::Sender<Result<FormResponse>>,
}

struct Inner {
    state: SessionState,
    session_id: Option<String>,
    login_response: Option<FormResponse>,
    pending: VecDeque<Pending>,
}

/// What a caller does after the state transition decided under the lock.
enum Plan {
    Dispatch(FormRequest),
    Wait(oneshot::Receiver<Result<FormResponse>>),
    Drive(oneshot::Receiver<Result<FormResponse>>),
}

/// Broker for the single shared form engine session.
///
/// # Concurrency
///
/// State transitions (`NoSession -> Acquiring` and back) happen under the
/// internal mutex before any network await, so "check state" and "start
/// acquisition" cannot race. Queued requests are dispatched to the backend in
/// enqueue order; an individual dispatch failure is isolated to its caller,
/// while a LOGON failure rejects the whole queue.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use m3_odin::form::{FormRequest, JsonFormResponseParser, SessionBroker};
/// use m3_odin::transport::mock::MockTransport;
/// use m3_odin::Config;
///
/// #[tokio::main]
/// async fn main() -> m3_odin::Result<()> {
///     let config = Config::new().with_m3_url("https://m3.example.com");
///     let broker = SessionBroker::new(
///         Arc::new(MockTransport::new()),
///         Arc::new(JsonFormResponseParser),
///         config,
///     );
///
///     let response = broker.execute(FormRequest::command("RUN").with_value("MMS001")).await?;
///     println!("result: {}", response.result);
///     broker.logoff().await?;
///     Ok(())
/// }
/// ```
pub struct SessionBroker {
    transport: Arc<dyn HttpTransport>,
    parser: Arc<dyn FormResponseParser>,
    config: Config,
    inner: Mutex<Inner>,
}

impl SessionBroker {
    /// Creates a broker over the given transport and response parser.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        parser: Arc<dyn FormResponseParser>,
        config: Config,
    ) -> Self {
        Self {
            transport,
            parser,
            config,
            inner: Mutex::new(Inner {
                state: SessionState::NoSession,
                session_id: None,
                login_response: None,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Returns the current session state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Returns the active session id, if any.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.lock().await.session_id.clone()
    }

    /// Returns the user context delivered by the last successful LOGON.
    pub async fn user_context(&self) -> Option<UserContext> {
        self.inner
            .lock()
            .await
            .login_response
            .as_ref()
            .and_then(|r| r.user_context.clone())
    }

    /// Executes a command against the session.
    ///
    /// If the session is active the command dispatches immediately. If no
    /// session exists this caller triggers the login; if a login is already
    /// in flight the command joins its queue. Either way the returned future
    /// resolves with this command's individual result.
    ///
    /// # Errors
    ///
    /// - [`OdinError::SessionLoginFailed`]: the LOGON this command was queued
    ///   behind failed (every queued caller gets the same error)
    /// - [`OdinError::Application`]: the server answered `result < 0`
    /// - [`OdinError::Transport`]: this command's own dispatch failed
    pub async fn execute(&self, request: FormRequest) -> Result<FormResponse> {
        let plan = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Active => Plan::Dispatch(request),
                SessionState::Acquiring => Plan::Wait(Self::enqueue(&mut inner, Some(request))),
                SessionState::NoSession => {
                    inner.state = SessionState::Acquiring;
                    Plan::Drive(Self::enqueue(&mut inner, Some(request)))
                }
            }
        };

        match plan {
            Plan::Dispatch(request) => self.dispatch(&request).await,
            Plan::Wait(rx) => Self::await_outcome(rx).await,
            Plan::Drive(rx) => {
                self.run_login().await;
                Self::await_outcome(rx).await
            }
        }
    }

    /// Establishes the session, returning the LOGON response.
    ///
    /// Joins an in-flight login rather than starting a second one; returns
    /// the cached LOGON response when the session is already active.
    pub async fn login(&self) -> Result<FormResponse> {
        let (rx, drive) = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                SessionState::Active => {
                    return Ok(inner.login_response.clone().unwrap_or_default());
                }
                SessionState::Acquiring => (Self::enqueue(&mut inner, None), false),
                SessionState::NoSession => {
                    inner.state = SessionState::Acquiring;
                    (Self::enqueue(&mut inner, None), true)
                }
            }
        };

        if drive {
            self.run_login().await;
        }
        Self::await_outcome(rx).await
    }

    /// Ends the session with QUIT.
    ///
    /// The broker returns to `NoSession` regardless of the QUIT outcome, so
    /// the next caller triggers a fresh login. Any login in flight is allowed
    /// to settle first, including one that started while this call waited.
    pub async fn logoff(&self) -> Result<FormResponse> {
        let session_id = loop {
            let rx = {
                let mut inner = self.inner.lock().await;
                match inner.state {
                    SessionState::NoSession => return Ok(FormResponse::default()),
                    SessionState::Active => {
                        inner.state = SessionState::NoSession;
                        inner.login_response = None;
                        break inner.session_id.take();
                    }
                    SessionState::Acquiring => Self::enqueue(&mut inner, None),
                }
            };
            // Outcome does not matter; a failed login already left NoSession.
            let _ = Self::await_outcome(rx).await;
        };

        debug!(session = session_id.as_deref().unwrap_or(""), "ending form session");
        let mut quit = FormRequest::command(CMD_QUIT);
        if let Some(sid) = session_id {
            quit = quit.with_param("SID", sid);
        }
        self.dispatch_raw(&quit).await
    }

    fn enqueue(
        inner: &mut Inner,
        payload: Option<FormRequest>,
    ) -> oneshot::Receiver<Result<FormResponse>> {
        let (tx, rx) = oneshot::channel();
        inner.pending.push_back(Pending { payload, reply: tx });
        rx
    }

    async fn await_outcome(
        rx: oneshot::Receiver<Result<FormResponse>>,
    ) -> Result<FormResponse> {
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(OdinError::SessionLoginFailed(
                "login settled without a result".to_string(),
            )),
        }
    }

    /// Runs the LOGON and settles every queued caller.
    async fn run_login(&self) {
        debug!("starting LOGON");
        match self.dispatch_login().await {
            Ok(response) => {
                let drained = {
                    let mut inner = self.inner.lock().await;
                    inner.state = SessionState::Active;
                    inner.session_id = response.session_id.clone();
                    inner.login_response = Some(response.clone());
                    std::mem::take(&mut inner.pending)
                };
                info!(
                    session = response.session_id.as_deref().unwrap_or(""),
                    queued = drained.len(),
                    "form session established"
                );

                // FIFO drain; each dispatch is independent of its siblings.
                for entry in drained {
                    let result = match entry.payload {
                        Some(ref payload) => self.dispatch(payload).await,
                        None => Ok(response.clone()),
                    };
                    let _ = entry.reply.send(result);
                }
            }
            Err(e) => {
                let drained = {
                    let mut inner = self.inner.lock().await;
                    inner.state = SessionState::NoSession;
                    std::mem::take(&mut inner.pending)
                };
                warn!(err = %e, queued = drained.len(), "LOGON failed, rejecting queued requests");

                let message = match &e {
                    OdinError::SessionLoginFailed(m) => m.clone(),
                    other => other.to_string(),
                };
                for entry in drained {
                    let _ = entry
                        .reply
                        .send(Err(OdinError::SessionLoginFailed(message.clone())));
                }
            }
        }
    }

    async fn dispatch_login(&self) -> Result<FormResponse> {
        let response = self
            .dispatch_raw(&FormRequest::command(CMD_LOGON))
            .await
            .map_err(|e| OdinError::SessionLoginFailed(e.to_string()))?;

        if response.result < 0 {
            return Err(OdinError::SessionLoginFailed(format!(
                "LOGON rejected with code {}",
                response.result
            )));
        }
        Ok(response)
    }

    /// Dispatches a command inside the active session.
    async fn dispatch(&self, request: &FormRequest) -> Result<FormResponse> {
        let session_id = self.inner.lock().await.session_id.clone();
        let mut request = request.clone();
        if let Some(sid) = session_id {
            request = request.with_param("SID", sid);
        }

        let response = self.dispatch_raw(&request).await?;
        if response.result < 0 {
            return Err(OdinError::Application {
                operation: request.command.clone(),
                code: response.result,
            });
        }
        Ok(response)
    }

    /// Posts a command to the form servlet and parses the reply.
    async fn dispatch_raw(&self, request: &FormRequest) -> Result<FormResponse> {
        let url = format!("{}{}", self.config.require_m3_url()?, FORM_SERVLET_PATH);
        let http = HttpRequest::post(&url, request.to_body())
            .with_header("Content-Type", "application/x-www-form-urlencoded");

        let response = self.transport.execute(http).await?;
        if !response.ok() {
            warn!(command = %request.command, url = %url, status = response.status, "form command failed");
            return Err(OdinError::transport(
                request.command.clone(),
                url,
                Some(response.status),
                "form engine returned a non-success status",
            ));
        }

        self.parser.parse(&response.body)
    }
}

#[async_trait]
impl EnvironmentContextSource for SessionBroker {
    /// Resolves the tenant's ION API base URL from the session user context,
    /// logging on first if necessary.
    async fn ion_api_url(&self) -> Result<String> {
        let response = self.login().await?;
        response
            .user_context
            .and_then(|c| c.ion_api_url)
            .ok_or_else(|| {
                OdinError::Configuration(
                    "no ION API URL in the session user context".to_string(),
                )
            })
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::form::JsonFormResponseParser;
    use crate::transport::mock::MockTransport;
    use crate::transport::HttpResponse;

    fn broker(transport: &MockTransport) -> SessionBroker {
        SessionBroker::new(
            Arc::new(transport.clone()),
            Arc::new(JsonFormResponseParser),
            Config::new().with_m3_url("https://m3.example.com"),
        )
    }

    fn logon_ok() -> HttpResponse {
        HttpResponse::new(200, r#"{"sessionId":"s-1","principalUser":"MVXUSR","result":0}"#)
    }

    #[tokio::test]
    async fn test_execute_logs_on_first() {
        let transport = MockTransport::new();
        transport.push_response(logon_ok()).await;
        transport
            .push_response(HttpResponse::new(200, r#"{"sessionId":"s-1","result":1}"#))
            .await;

        let broker = broker(&transport);
        let response = broker
            .execute(FormRequest::command("RUN").with_value("MMS001"))
            .await
            .unwrap();

        assert_eq!(response.result, 1);
        assert_eq!(broker.state().await, SessionState::Active);
        assert_eq!(broker.session_id().await.as_deref(), Some("s-1"));

        let requests = transport.requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body.as_deref(), Some("CMDTP=LOGON"));
        assert!(requests[1].body.as_deref().unwrap().contains("SID=s-1"));
    }

    #[tokio::test]
    async fn test_login_rejected_by_result_code() {
        let transport = MockTransport::new();
        transport
            .push_response(HttpResponse::new(200, r#"{"result":-8}"#))
            .await;

        let broker = broker(&transport);
        let result = broker.execute(FormRequest::command("RUN")).await;

        match result {
            Err(OdinError::SessionLoginFailed(m)) => assert!(m.contains("-8")),
            other => panic!("expected SessionLoginFailed, got {other:?}"),
        }
        assert_eq!(broker.state().await, SessionState::NoSession);
    }

    #[tokio::test]
    async fn test_login_when_active_returns_cached_response() {
        let transport = MockTransport::new();
        transport.push_response(logon_ok()).await;

        let broker = broker(&transport);
        broker.login().await.unwrap();
        let again = broker.login().await.unwrap();

        assert_eq!(again.session_id.as_deref(), Some("s-1"));
        // Only one LOGON ever hit the wire.
        assert_eq!(transport.request_count().await, 1);
    }

    #[tokio::test]
    async fn test_logoff_resets_state_even_on_quit_failure() {
        let transport = MockTransport::new();
        transport.push_response(logon_ok()).await;
        transport.fail_next("connection reset").await;

        let broker = broker(&transport);
        broker.login().await.unwrap();

        let result = broker.logoff().await;
        assert!(result.is_err());
        assert_eq!(broker.state().await, SessionState::NoSession);
        assert!(broker.session_id().await.is_none());
    }

    #[tokio::test]
    async fn test_logoff_without_session_is_a_noop() {
        let transport = MockTransport::new();
        let broker = broker(&transport);

        broker.logoff().await.unwrap();
        assert_eq!(transport.request_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_m3_url_is_a_configuration_error() {
        let broker = SessionBroker::new(
            Arc::new(MockTransport::new()),
            Arc::new(JsonFormResponseParser),
            Config::new(),
        );

        let result = broker.execute(FormRequest::command("RUN")).await;
        match result {
            Err(OdinError::SessionLoginFailed(m)) => {
                assert!(m.contains("no M3 URL configured"))
            }
            other => panic!("expected login failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_application_error_after_login_is_isolated() {
        let transport = MockTransport::new();
        transport.push_response(logon_ok()).await;
        transport
            .push_response(HttpResponse::new(200, r#"{"result":-3}"#))
            .await;
        transport
            .push_response(HttpResponse::new(200, r#"{"result":0}"#))
            .await;

        let broker = broker(&transport);
        broker.login().await.unwrap();

        let failed = broker.execute(FormRequest::command("RUN")).await;
        assert!(matches!(
            failed,
            Err(OdinError::Application { code: -3, .. })
        ));

        // Broker state is untouched; the next command succeeds.
        assert_eq!(broker.state().await, SessionState::Active);
        broker.execute(FormRequest::command("RUN")).await.unwrap();
    }

    #[tokio::test]
    async fn test_environment_context_source() {
        let transport = MockTransport::new();
        transport
            .push_response(HttpResponse::new(
                200,
                r#"{"sessionId":"s-1","userContext":{"ionApiUrl":"https://ionapi.example.com"},"result":0}"#,
            ))
            .await;

        let broker = broker(&transport);
        let url = broker.ion_api_url().await.unwrap();
        assert_eq!(url, "https://ionapi.example.com");
    }
}
