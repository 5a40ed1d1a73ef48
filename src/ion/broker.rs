//! ION API context broker.
//!
//! Caches the gateway base URL and bearer token, serializes concurrent
//! context loads (the first waiter drives the load, everyone else shares its
//! outcome), and retries a rejected request exactly once with a forced
//! context refresh.

use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::ion::{EnvironmentContextSource, IonApiContext, IonRequest, OAUTH_PATH};
use crate::transport::{
    HttpRequest, HttpResponse, HttpTransport, ResponseType, HEADER_PLATFORM, HEADER_SOURCE,
    PLATFORM,
};
use crate::validation::validate_localhost_origin;
use crate::{OdinError, Result};

struct IonState {
    context: Option<IonApiContext>,
    /// Base URL resolved through the environment source; survives a failed
    /// token exchange so only the token call is repeated.
    resolved_url: Option<String>,
    waiters: Vec<oneshot::Sender<Result<IonApiContext>>>,
    dev_token: Option<String>,
}

/// Broker for the ION API bearer-token context.
///
/// # Concurrency
///
/// `get_context` is single-flight: a waiter list is kept under the internal
/// mutex, and only the caller that makes the list non-empty performs the
/// load. All waiters are settled together with the load's outcome.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use m3_odin::ion::{IonContextBroker, IonRequest};
/// use m3_odin::transport::mock::MockTransport;
/// use m3_odin::Config;
///
/// #[tokio::main]
/// async fn main() -> m3_odin::Result<()> {
///     let config = Config::new().with_ion_api_url("https://ionapi.example.com");
///     let broker = IonContextBroker::new(Arc::new(MockTransport::new()), config);
///
///     let response = broker.execute(IonRequest::get("M3/m3api-rest/csrf")).await?;
///     println!("status: {}", response.status);
///     Ok(())
/// }
/// ```
pub struct IonContextBroker {
    transport: Arc<dyn HttpTransport>,
    environment: Option<Arc<dyn EnvironmentContextSource>>,
    config: Config,
    state: Mutex<IonState>,
}

impl IonContextBroker {
    /// Creates a broker over the given transport.
    pub fn new(transport: Arc<dyn HttpTransport>, config: Config) -> Self {
        Self {
            transport,
            environment: None,
            config,
            state: Mutex::new(IonState {
                context: None,
                resolved_url: None,
                waiters: Vec::new(),
                dev_token: None,
            }),
        }
    }

    /// Attaches an environment source used to resolve the gateway URL when
    /// none is configured explicitly.
    pub fn with_environment_source(mut self, source: Arc<dyn EnvironmentContextSource>) -> Self {
        self.environment = Some(source);
        self
    }

    /// Installs a development token, bypassing network token resolution.
    ///
    /// Development tokens must never leave a developer's machine, so the
    /// caller's origin is required to be localhost.
    ///
    /// # Errors
    ///
    /// Returns [`OdinError::Configuration`] with
    /// `"Development tokens are only allowed for localhost"` for any other
    /// origin; a previously cached context is left untouched.
    pub async fn set_development_token(
        &self,
        token: impl Into<String>,
        origin: &str,
    ) -> Result<()> {
        validate_localhost_origin(origin)?;
        info!("using development token, skipping ION token resolution");
        self.state.lock().await.dev_token = Some(token.into());
        Ok(())
    }

    /// Returns the ION context, loading it if needed.
    ///
    /// With `refresh` false a cached context resolves immediately. Otherwise
    /// the caller joins the waiter queue; the load runs once and its outcome
    /// is shared by every waiter.
    ///
    /// # Errors
    ///
    /// - [`OdinError::Configuration`]: no URL configured and no environment
    ///   source attached
    /// - [`OdinError::AuthenticationFailed`]: the token exchange was rejected
    /// - [`OdinError::Transport`]: the exchange could not be reached
    pub async fn get_context(&self, refresh: bool) -> Result<IonApiContext> {
        let (rx, drive) = {
            let mut state = self.state.lock().await;

            if let Some(ref token) = state.dev_token {
                return Ok(IonApiContext {
                    url: self.config.ion_api_url.clone().unwrap_or_default(),
                    token: token.clone(),
                });
            }

            if !refresh {
                if let Some(ref context) = state.context {
                    return Ok(context.clone());
                }
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            (rx, state.waiters.len() == 1)
        };

        if drive {
            self.load_token(refresh).await;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(OdinError::AuthenticationFailed(
                "context load settled without a result".to_string(),
            )),
        }
    }

    /// Executes a request against the gateway.
    ///
    /// Injects the platform/source headers and the context's auth header. A
    /// rejected response (401, or the request's explicit retry flag) causes
    /// one forced context refresh and one reissue; the second response is
    /// returned to the caller either way.
    pub async fn execute(&self, request: IonRequest) -> Result<HttpResponse> {
        let context = self.get_context(false).await?;
        let response = self.dispatch(&request, &context).await?;

        if Self::can_retry(&request, &response) {
            debug!(url = %request.url, status = response.status, "ION request rejected, refreshing context and retrying once");
            let context = self.get_context(true).await?;
            return self.dispatch(&request, &context).await;
        }

        Ok(response)
    }

    fn can_retry(request: &IonRequest, response: &HttpResponse) -> bool {
        !response.ok() && request.can_retry.unwrap_or(response.status == 401)
    }

    async fn dispatch(
        &self,
        request: &IonRequest,
        context: &IonApiContext,
    ) -> Result<HttpResponse> {
        let url = if context.url.is_empty() {
            request.url.clone()
        } else {
            format!(
                "{}/{}",
                context.url.trim_end_matches('/'),
                request.url.trim_start_matches('/')
            )
        };

        let (auth_name, auth_value) = context.auth_header();
        let source = request.source.as_deref().unwrap_or(&self.config.source);
        let mut http = HttpRequest {
            method: request.method,
            url,
            headers: request.headers.clone(),
            body: request.body.clone(),
            response_type: request.response_type,
        };
        http.headers.push((HEADER_PLATFORM.to_string(), PLATFORM.to_string()));
        http.headers.push((
            HEADER_SOURCE.to_string(),
            format!("{PLATFORM}-{source}"),
        ));
        http.headers.push((auth_name, auth_value));

        self.transport.execute(http).await
    }

    /// Performs the URL resolution + token exchange and settles all waiters.
    async fn load_token(&self, force_url_refresh: bool) {
        let outcome = self.try_load(force_url_refresh).await;

        let mut state = self.state.lock().await;
        let waiters = std::mem::take(&mut state.waiters);
        match outcome {
            Ok(context) => {
                state.context = Some(context.clone());
                drop(state);
                info!(waiters = waiters.len(), "ION context loaded");
                for waiter in waiters {
                    let _ = waiter.send(Ok(context.clone()));
                }
            }
            Err(e) => {
                state.context = None;
                drop(state);
                warn!(err = %e, waiters = waiters.len(), "ION context load failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone_shape()));
                }
            }
        }
    }

    async fn try_load(&self, force_url_refresh: bool) -> Result<IonApiContext> {
        let url = self.resolve_url(force_url_refresh).await?;

        let rid = Uuid::new_v4();
        let token_url = format!("{url}{OAUTH_PATH}?rid={rid}");
        debug!(url = %token_url, "exchanging session for ION bearer token");

        let response = self
            .transport
            .execute(HttpRequest::get(&token_url).with_response_type(ResponseType::Text))
            .await?;

        if response.status == 401 {
            return Err(OdinError::AuthenticationFailed(
                "ION token exchange rejected (401)".to_string(),
            ));
        }
        if !response.ok() {
            return Err(OdinError::transport(
                "token exchange",
                token_url,
                Some(response.status),
                "ION token exchange returned a non-success status",
            ));
        }

        let token = response.body.trim().to_string();
        if token.is_empty() {
            return Err(OdinError::AuthenticationFailed(
                "ION token exchange returned an empty token".to_string(),
            ));
        }

        Ok(IonApiContext { url, token })
    }

    /// Resolves the gateway base URL: explicit config wins, else the cached
    /// environment answer, else the environment source is asked (and the
    /// answer cached). A resolution failure leaves nothing cached so the next
    /// load retries resolution too.
    async fn resolve_url(&self, force_refresh: bool) -> Result<String> {
        if let Some(ref url) = self.config.ion_api_url {
            return Ok(url.clone());
        }

        if !force_refresh {
            if let Some(url) = self.state.lock().await.resolved_url.clone() {
                return Ok(url);
            }
        }

        let source = self.environment.as_ref().ok_or_else(|| {
            OdinError::Configuration(
                "no ION API URL configured and no environment source attached".to_string(),
            )
        })?;

        match source.ion_api_url().await {
            Ok(url) => {
                self.state.lock().await.resolved_url = Some(url.clone());
                Ok(url)
            }
            Err(e) => {
                self.state.lock().await.resolved_url = None;
                Err(e)
            }
        }
    }
}
