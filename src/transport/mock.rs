//! Mock transport for testing.
//!
//! Provides a scripted in-memory [`HttpTransport`] with request recording and
//! error injection, for testing broker behavior without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::{OdinError, Result};

/// One scripted outcome for [`MockTransport`].
enum Scripted {
    Respond {
        response: HttpResponse,
        delay: Option<Duration>,
    },
    Fail(String),
}

/// Mock transport for testing.
///
/// Responses are served from a FIFO script; every executed request is
/// recorded so tests can assert on dispatch order and count. Cloning is
/// cheap and clones share the same script and recording.
///
/// # Example
///
/// ```
/// use m3_odin::transport::mock::MockTransport;
/// use m3_odin::transport::{HttpRequest, HttpResponse, HttpTransport};
///
/// #[tokio::main]
/// async fn main() -> m3_odin::Result<()> {
///     let transport = MockTransport::new();
///     transport.push_response(HttpResponse::new(200, "pong")).await;
///
///     let response = transport.execute(HttpRequest::get("/ping")).await?;
///     assert_eq!(response.body, "pong");
///     assert_eq!(transport.request_count().await, 1);
///
///     Ok(())
/// }
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    /// Creates a mock transport with an empty script.
    ///
    /// With no scripted outcome queued, every request gets a `200` with an
    /// empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response to serve for the next unmatched request.
    pub async fn push_response(&self, response: HttpResponse) {
        self.script.lock().await.push_back(Scripted::Respond {
            response,
            delay: None,
        });
    }

    /// Queues a response that stays in flight for `delay` before resolving.
    ///
    /// Used to hold a shared acquisition (login, token load) open while
    /// concurrent callers pile up behind it.
    pub async fn push_response_delayed(&self, response: HttpResponse, delay: Duration) {
        self.script.lock().await.push_back(Scripted::Respond {
            response,
            delay: Some(delay),
        });
    }

    /// Queues a bare status response with an empty body.
    pub async fn push_status(&self, status: u16) {
        self.push_response(HttpResponse::new(status, "")).await;
    }

    /// Queues a transport-level failure (no response received).
    pub async fn fail_next(&self, message: impl Into<String>) {
        self.script.lock().await.push_back(Scripted::Fail(message.into()));
    }

    /// Returns copies of every request executed so far, in dispatch order.
    pub async fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().await.clone()
    }

    /// Returns the number of requests executed so far.
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Returns the requests whose URL contains the given fragment.
    pub async fn requests_matching(&self, fragment: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.url.contains(fragment))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().await.push(request);

        let outcome = self.script.lock().await.pop_front();
        match outcome {
            Some(Scripted::Respond { response, delay }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            Some(Scripted::Fail(message)) => {
                Err(OdinError::transport("execute", url, None, message))
            }
            None => Ok(HttpResponse::new(200, "")),
        }
    }
}
