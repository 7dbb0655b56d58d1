//! Generic HTTP request executor.
//!
//! Every backend call goes through [`RequestGateway`]: it attaches the bearer
//! token from the session manager, retries network-classified failures with
//! exponential backoff, clears the session on 401, and hands finally-failed
//! mutations to the offline queue. Each request is driven through an explicit
//! state machine so timeout and backoff behavior is testable without real
//! timers.

pub mod stream;
mod transport;

pub use transport::{
    DEFAULT_TIMEOUT, HttpRequest, HttpResponse, HttpTransport, Method, TransportError,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Result, SolaceError};
use crate::queue::{OfflineQueue, Priority, QueueItem};
use crate::session::AuthManager;

/// Endpoints that are never enqueued for later delivery.
const NEVER_QUEUED: [&str; 3] = ["/login", "/signup", "/health"];

/// Endpoints where a 401 means "bad credentials", not "session expired".
const AUTH_ENDPOINTS: [&str; 2] = ["/login", "/signup"];

/// Retry and timeout parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub base_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Per-attempt timeout enforced by the transport.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Timer seam so backoff waits can be observed instead of slept in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-request lifecycle. A request always terminates in `Succeeded`,
/// `Queued` or `Failed`.
enum RequestState {
    Attempting { attempt: u32 },
    BackoffWait { next_attempt: u32, delay: Duration },
    Succeeded(Box<HttpResponse>),
    Queued,
    Failed(SolaceError),
}

/// HTTP request executor with retry, backoff and offline queueing.
pub struct RequestGateway {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<AuthManager>,
    queue: Arc<OfflineQueue>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<AuthManager>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        Self {
            transport,
            auth,
            queue,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Executes a request at normal priority.
    ///
    /// On success returns the response body. A mutating request that
    /// exhausts its retries against a network-classified failure is placed in
    /// the offline queue and still returns `Err(Network)`: the caller is told
    /// "accepted for later delivery", not "succeeded".
    ///
    /// # Errors
    ///
    /// `Network` after exhausted retries, `AuthExpired` on 401 outside the
    /// auth endpoints, `Validation` for other 4xx, `Storage` when the queue
    /// write fails.
    pub async fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
    ) -> Result<Value> {
        self.execute(endpoint, method, body, Priority::Normal, true)
            .await
    }

    /// Same as [`Self::request`] with an explicit queue priority band.
    pub async fn request_prioritized(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        priority: Priority,
    ) -> Result<Value> {
        self.execute(endpoint, method, body, priority, true).await
    }

    /// Replays a queued item. Never re-enqueues: a failed replay is the
    /// queue's business to keep or drop.
    pub async fn replay(&self, item: &QueueItem) -> Result<Value> {
        self.execute(
            &item.endpoint,
            item.method,
            item.payload.clone(),
            item.priority,
            false,
        )
        .await
    }

    /// Hands a push-notification token to the backend. Queued on failure
    /// like any other mutation.
    pub async fn register_push_token(&self, token: &str) -> Result<()> {
        self.execute(
            "/notifications/register",
            Method::Post,
            Some(json!({ "token": token })),
            Priority::Low,
            true,
        )
        .await
        .map(|_| ())
    }

    async fn execute(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        priority: Priority,
        queue_on_failure: bool,
    ) -> Result<Value> {
        let mut request = HttpRequest::new(method, endpoint);
        request.timeout = self.policy.request_timeout;
        if let Some(body) = body.clone() {
            request = request.with_body(body);
        }
        if let Some(token) = self.auth.current_token().await {
            request = request.with_bearer(&token);
        }

        let mut state = RequestState::Attempting { attempt: 1 };
        loop {
            state = match state {
                RequestState::Attempting { attempt } => match self
                    .transport
                    .send(request.clone())
                    .await
                {
                    Ok(response) if response.is_success() => {
                        RequestState::Succeeded(Box::new(response))
                    }
                    Ok(response)
                        if response.status == 401 && !AUTH_ENDPOINTS.contains(&endpoint) =>
                    {
                        tracing::warn!(endpoint, "401 response, clearing session");
                        self.auth.logout().await;
                        RequestState::Failed(SolaceError::AuthExpired)
                    }
                    Ok(response) if response.status < 500 => RequestState::Failed(
                        SolaceError::validation(response.status, response.error_message()),
                    ),
                    Ok(response) => self.after_network_failure(
                        attempt,
                        SolaceError::network(response.error_message()),
                        endpoint,
                        method,
                        queue_on_failure,
                    ),
                    Err(err) => self.after_network_failure(
                        attempt,
                        SolaceError::network(err.to_string()),
                        endpoint,
                        method,
                        queue_on_failure,
                    ),
                },
                RequestState::BackoffWait {
                    next_attempt,
                    delay,
                } => {
                    self.sleeper.sleep(delay).await;
                    RequestState::Attempting {
                        attempt: next_attempt,
                    }
                }
                RequestState::Succeeded(response) => return Ok(response.body),
                RequestState::Queued => {
                    self.queue.enqueue(endpoint, method, body, priority).await?;
                    return Err(SolaceError::network("request queued for later delivery"));
                }
                RequestState::Failed(err) => return Err(err),
            };
        }
    }

    /// Decides the next state after a network-classified failure.
    fn after_network_failure(
        &self,
        attempt: u32,
        err: SolaceError,
        endpoint: &str,
        method: Method,
        queue_on_failure: bool,
    ) -> RequestState {
        if attempt < self.policy.max_attempts {
            let delay = self.backoff_delay(attempt);
            tracing::warn!(endpoint, attempt, delay_ms = delay.as_millis() as u64, error = %err, "network failure, backing off");
            return RequestState::BackoffWait {
                next_attempt: attempt + 1,
                delay,
            };
        }

        if queue_on_failure && method.is_mutating() && !NEVER_QUEUED.contains(&endpoint) {
            tracing::warn!(endpoint, attempt, "retries exhausted, queueing mutation");
            RequestState::Queued
        } else {
            tracing::warn!(endpoint, attempt, error = %err, "retries exhausted");
            RequestState::Failed(err)
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.policy
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.policy.max_delay)
    }
}
