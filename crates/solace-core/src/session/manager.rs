//! Session lifecycle manager.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock, broadcast};

use crate::error::{Result, SolaceError};
use crate::gateway::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::session::model::{AuthEvent, Credentials, Session, UserRef};
use crate::store::{KeyValueStore, read_json, write_json};

/// Global store key holding the persisted session (token included).
/// This is the single durable token location; there is no memory-only
/// variant.
pub const SESSION_KEY: &str = "auth_session";

/// Attempts for login/signup requests, which cannot go through the gateway
/// (no bearer token exists yet) and so carry their own bounded retry.
const AUTH_RETRY_ATTEMPTS: u32 = 3;

/// Fixed delay between auth attempts.
const AUTH_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(250);

/// Owns the process-wide authentication session.
///
/// `AuthManager` is an injected service object, passed by reference to
/// dependents. It is the only component allowed to mutate the session;
/// everyone else reads through [`AuthManager::current_token`] and
/// [`AuthManager::is_authenticated`] and must tolerate the token disappearing
/// between calls (expiry is enforced on read).
pub struct AuthManager {
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn HttpTransport>,
    session: RwLock<Option<Session>>,
    /// Guards initialization so concurrent callers coalesce into a single
    /// restore + validation pass.
    init_done: Mutex<bool>,
    events: broadcast::Sender<AuthEvent>,
}

/// Wire shape of `/login` and `/signup` responses.
#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    user: UserRef,
}

fn default_expires_in() -> i64 {
    3600
}

impl AuthManager {
    /// Creates a manager over the given durable store and transport.
    pub fn new(store: Arc<dyn KeyValueStore>, transport: Arc<dyn HttpTransport>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            store,
            transport,
            session: RwLock::new(None),
            init_done: Mutex::new(false),
            events,
        }
    }

    /// Subscribes to session state transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Restores and validates a persisted session.
    ///
    /// Behavior:
    /// - No persisted session: resolves unauthenticated.
    /// - Persisted but expired: credentials are cleared, unauthenticated.
    /// - Validation succeeds against `/user/profile`: session refreshed.
    /// - Validation rejected (401): credentials cleared, unauthenticated.
    /// - Validation unreachable (network): the cached session is kept as a
    ///   degraded offline-authenticated mode.
    ///
    /// Concurrent callers share a single in-flight initialization; duplicates
    /// await the same pass and exactly one validation request is issued.
    ///
    /// # Errors
    ///
    /// Returns an error only for durable-store failures.
    pub async fn initialize(&self) -> Result<Option<Session>> {
        let mut done = self.init_done.lock().await;
        if *done {
            return Ok(self.session.read().await.clone());
        }

        let result = self.restore().await;
        if result.is_ok() {
            *done = true;
        }
        result
    }

    async fn restore(&self) -> Result<Option<Session>> {
        let Some(mut session) = read_json::<Session>(self.store.as_ref(), SESSION_KEY).await?
        else {
            return Ok(None);
        };

        if session.is_expired() {
            tracing::info!("persisted session expired, clearing");
            self.store.remove(SESSION_KEY).await?;
            return Ok(None);
        }

        match self.fetch_profile(&session.token).await {
            Ok(user) => {
                session.user = user;
                session.last_validated_at = Utc::now();
                write_json(self.store.as_ref(), SESSION_KEY, &session).await?;
            }
            Err(err) if err.is_auth_expired() => {
                tracing::info!("persisted token rejected by backend, clearing");
                self.store.remove(SESSION_KEY).await?;
                return Ok(None);
            }
            Err(err) if err.is_network() => {
                // Offline-authenticated mode: keep the cached user rather
                // than forcing a logout over a transient failure.
                tracing::warn!(error = %err, "session validation unreachable, restoring from cache");
            }
            Err(err) => return Err(err),
        }

        *self.session.write().await = Some(session.clone());
        let _ = self.events.send(AuthEvent::Restored);
        Ok(Some(session))
    }

    /// Logs in with email/password credentials.
    ///
    /// Any prior session is cleared first, so a failed login never leaves
    /// mixed-session state behind.
    ///
    /// # Errors
    ///
    /// `Auth` for rejected credentials, `Network` when the backend is
    /// unreachable, `Storage` when the session cannot be persisted.
    pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
        self.clear_session(None).await;
        self.authenticate("/login", credentials).await
    }

    /// Creates a new account and logs in. Same semantics as [`Self::login`].
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Session> {
        self.clear_session(None).await;
        self.authenticate("/signup", credentials).await
    }

    async fn authenticate(&self, endpoint: &str, credentials: &Credentials) -> Result<Session> {
        let request = HttpRequest::new(Method::Post, endpoint)
            .with_body(serde_json::to_value(credentials)?);

        let response = self.send_with_retry(request).await?;

        if !response.is_success() {
            if response.status >= 500 {
                return Err(SolaceError::network(response.error_message()));
            }
            return Err(SolaceError::auth(response.error_message()));
        }

        let auth: AuthResponse = serde_json::from_value(response.body)?;
        let now = Utc::now();
        let session = Session {
            user: auth.user,
            token: auth.token,
            token_expiry: now + Duration::seconds(auth.expires_in),
            last_validated_at: now,
        };

        write_json(self.store.as_ref(), SESSION_KEY, &session).await?;
        *self.session.write().await = Some(session.clone());

        tracing::info!(user_id = %session.user.id, "logged in");
        let _ = self.events.send(AuthEvent::LoggedIn);
        Ok(session)
    }

    /// Sends an auth request, retrying transport failures and 5xx responses
    /// up to [`AUTH_RETRY_ATTEMPTS`] with a fixed delay. The final outcome is
    /// returned as-is; response-status handling stays with the caller.
    async fn send_with_retry(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut attempt = 1;
        loop {
            match self.transport.send(request.clone()).await {
                Ok(response) if response.status >= 500 && attempt < AUTH_RETRY_ATTEMPTS => {
                    tracing::debug!(status = response.status, attempt, "auth request failed, retrying");
                }
                Ok(response) => return Ok(response),
                Err(err) if attempt < AUTH_RETRY_ATTEMPTS => {
                    tracing::debug!(error = %err, attempt, "auth request failed, retrying");
                }
                Err(err) => return Err(SolaceError::network(err.to_string())),
            }
            attempt += 1;
            tokio::time::sleep(AUTH_RETRY_DELAY).await;
        }
    }

    /// Logs out.
    ///
    /// The backend is notified best-effort; local state is always cleared and
    /// subscribers notified. Safe to call repeatedly.
    pub async fn logout(&self) {
        let token = {
            let guard = self.session.read().await;
            guard.as_ref().map(|s| s.token.clone())
        };

        if let Some(token) = token {
            let request = HttpRequest::new(Method::Post, "/logout").with_bearer(&token);
            if let Err(err) = self.transport.send(request).await {
                tracing::debug!(error = %err, "logout notification failed");
            }
        }

        self.clear_session(Some(AuthEvent::LoggedOut)).await;
    }

    /// Returns the current bearer token.
    ///
    /// Read-triggered side effect: if the token expiry has passed, the
    /// session is cleared, subscribers see [`AuthEvent::Expired`], and `None`
    /// is returned. Callers must tolerate the token disappearing between two
    /// calls.
    pub async fn current_token(&self) -> Option<String> {
        {
            let guard = self.session.read().await;
            match guard.as_ref() {
                None => return None,
                Some(session) if !session.is_expired() => return Some(session.token.clone()),
                Some(_) => {}
            }
        }

        tracing::info!("session token expired on read, clearing");
        self.clear_session(Some(AuthEvent::Expired)).await;
        None
    }

    /// Whether a live, unexpired session exists.
    pub async fn is_authenticated(&self) -> bool {
        let guard = self.session.read().await;
        guard.as_ref().is_some_and(|s| !s.is_expired())
    }

    /// The current user, if authenticated.
    pub async fn current_user(&self) -> Option<UserRef> {
        let guard = self.session.read().await;
        guard
            .as_ref()
            .filter(|s| !s.is_expired())
            .map(|s| s.user.clone())
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserRef> {
        let request = HttpRequest::new(Method::Get, "/user/profile").with_bearer(token);

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|err| SolaceError::network(err.to_string()))?;

        match response.status {
            status if response.is_success() => {
                let value = response
                    .body
                    .get("user")
                    .cloned()
                    .unwrap_or(response.body.clone());
                serde_json::from_value(value).map_err(|err| {
                    tracing::warn!(status, error = %err, "malformed profile response");
                    err.into()
                })
            }
            401 => Err(SolaceError::AuthExpired),
            status if status >= 500 => Err(SolaceError::network(response.error_message())),
            status => Err(SolaceError::validation(status, response.error_message())),
        }
    }

    /// Clears session state everywhere. Storage failures during clear are
    /// logged, not surfaced; clearing must never throw.
    async fn clear_session(&self, event: Option<AuthEvent>) {
        *self.session.write().await = None;
        if let Err(err) = self.store.remove(SESSION_KEY).await {
            tracing::warn!(error = %err, "failed to remove persisted session");
        }
        if let Some(event) = event {
            let _ = self.events.send(event);
        }
    }
}
