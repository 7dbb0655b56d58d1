//! Session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subscription tier attached to a user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TierInfo {
    pub name: String,
    #[serde(default)]
    pub daily_message_limit: Option<u32>,
}

/// The authenticated user's identity.
///
/// `id` is copied into per-user storage namespacing, so it must be stable
/// across logins for the same account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub tier: TierInfo,
}

/// The single authenticated identity/token state for the running process.
///
/// Exactly one live `Session` exists at a time, owned by
/// [`super::AuthManager`]; every other component reads it through the
/// manager's API and never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: UserRef,
    pub token: String,
    pub token_expiry: DateTime<Utc>,
    pub last_validated_at: DateTime<Utc>,
}

impl Session {
    /// Whether the token expiry has passed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.token_expiry
    }
}

/// Login/signup credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// State transitions published to session subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    /// A fresh login or signup succeeded.
    LoggedIn,
    /// The session was cleared (logout or credential rejection).
    LoggedOut,
    /// A persisted session was restored at startup.
    Restored,
    /// The token expired and the session was cleared on read.
    Expired,
}
