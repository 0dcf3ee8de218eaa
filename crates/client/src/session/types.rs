//! Session-related types.

use basket_core::{AccessToken, Email, RefreshToken, UserId, UserRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated user snapshot, as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// An authenticated session: who the user is and the credentials proving it.
///
/// Sessions are immutable; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user: User,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    /// Access token expiry as reported by the server.
    pub expires_at: i64,
}

impl Session {
    /// Whether the access token is expired, or will be within
    /// `buffer_seconds`, as read from the token's own `exp` claim.
    #[must_use]
    pub fn is_expired(&self, buffer_seconds: i64) -> bool {
        self.access_token
            .is_expired_at(Utc::now().timestamp(), buffer_seconds)
    }
}

/// Authentication state published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// The persisted session has not been resolved yet.
    #[default]
    Loading,
    /// No session.
    Anonymous,
    /// A session is held for this user.
    Authenticated(User),
}

impl AuthState {
    /// The signed-in user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Loading | Self::Anonymous => None,
        }
    }
}

/// Result of a refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No refresh token was held; nothing happened.
    Skipped,
    /// A new session replaced the old one.
    Refreshed,
    /// The refresh token was refused and the session was discarded.
    LoggedOut,
}

/// On-disk shape of the session collection's single record.
///
/// The structured store keys records by `id`, so the session is stored under
/// a fixed one.
#[derive(Serialize, Deserialize)]
pub(crate) struct SessionRecord {
    pub(crate) id: String,
    #[serde(flatten)]
    pub(crate) session: Session,
}

impl SessionRecord {
    pub(crate) const ID: &'static str = "current";

    pub(crate) fn new(session: Session) -> Self {
        Self {
            id: Self::ID.to_string(),
            session,
        }
    }
}
