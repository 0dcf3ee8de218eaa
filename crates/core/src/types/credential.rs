//! Bearer credential types.
//!
//! Tokens are serializable (the session must survive a restart) but their
//! `Debug` output is redacted so they never end up in logs.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Claims read from an access token's payload.
///
/// Only the claims the client cares about are decoded. The signature is
/// never verified: the client inspects its own token to schedule refreshes,
/// the server remains the authority.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    /// Expiry as a Unix timestamp (seconds).
    pub exp: Option<i64>,
    /// Subject, normally the user id.
    pub sub: Option<String>,
}

/// Short-lived JWT access credential, sent as `Authorization: Bearer`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the raw token, for building the authorization header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Decode the payload segment of the JWT.
    ///
    /// Returns `None` if the token is not a three-segment JWT or the payload
    /// is not base64url-encoded JSON.
    #[must_use]
    pub fn claims(&self) -> Option<TokenClaims> {
        let mut segments = self.0.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return None;
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Expiry claim (`exp`) as a Unix timestamp, if present and decodable.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.claims().and_then(|claims| claims.exp)
    }

    /// Whether the token is expired, or will be within `buffer_seconds` of
    /// `now` (Unix seconds).
    ///
    /// A token without a readable expiry is always considered expired.
    #[must_use]
    pub fn is_expired_at(&self, now: i64, buffer_seconds: i64) -> bool {
        self.expires_at()
            .is_none_or(|exp| now >= exp.saturating_sub(buffer_seconds))
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Long-lived refresh credential, exchanged for a new session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl RefreshToken {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Expose the raw token for the refresh request body.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token is blank (servers sometimes send `""`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RefreshToken([REDACTED])")
    }
}
