//! Authenticated API client.
//!
//! [`ApiClient`] wraps `reqwest` and attaches the current session's access
//! token as a bearer credential. Requests that require a session fail fast,
//! without touching the network, when none is held or its token has expired.
//!
//! A 401 on a request that carried a token is never retried, but it starts a
//! session refresh so the next request holds a fresh token, or no session
//! at all when the refresh is refused.

use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::session::SessionStore;

/// Whether a request needs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Fail with [`FetchError::Unauthenticated`] or
    /// [`FetchError::SessionExpired`] instead of sending anonymously.
    Required,
    /// Attach the credential when a valid one is held, otherwise send
    /// anonymously.
    Optional,
}

/// Errors from [`ApiClient`] requests.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No session is held.
    #[error("not authenticated")]
    Unauthenticated,

    /// The held access token has expired.
    #[error("session expired")]
    SessionExpired,

    /// The server refused the credential (401).
    #[error("unauthorized")]
    Unauthorized,

    /// Any other non-success response.
    #[error("request failed with status {status}: {message}")]
    Status { status: StatusCode, message: String },

    /// The request never completed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Whether the failure means the API was unreachable, as opposed to
    /// reachable but refusing.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        match self {
            Self::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            _ => false,
        }
    }

    /// HTTP status of the response, if one was received.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// HTTP client for the storefront API.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    session: SessionStore,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client. `base_url` must end with `/`.
    #[must_use]
    pub const fn new(client: reqwest::Client, base_url: Url, session: SessionStore) -> Self {
        Self {
            client,
            base_url,
            session,
        }
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an API path such as `/cart` or `cart` under the base URL.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::InvalidUrl` if the path cannot be joined.
    pub fn url(&self, path: &str) -> Result<Url, FetchError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    /// Send a request and return the successful response.
    ///
    /// # Errors
    ///
    /// See [`FetchError`]. Credential checks happen before the request is
    /// built; a 401 is never retried but refreshes the session before
    /// returning `FetchError::Unauthorized`.
    #[instrument(skip(self, body), fields(method = %method, path = %path))]
    pub async fn send<B: Serialize + Sync + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        mode: AuthMode,
    ) -> Result<reqwest::Response, FetchError> {
        let token = self.session.access_token().await;
        let expired = token.is_some() && self.session.is_expired(0).await;
        let token = match (token, mode) {
            (None, AuthMode::Required) => return Err(FetchError::Unauthenticated),
            (Some(_), AuthMode::Required) if expired => return Err(FetchError::SessionExpired),
            (Some(_), AuthMode::Optional) if expired => None,
            (token, _) => token,
        };

        let mut request = self.client.request(method, self.url(path)?);
        if let Some(token) = &token {
            request = request.bearer_auth(token.expose());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), authenticated = token.is_some(), "API response");

        if status == StatusCode::UNAUTHORIZED {
            warn!("API refused credential");
            if token.is_some() {
                let outcome = self.session.refresh().await;
                debug!(?outcome, "Session refreshed after refused credential");
            }
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, message });
        }
        Ok(response)
    }

    /// Send a request and decode a JSON response body.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus `FetchError::Network` when the body is
    /// not valid JSON for `T`.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        mode: AuthMode,
    ) -> Result<T, FetchError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        Ok(self.send(method, path, body, mode).await?.json().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::persistence::Persistence;
    use crate::session::tests::FakeAuthApi;

    async fn client(signed_in_ttl: Option<i64>) -> ApiClient {
        let session = SessionStore::new(Arc::new(FakeAuthApi::default()), Persistence::in_memory());
        session.initialize(60).await;
        if let Some(ttl) = signed_in_ttl {
            session.replace(crate::session::tests::session(ttl, "r")).await;
        }
        // Port 9 (discard) on localhost: nothing listens, so any request that
        // does go out fails with a connection error.
        ApiClient::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9/api/").unwrap(),
            session,
        )
    }

    #[tokio::test]
    async fn test_required_without_session() {
        let api = client(None).await;
        let err = api
            .send::<Value>(Method::GET, "/orders", None, AuthMode::Required)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unauthenticated));
        assert!(!err.is_offline());
    }

    #[tokio::test]
    async fn test_required_with_expired_token() {
        let api = client(Some(-30)).await;
        let err = api
            .send::<Value>(Method::GET, "/orders", None, AuthMode::Required)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SessionExpired));
    }

    #[tokio::test]
    async fn test_optional_goes_to_network() {
        let api = client(None).await;
        let err = api
            .send::<Value>(Method::GET, "/products", None, AuthMode::Optional)
            .await
            .unwrap_err();
        assert!(err.is_offline(), "expected a connection failure, got {err}");
    }

    #[tokio::test]
    async fn test_path_resolution() {
        let api = client(None).await;
        assert_eq!(api.url("/cart").unwrap().as_str(), "http://127.0.0.1:9/api/cart");
        assert_eq!(api.url("auth/login").unwrap().as_str(), "http://127.0.0.1:9/api/auth/login");
    }
}
