//! Remote authentication endpoints.
//!
//! Handles email/password login, registration, magic links, token refresh
//! and logout against the storefront API.

use async_trait::async_trait;
use basket_core::{AccessToken, Email, RefreshToken};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use super::error::AuthError;
use super::types::{Session, User};

/// Registration form data.
#[derive(Debug, Clone)]
pub struct Registration {
    /// Account email.
    pub email: Email,
    /// Chosen password.
    pub password: SecretString,
    /// Display name.
    pub name: String,
}

/// The authentication endpoints the session store depends on.
///
/// [`HttpAuthApi`] is the production implementation; tests substitute
/// in-memory fakes.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`
    async fn login(&self, email: &Email, password: &SecretString) -> Result<Session, AuthError>;

    /// `POST /auth/register`
    async fn register(&self, registration: &Registration) -> Result<Session, AuthError>;

    /// `POST /auth/magic-link`
    async fn magic_link(&self, email: &Email) -> Result<(), AuthError>;

    /// `POST /auth/refresh`
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<Session, AuthError>;

    /// `POST /auth/logout`
    async fn logout(&self, access_token: Option<&AccessToken>) -> Result<(), AuthError>;
}

/// Request body for login.
#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Request body for registration.
#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
}

/// Request body for magic link.
#[derive(Serialize)]
struct MagicLinkRequest<'a> {
    email: &'a str,
}

/// Request body for refresh.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Successful response shared by login, register and refresh.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user: User,
    access_token: String,
    refresh_token: String,
    expires_at: i64,
}

impl From<SessionResponse> for Session {
    fn from(response: SessionResponse) -> Self {
        Self {
            user: response.user,
            access_token: AccessToken::new(response.access_token),
            refresh_token: RefreshToken::new(response.refresh_token),
            expires_at: response.expires_at,
        }
    }
}

/// Error body returned by the API.
#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP implementation of [`AuthApi`].
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpAuthApi {
    /// Create an API client. `base_url` must end with `/`.
    #[must_use]
    pub const fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        Ok(self.base_url.join(path)?)
    }

    /// Post `body` and decode a session from the response.
    async fn post_for_session<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
        fallback: &str,
    ) -> Result<Session, AuthError> {
        let response = self.client.post(self.endpoint(path)?).json(body).send().await?;

        if !response.status().is_success() {
            return Err(rejection(response, fallback).await);
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        Ok(session.into())
    }
}

/// Turn an unsuccessful response into a rejection carrying the server's
/// message, or `fallback` if the body has none.
async fn rejection(response: reqwest::Response, fallback: &str) -> AuthError {
    let body: Option<ErrorResponse> = response.json().await.ok();
    let message = body
        .and_then(|b| b.message.or(b.error))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    AuthError::rejected(message)
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    #[instrument(skip(self, password), fields(email = %email))]
    async fn login(&self, email: &Email, password: &SecretString) -> Result<Session, AuthError> {
        self.post_for_session(
            "auth/login",
            &LoginRequest {
                email: email.as_str(),
                password: password.expose_secret(),
            },
            "Login failed",
        )
        .await
    }

    #[instrument(skip(self, registration), fields(email = %registration.email))]
    async fn register(&self, registration: &Registration) -> Result<Session, AuthError> {
        self.post_for_session(
            "auth/register",
            &RegisterRequest {
                email: registration.email.as_str(),
                password: registration.password.expose_secret(),
                name: &registration.name,
            },
            "Registration failed",
        )
        .await
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn magic_link(&self, email: &Email) -> Result<(), AuthError> {
        let response = self
            .client
            .post(self.endpoint("auth/magic-link")?)
            .json(&MagicLinkRequest {
                email: email.as_str(),
            })
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejection(response, "Failed to send magic link").await)
        }
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &RefreshToken) -> Result<Session, AuthError> {
        self.post_for_session(
            "auth/refresh",
            &RefreshRequest {
                refresh_token: refresh_token.expose(),
            },
            "Refresh failed",
        )
        .await
    }

    #[instrument(skip_all)]
    async fn logout(&self, access_token: Option<&AccessToken>) -> Result<(), AuthError> {
        let mut request = self.client.post(self.endpoint("auth/logout")?);
        if let Some(token) = access_token {
            request = request.bearer_auth(token.expose());
        }

        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejection(response, "Logout failed").await)
        }
    }
}
