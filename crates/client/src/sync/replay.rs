//! Replaying queued operations against the API.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tracing::instrument;
use url::Url;

use super::queue::PendingOperation;

/// Why a replay failed.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Worth retrying later: the network is down or the server is struggling.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server refused the operation itself.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The operation can never be sent as recorded.
    #[error("invalid operation: {0}")]
    Invalid(String),
}

impl ReplayError {
    /// Classify a non-success response.
    #[must_use]
    pub fn from_status(status: StatusCode, message: String) -> Self {
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Self::Transient(format!("status {status}"))
        } else {
            Self::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }

    /// Whether the operation should stay queued untouched.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Sends one queued operation.
#[async_trait]
pub trait Replayer: Send + Sync {
    /// Re-issue `operation`.
    async fn replay(&self, operation: &PendingOperation) -> Result<(), ReplayError>;
}

/// Replays operations as plain HTTP requests under a base URL.
#[derive(Debug, Clone)]
pub struct HttpReplayer {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpReplayer {
    /// Create a replayer. `base_url` must end with `/`.
    #[must_use]
    pub const fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl Replayer for HttpReplayer {
    #[instrument(skip_all, fields(operation_id = %operation.id, endpoint = %operation.endpoint))]
    async fn replay(&self, operation: &PendingOperation) -> Result<(), ReplayError> {
        let method = Method::from_bytes(operation.method.as_bytes())
            .map_err(|_| ReplayError::Invalid(format!("unknown method {}", operation.method)))?;
        let url = self
            .base_url
            .join(operation.endpoint.trim_start_matches('/'))
            .map_err(|e| ReplayError::Invalid(e.to_string()))?;

        let response = self
            .client
            .request(method, url)
            .json(&operation.payload)
            .send()
            .await
            .map_err(|e| ReplayError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ReplayError::from_status(status, message))
        }
    }
}
