//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::session::AuthError;
use crate::sync::SyncError;

/// Any error surfaced by the client layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Login, registration or another auth call failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// An API request failed.
    #[error("API error: {0}")]
    Fetch(#[from] FetchError),

    /// The offline queue could not take or replay work.
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// A payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;
