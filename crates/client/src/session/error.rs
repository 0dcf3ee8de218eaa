//! Authentication error types.

use thiserror::Error;

/// Errors returned by authentication operations.
///
/// These are values, never panics: a failed login leaves the current session
/// untouched and hands the server's message back to the caller.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server refused the request (bad credentials, expired refresh
    /// token, validation failure). Displays the server-supplied message.
    #[error("{message}")]
    Rejected {
        /// Human-readable message, suitable for showing inline.
        message: String,
    },

    /// The request never completed.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a body we could not understand.
    #[error("invalid response from auth server: {0}")]
    InvalidResponse(String),

    /// Endpoint URL could not be built from the configured base.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl AuthError {
    /// Build a rejection from a message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Whether the failure was a refusal by the server, as opposed to a
    /// transport or protocol problem.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
