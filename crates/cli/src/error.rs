//! CLI error types and Sentry user context.

use basket_core::{EmailError, PriceError};
use thiserror::Error;

/// Invalid command-line input.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid email: {0}")]
    Email(#[from] EmailError),

    #[error("invalid price `{0}`")]
    Price(String),

    #[error(transparent)]
    NegativePrice(#[from] PriceError),

    #[error("invalid line item id `{0}`")]
    LineItemId(String),

    #[error("invalid variant `{0}`, expected `id:name:value`")]
    Variant(String),
}

/// Attach the signed-in user to subsequent Sentry events.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}
