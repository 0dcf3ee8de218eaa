//! Integration tests for credential handling on API calls.

#![allow(clippy::unwrap_used)]

use basket_client::ClientContext;
use basket_client::cart::CartCommand;
use basket_client::error::ClientError;
use basket_client::fetch::{AuthMode, FetchError};
use basket_client::session::AuthState;
use basket_core::Email;
use basket_integration_tests::{MockApi, PASSWORD};
use reqwest::{Method, StatusCode};
use secrecy::SecretString;
use serde_json::Value;

async fn signed_in(api: &MockApi, dir: &std::path::Path) -> ClientContext {
    let ctx = ClientContext::start(api.config(dir)).await.unwrap();
    ctx.session()
        .login(
            &Email::parse("shopper@example.com").unwrap(),
            &SecretString::from(PASSWORD.to_string()),
        )
        .await
        .unwrap();
    ctx
}

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = signed_in(&api, dir.path()).await;

    let me: Value = ctx
        .api()
        .send_json(Method::GET, "/me", None::<&()>, AuthMode::Required)
        .await
        .unwrap();
    assert_eq!(me["id"], "user-1");

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_required_auth_without_session_fails_before_sending() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = ClientContext::start(api.config(dir.path())).await.unwrap();

    let err = ctx
        .api()
        .send(Method::GET, "/me", None::<&()>, AuthMode::Required)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Unauthenticated));

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_revoked_token_yields_unauthorized() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = signed_in(&api, dir.path()).await;

    api.revoke_tokens();
    let err = ctx
        .api()
        .send(Method::GET, "/me", None::<&()>, AuthMode::Required)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Unauthorized));
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert!(!err.is_offline());
    // Refreshed once, not retried.
    assert_eq!(api.refresh_calls(), 1);
    assert!(ctx.session().is_authenticated());

    let me: Value = ctx
        .api()
        .send_json(Method::GET, "/me", None::<&()>, AuthMode::Required)
        .await
        .unwrap();
    assert_eq!(me["id"], "user-1");
    assert_eq!(api.refresh_calls(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_revoked_token_on_cart_push_refreshes_session() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = signed_in(&api, dir.path()).await;

    api.revoke_tokens();
    let err = ctx.cart_sync().push(&CartCommand::Clear).await.unwrap_err();

    assert!(matches!(err, ClientError::Fetch(FetchError::Unauthorized)));
    assert_eq!(api.refresh_calls(), 1);
    assert!(ctx.session().is_authenticated());
    assert!(ctx.sync().pending().await.unwrap().is_empty());
    assert!(api.cart_commands().is_empty());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_refused_refresh_after_unauthorized_signs_out() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = signed_in(&api, dir.path()).await;

    api.revoke_tokens();
    api.reject_refresh();
    let err = ctx.cart_sync().push(&CartCommand::Clear).await.unwrap_err();

    assert!(matches!(err, ClientError::Fetch(FetchError::Unauthorized)));
    assert_eq!(api.refresh_calls(), 1);
    assert_eq!(ctx.session().state(), AuthState::Anonymous);
    assert!(ctx.session().current().await.is_none());

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_anonymous_unauthorized_does_not_refresh() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = ClientContext::start(api.config(dir.path())).await.unwrap();

    let err = ctx
        .api()
        .send(Method::GET, "/me", None::<&()>, AuthMode::Optional)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Unauthorized));
    assert_eq!(api.refresh_calls(), 0);

    ctx.shutdown().await;
}
