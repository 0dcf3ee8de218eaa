//! Integration tests for the offline mutation queue.
//!
//! Operations recorded while the API is unreachable or failing must be
//! replayed exactly once, in the order they were recorded.

#![allow(clippy::unwrap_used)]

use basket_client::ClientContext;
use basket_client::cart::{CartCommand, SyncOutcome};
use basket_integration_tests::{MockApi, test_config, unreachable_api_url};
use serde_json::{Value, json};

fn labels(commands: &[Value]) -> Vec<&str> {
    commands
        .iter()
        .map(|c| c["label"].as_str().unwrap())
        .collect()
}

async fn enqueue(ctx: &ClientContext, action: &str, label: &str) {
    ctx.sync()
        .enqueue("POST", "/cart", json!({ "action": action, "label": label }))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_api_queues_and_persists() {
    let url = unreachable_api_url().await;
    let dir = tempfile::tempdir().unwrap();

    let ctx = ClientContext::start(test_config(&url, dir.path())).await.unwrap();
    let outcome = ctx.cart_sync().push(&CartCommand::Clear).await.unwrap();
    let SyncOutcome::Queued(id) = outcome else {
        panic!("expected the command to be queued, got {outcome:?}");
    };
    ctx.shutdown().await;

    let ctx = ClientContext::start(test_config(&url, dir.path())).await.unwrap();
    let pending = ctx.sync().pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(pending[0].method, "POST");
    assert_eq!(pending[0].endpoint, "/cart");
    assert_eq!(pending[0].payload["action"], "clear");

    // Still unreachable: the drain halts and keeps the operation.
    let report = ctx.sync().request_sync().await.unwrap();
    assert!(report.halted);
    assert_eq!(report.replayed, 0);
    assert_eq!(report.remaining, 1);
    ctx.shutdown().await;
}

#[tokio::test]
async fn test_replay_in_order_after_transient_failure() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let ctx = ClientContext::start(api.config(dir.path())).await.unwrap();

    enqueue(&ctx, "addItem", "A").await;
    enqueue(&ctx, "addItem", "B").await;
    enqueue(&ctx, "addItem", "C").await;

    api.set_cart_unavailable(true);
    let report = ctx.sync().request_sync().await.unwrap();
    assert!(report.halted);
    assert_eq!(report.remaining, 3);
    assert!(api.cart_commands().is_empty());

    api.set_cart_unavailable(false);
    let report = ctx.sync().request_sync().await.unwrap();
    assert!(!report.halted);
    assert_eq!(report.replayed, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(labels(&api.cart_commands()), vec!["A", "B", "C"]);

    // Nothing is replayed twice.
    let report = ctx.sync().request_sync().await.unwrap();
    assert_eq!(report.replayed, 0);
    assert_eq!(api.cart_commands().len(), 3);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_permanently_rejected_operation_is_dead_lettered() {
    let api = MockApi::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = api.config(dir.path());
    config.sync.max_attempts = 2;
    let ctx = ClientContext::start(config).await.unwrap();

    api.reject_cart_action("removeItem");
    enqueue(&ctx, "removeItem", "A").await;
    enqueue(&ctx, "addItem", "B").await;
    enqueue(&ctx, "addItem", "C").await;

    // First rejection counts an attempt and holds the line.
    let report = ctx.sync().request_sync().await.unwrap();
    assert!(report.halted);
    assert_eq!(report.remaining, 3);
    assert_eq!(ctx.sync().pending().await.unwrap()[0].attempts, 1);

    let report = ctx.sync().request_sync().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.replayed, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(labels(&api.cart_commands()), vec!["B", "C"]);

    ctx.shutdown().await;
}
