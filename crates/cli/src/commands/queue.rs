//! Offline queue commands.

use basket_client::ClientContext;

/// Log the queued operations in replay order.
pub async fn list(ctx: &ClientContext) -> Result<(), Box<dyn std::error::Error>> {
    let pending = ctx.sync().pending().await?;
    if pending.is_empty() {
        tracing::info!("Offline queue is empty");
        return Ok(());
    }

    for op in &pending {
        tracing::info!(
            id = %op.id,
            seq = op.seq,
            attempts = op.attempts,
            created_at = %op.created_at,
            "{} {}",
            op.method,
            op.endpoint
        );
    }
    tracing::info!("{} operation(s) queued", pending.len());
    Ok(())
}

/// Replay the queue now.
pub async fn drain(ctx: &ClientContext) -> Result<(), Box<dyn std::error::Error>> {
    let report = ctx.sync().request_sync().await?;
    tracing::info!(
        replayed = report.replayed,
        dead_lettered = report.dead_lettered,
        remaining = report.remaining,
        "Drain finished"
    );
    if report.halted {
        tracing::warn!("Drain stopped early, operations remain queued");
    }
    Ok(())
}
