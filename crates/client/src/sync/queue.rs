//! Durable queue of mutations awaiting replay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use basket_core::OperationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::SyncError;
use super::replay::Replayer;
use crate::persistence::Persistence;

/// Collection of operations awaiting replay.
pub const PENDING_COLLECTION: &str = "pending";

/// Collection of operations given up on.
pub const DEAD_LETTER_COLLECTION: &str = "dead-letter";

/// A request recorded while offline, to be replayed later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: OperationId,
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// API path, e.g. `/cart`.
    pub endpoint: String,
    pub payload: Value,
    /// Position in creation order.
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    /// Permanent rejections so far.
    #[serde(default)]
    pub attempts: u32,
}

/// What a drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations replayed and removed.
    pub replayed: usize,
    /// Operations moved to the dead-letter collection.
    pub dead_lettered: usize,
    /// Operations still queued afterwards.
    pub remaining: usize,
    /// Whether the drain stopped at a failing operation.
    pub halted: bool,
}

/// The offline mutation queue.
///
/// Owns its own [`Persistence`] so that it never shares storage with the
/// foreground stores. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct OfflineQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    persistence: Persistence,
    max_attempts: u32,
    /// Serializes load-modify-save cycles on the pending collection.
    write: Mutex<()>,
    draining: AtomicBool,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("persistence", &self.inner.persistence)
            .field("max_attempts", &self.inner.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl OfflineQueue {
    /// Create a queue over `persistence`. Operations permanently rejected
    /// `max_attempts` times are dead-lettered.
    #[must_use]
    pub fn new(persistence: Persistence, max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                persistence,
                max_attempts: max_attempts.max(1),
                write: Mutex::new(()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Record an operation behind everything already queued.
    #[instrument(skip(self, payload))]
    pub async fn enqueue(&self, method: &str, endpoint: &str, payload: Value) -> PendingOperation {
        let _write = self.inner.write.lock().await;
        let mut pending = self.pending().await;

        let operation = PendingOperation {
            id: OperationId::generate(),
            method: method.to_ascii_uppercase(),
            endpoint: endpoint.to_string(),
            payload,
            seq: pending.last().map_or(1, |last| last.seq + 1),
            created_at: Utc::now(),
            attempts: 0,
        };
        pending.push(operation.clone());
        self.inner.persistence.save_records(PENDING_COLLECTION, &pending).await;

        info!(operation_id = %operation.id, seq = operation.seq, queued = pending.len(), "Operation queued for replay");
        operation
    }

    /// Queued operations in creation order.
    pub async fn pending(&self) -> Vec<PendingOperation> {
        let mut pending: Vec<PendingOperation> =
            self.inner.persistence.load_records(PENDING_COLLECTION).await;
        pending.sort_by(|a, b| a.seq.cmp(&b.seq).then(a.created_at.cmp(&b.created_at)));
        pending
    }

    /// Operations that were given up on.
    pub async fn dead_letters(&self) -> Vec<PendingOperation> {
        self.inner
            .persistence
            .load_records(DEAD_LETTER_COLLECTION)
            .await
    }

    /// Number of queued operations.
    pub async fn len(&self) -> usize {
        self.pending().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a drain is running.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Replay queued operations in creation order.
    ///
    /// Each success is removed and persisted before the next operation is
    /// tried. A transient failure stops the drain with the operation kept. A
    /// permanent rejection counts an attempt and stops the drain, unless the
    /// operation has now used up its attempts, in which case it is moved to
    /// the dead-letter collection and the drain moves on.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DrainInProgress` if another drain of this queue is
    /// running.
    #[instrument(skip(self, replayer))]
    pub async fn drain(&self, replayer: &dyn Replayer) -> Result<DrainReport, SyncError> {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress");
            return Err(SyncError::DrainInProgress);
        }
        let _guard = DrainGuard(&self.inner.draining);

        let mut report = DrainReport::default();
        let mut queue = self.pending().await;
        if queue.is_empty() {
            return Ok(report);
        }
        info!(queued = queue.len(), "Draining offline queue");

        while let Some(operation) = queue.first() {
            match replayer.replay(operation).await {
                Ok(()) => {
                    debug!(operation_id = %operation.id, seq = operation.seq, "Operation replayed");
                    let id = operation.id;
                    self.remove(id).await;
                    queue.remove(0);
                    report.replayed += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!(operation_id = %operation.id, error = %e, "Replay failed, will retry later");
                    report.halted = true;
                    break;
                }
                Err(e) => {
                    let id = operation.id;
                    let attempts = self.record_rejection(id).await;
                    if attempts >= self.inner.max_attempts {
                        error!(
                            operation_id = %id,
                            attempts,
                            error = %e,
                            "Operation permanently rejected, moving to dead letter"
                        );
                        self.dead_letter(id).await;
                        queue.remove(0);
                        report.dead_lettered += 1;
                    } else {
                        warn!(operation_id = %id, attempts, error = %e, "Replay rejected");
                        report.halted = true;
                        break;
                    }
                }
            }
        }

        report.remaining = self.len().await;
        info!(
            replayed = report.replayed,
            dead_lettered = report.dead_lettered,
            remaining = report.remaining,
            "Drain finished"
        );
        Ok(report)
    }

    async fn remove(&self, id: OperationId) {
        let _write = self.inner.write.lock().await;
        let mut pending = self.pending().await;
        pending.retain(|op| op.id != id);
        self.inner.persistence.save_records(PENDING_COLLECTION, &pending).await;
    }

    /// Bump the attempt count of `id`, returning the new count.
    async fn record_rejection(&self, id: OperationId) -> u32 {
        let _write = self.inner.write.lock().await;
        let mut pending = self.pending().await;
        let mut attempts = 0;
        if let Some(op) = pending.iter_mut().find(|op| op.id == id) {
            op.attempts += 1;
            attempts = op.attempts;
        }
        self.inner.persistence.save_records(PENDING_COLLECTION, &pending).await;
        attempts
    }

    async fn dead_letter(&self, id: OperationId) {
        let _write = self.inner.write.lock().await;
        let mut pending = self.pending().await;
        let Some(pos) = pending.iter().position(|op| op.id == id) else {
            return;
        };
        let operation = pending.remove(pos);

        let mut dead = self.dead_letters().await;
        dead.push(operation);
        self.inner.persistence.save_records(DEAD_LETTER_COLLECTION, &dead).await;
        self.inner.persistence.save_records(PENDING_COLLECTION, &pending).await;
    }
}
