//! Background task owning the offline queue.

use std::sync::Arc;
use std::time::Duration;

use basket_core::OperationId;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::SyncError;
use super::queue::{DrainReport, OfflineQueue, PendingOperation};
use super::replay::Replayer;

const CHANNEL_CAPACITY: usize = 64;

/// Messages accepted by the worker.
#[derive(Debug)]
enum SyncMessage {
    Enqueue {
        method: String,
        endpoint: String,
        payload: Value,
        ack: oneshot::Sender<OperationId>,
    },
    Sync {
        done: Option<oneshot::Sender<Result<DrainReport, SyncError>>>,
    },
    Pending {
        reply: oneshot::Sender<Vec<PendingOperation>>,
    },
    Shutdown,
}

/// Foreground handle to the sync worker.
///
/// The only way to reach the queue once the worker owns it. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncMessage>,
}

impl SyncHandle {
    /// Queue an operation for replay.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WorkerStopped` if the worker has shut down.
    pub async fn enqueue(
        &self,
        method: &str,
        endpoint: &str,
        payload: Value,
    ) -> Result<OperationId, SyncError> {
        let (ack, rx) = oneshot::channel();
        self.send(SyncMessage::Enqueue {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            payload,
            ack,
        })
        .await?;
        rx.await.map_err(|_| SyncError::WorkerStopped)
    }

    /// Drain now and wait for the result, e.g. when connectivity returns.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WorkerStopped` if the worker has shut down.
    pub async fn request_sync(&self) -> Result<DrainReport, SyncError> {
        let (done, rx) = oneshot::channel();
        self.send(SyncMessage::Sync { done: Some(done) }).await?;
        rx.await.map_err(|_| SyncError::WorkerStopped)?
    }

    /// Ask for a drain without waiting for it. Dropped if the worker is busy
    /// with a full mailbox.
    pub fn trigger_sync(&self) {
        if self.tx.try_send(SyncMessage::Sync { done: None }).is_err() {
            debug!("Sync trigger dropped");
        }
    }

    /// Snapshot of the queued operations.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WorkerStopped` if the worker has shut down.
    pub async fn pending(&self) -> Result<Vec<PendingOperation>, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(SyncMessage::Pending { reply }).await?;
        rx.await.map_err(|_| SyncError::WorkerStopped)
    }

    async fn send(&self, message: SyncMessage) -> Result<(), SyncError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| SyncError::WorkerStopped)
    }
}

/// The background sync worker.
///
/// Processes handle messages one at a time and wakes every `interval` to
/// drain whatever is queued. Dropping it aborts the task.
#[derive(Debug)]
pub struct SyncWorker {
    handle: SyncHandle,
    task: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Move `queue` onto a new task.
    #[must_use]
    pub fn spawn(queue: OfflineQueue, replayer: Arc<dyn Replayer>, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(run(queue, replayer, interval, rx));
        Self {
            handle: SyncHandle { tx },
            task: Some(task),
        }
    }

    /// A handle for the foreground.
    #[must_use]
    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop after the current message and wait for the task to exit.
    pub async fn shutdown(mut self) {
        let _ = self.handle.tx.send(SyncMessage::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run(
    queue: OfflineQueue,
    replayer: Arc<dyn Replayer>,
    interval: Duration,
    mut rx: mpsc::Receiver<SyncMessage>,
) {
    info!(interval_secs = interval.as_secs(), "Sync worker started");
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                None | Some(SyncMessage::Shutdown) => break,
                Some(SyncMessage::Enqueue { method, endpoint, payload, ack }) => {
                    let operation = queue.enqueue(&method, &endpoint, payload).await;
                    let _ = ack.send(operation.id);
                }
                Some(SyncMessage::Sync { done }) => {
                    let result = queue.drain(replayer.as_ref()).await;
                    if let Err(e) = &result {
                        warn!(error = %e, "Requested sync did not run");
                    }
                    if let Some(done) = done {
                        let _ = done.send(result);
                    }
                }
                Some(SyncMessage::Pending { reply }) => {
                    let _ = reply.send(queue.pending().await);
                }
            },
            _ = ticker.tick() => {
                if !queue.is_empty().await
                    && let Err(e) = queue.drain(replayer.as_ref()).await
                {
                    debug!(error = %e, "Periodic sync skipped");
                }
            }
        }
    }

    info!("Sync worker stopped");
}
