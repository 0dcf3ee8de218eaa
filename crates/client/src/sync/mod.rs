//! Offline mutation queue and the background worker that replays it.
//!
//! Mutations that could not reach the API are recorded in an
//! [`OfflineQueue`] and replayed later, strictly in creation order. The queue
//! lives on its own [`SyncWorker`] task with its own storage; the foreground
//! talks to it only through a [`SyncHandle`].

mod queue;
mod replay;
mod worker;

pub use queue::{DEAD_LETTER_COLLECTION, DrainReport, OfflineQueue, PENDING_COLLECTION, PendingOperation};
pub use replay::{HttpReplayer, ReplayError, Replayer};
pub use worker::{SyncHandle, SyncWorker};

use thiserror::Error;

/// Errors from the sync subsystem.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another drain of the same queue is running.
    #[error("a drain is already in progress")]
    DrainInProgress,

    /// The worker task has exited.
    #[error("sync worker has stopped")]
    WorkerStopped,
}
