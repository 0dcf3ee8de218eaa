//! Periodic token refresh.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::SessionStore;

/// Background task that keeps the access token fresh.
///
/// Every `interval` it checks the held session and refreshes it when the
/// access token expires within `buffer_secs`. Nothing runs while signed out.
/// Dropping the scheduler aborts the task; [`shutdown`](Self::shutdown) lets
/// an in-flight refresh finish first.
#[derive(Debug)]
pub struct RefreshScheduler {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// Spawn the scheduler. The first check happens one `interval` from now.
    #[must_use]
    pub fn spawn(store: SessionStore, interval: Duration, buffer_secs: i64) -> Self {
        let (tx, mut rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), buffer_secs, "Refresh scheduler started");
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        if store.needs_refresh(buffer_secs).await {
                            let outcome = store.refresh().await;
                            debug!(?outcome, "Scheduled refresh finished");
                        }
                    }
                }
            }

            info!("Refresh scheduler stopped");
        });

        Self {
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    /// Stop the scheduler and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::persistence::Persistence;
    use crate::session::tests::{FakeAuthApi, session};
    use crate::session::types::SessionRecord;
    use crate::session::{AuthState, SESSION_COLLECTION};

    async fn store_holding(ttl_secs: i64) -> (SessionStore, Arc<FakeAuthApi>) {
        let api = Arc::new(FakeAuthApi::default());
        let persistence = Persistence::in_memory();
        persistence
            .save_records(
                SESSION_COLLECTION,
                &[SessionRecord::new(session(ttl_secs, "refresh-1"))],
            )
            .await;
        let store = SessionStore::new(api.clone(), persistence);
        store.initialize(60).await;
        (store, api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_token_inside_buffer() {
        let (store, api) = store_holding(200).await;
        let scheduler = RefreshScheduler::spawn(store.clone(), Duration::from_secs(60), 300);

        tokio::time::sleep(Duration::from_secs(61)).await;
        scheduler.shutdown().await;

        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert!(matches!(store.state(), AuthState::Authenticated(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaves_fresh_token_alone() {
        let (store, api) = store_holding(3600).await;
        let scheduler = RefreshScheduler::spawn(store, Duration::from_secs(60), 300);

        tokio::time::sleep(Duration::from_secs(181)).await;
        scheduler.shutdown().await;

        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_while_signed_out() {
        let api = Arc::new(FakeAuthApi::default());
        let store = SessionStore::new(api.clone(), Persistence::in_memory());
        store.initialize(60).await;
        let scheduler = RefreshScheduler::spawn(store, Duration::from_secs(60), 300);

        tokio::time::sleep(Duration::from_secs(300)).await;
        scheduler.shutdown().await;

        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
    }
}
