//! Pushing cart mutations to the API, queueing them when offline.

use basket_core::OperationId;
use reqwest::Method;
use tracing::{info, instrument};

use super::CartCommand;
use crate::error::ClientError;
use crate::fetch::{ApiClient, AuthMode};
use crate::sync::SyncHandle;

/// API path receiving cart mutations.
pub const CART_ENDPOINT: &str = "/cart";

/// Where a pushed mutation ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The API accepted it.
    Synced,
    /// The API was unreachable; it is queued for replay.
    Queued(OperationId),
}

/// Sends cart mutations upstream.
#[derive(Debug, Clone)]
pub struct CartSync {
    api: ApiClient,
    worker: SyncHandle,
}

impl CartSync {
    #[must_use]
    pub const fn new(api: ApiClient, worker: SyncHandle) -> Self {
        Self { api, worker }
    }

    /// Post `command` to the cart endpoint.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when the API answered with a failure, and
    /// `ClientError::Sync` when the API was unreachable and the worker could
    /// not take the mutation either.
    #[instrument(skip_all)]
    pub async fn push(&self, command: &CartCommand) -> Result<SyncOutcome, ClientError> {
        match self
            .api
            .send(Method::POST, CART_ENDPOINT, Some(command), AuthMode::Optional)
            .await
        {
            Ok(_) => Ok(SyncOutcome::Synced),
            Err(e) if e.is_offline() => {
                info!(error = %e, "Cart API unreachable, queueing mutation");
                let payload = serde_json::to_value(command)?;
                let id = self
                    .worker
                    .enqueue(Method::POST.as_str(), CART_ENDPOINT, payload)
                    .await?;
                Ok(SyncOutcome::Queued(id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use url::Url;

    use super::*;
    use crate::cart::state::tests::mug;
    use crate::persistence::Persistence;
    use crate::session::SessionStore;
    use crate::session::tests::FakeAuthApi;
    use crate::sync::{HttpReplayer, OfflineQueue, SyncWorker};

    #[tokio::test]
    async fn test_unreachable_api_queues_mutation() {
        // Nothing listens on the discard port.
        let base = Url::parse("http://127.0.0.1:9/api/").unwrap();
        let session = SessionStore::new(Arc::new(FakeAuthApi::default()), Persistence::in_memory());
        session.initialize(60).await;
        let api = ApiClient::new(reqwest::Client::new(), base.clone(), session);

        let queue = OfflineQueue::new(Persistence::in_memory(), 5);
        let worker = SyncWorker::spawn(
            queue.clone(),
            Arc::new(HttpReplayer::new(reqwest::Client::new(), base)),
            Duration::from_secs(3600),
        );
        let sync = CartSync::new(api, worker.handle());

        let command = CartCommand::add(mug(1));
        let outcome = sync.push(&command).await.unwrap();

        assert!(matches!(outcome, SyncOutcome::Queued(_)));
        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].endpoint, CART_ENDPOINT);
        assert_eq!(pending[0].payload, serde_json::to_value(&command).unwrap());

        worker.shutdown().await;
    }
}
