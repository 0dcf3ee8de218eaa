//! Wiring for a running client.

use std::sync::Arc;

use tracing::{info, instrument};
use url::Url;

use crate::cart::{Cart, CartSync};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::fetch::ApiClient;
use crate::offline::{HttpFetcher, OfflineCache};
use crate::persistence::Persistence;
use crate::session::{AuthState, HttpAuthApi, RefreshScheduler, SessionStore};
use crate::sync::{HttpReplayer, OfflineQueue, SyncHandle, SyncWorker};

/// Every store and background task of one client, built from a
/// [`ClientConfig`].
///
/// Foreground state (session and cart) and the sync worker's queue use
/// separate storage directories.
pub struct ClientContext {
    config: ClientConfig,
    session: SessionStore,
    cart: Cart,
    api: ApiClient,
    cart_sync: CartSync,
    offline: OfflineCache,
    scheduler: RefreshScheduler,
    worker: SyncWorker,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("api_url", &self.config.api_url.as_str())
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

impl ClientContext {
    /// Build everything, resolve the persisted session and hydrate the cart.
    ///
    /// Returns once neither store is loading.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    #[instrument(skip_all, fields(api_url = %config.api_url))]
    pub async fn start(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        let foreground = Persistence::on_disk(&config.foreground_dir());
        let session = SessionStore::new(
            Arc::new(HttpAuthApi::new(http.clone(), config.api_url.clone())),
            foreground.clone(),
        );
        let cart = Cart::new(foreground, config.cart.debounce);

        let (auth, ()) = tokio::join!(
            session.initialize(config.refresh.startup_buffer_secs),
            cart.hydrate()
        );

        let scheduler = RefreshScheduler::spawn(
            session.clone(),
            config.refresh.interval,
            config.refresh.buffer_secs,
        );

        let queue = OfflineQueue::new(
            Persistence::on_disk(&config.background_dir()),
            config.sync.max_attempts,
        );
        let worker = SyncWorker::spawn(
            queue,
            Arc::new(HttpReplayer::new(http.clone(), config.api_url.clone())),
            config.sync.interval,
        );

        let api = ApiClient::new(http.clone(), config.api_url.clone(), session.clone());
        let cart_sync = CartSync::new(api.clone(), worker.handle());
        let offline = OfflineCache::new(
            Arc::new(HttpFetcher::new(http)),
            site_origin(&config.api_url),
            config.offline.clone(),
        );

        info!(
            authenticated = matches!(auth, AuthState::Authenticated(_)),
            cart_items = cart.item_count(),
            "Client started"
        );

        Ok(Self {
            config,
            session,
            cart,
            api,
            cart_sync,
            offline,
            scheduler,
            worker,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn session(&self) -> &SessionStore {
        &self.session
    }

    #[must_use]
    pub const fn cart(&self) -> &Cart {
        &self.cart
    }

    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub const fn cart_sync(&self) -> &CartSync {
        &self.cart_sync
    }

    #[must_use]
    pub const fn offline(&self) -> &OfflineCache {
        &self.offline
    }

    /// Handle to the background sync worker.
    #[must_use]
    pub fn sync(&self) -> SyncHandle {
        self.worker.handle()
    }

    /// Stop the background tasks and persist any pending cart write.
    #[instrument(skip_all)]
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.worker.shutdown().await;
        self.cart.flush().await;
        info!("Client stopped");
    }
}

/// Root of the site the API is served from.
fn site_origin(api_url: &Url) -> Url {
    let mut origin = api_url.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin
}
