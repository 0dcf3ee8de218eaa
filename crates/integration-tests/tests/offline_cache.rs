//! Integration tests for the offline response cache over real HTTP.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use basket_client::config::OfflineConfig;
use basket_client::offline::{
    CacheStorage, HttpFetcher, OfflineCache, OfflineRequest, OfflineResponse, ResponseSource,
};
use basket_integration_tests::MockApi;

fn fetcher() -> Arc<HttpFetcher> {
    // No pooled connections, so requests fail as soon as the server stops.
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();
    Arc::new(HttpFetcher::new(client))
}

#[tokio::test]
async fn test_precached_pages_are_served_offline() {
    let api = MockApi::start().await;
    let site = api.site_url();
    let cache = OfflineCache::new(fetcher(), site.clone(), OfflineConfig::default());

    assert_eq!(cache.install().await.unwrap(), 4);
    cache.activate();

    let online = cache
        .fetch(&OfflineRequest::page(site.join("/products").unwrap()))
        .await
        .unwrap();
    assert_eq!(online.source, ResponseSource::Network);
    api.stop().await;

    let cached = cache
        .fetch(&OfflineRequest::page(site.join("/products").unwrap()))
        .await
        .unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert!(cached.text().contains("Products"));

    let unknown = cache
        .fetch(&OfflineRequest::page(site.join("/account").unwrap()))
        .await
        .unwrap();
    assert_eq!(unknown.source, ResponseSource::Cache);
    assert!(unknown.text().contains("You are offline"));

    let api_call = cache
        .fetch(&OfflineRequest::get(site.join("/api/cart").unwrap()))
        .await
        .unwrap();
    assert_eq!(api_call.status, 503);
    assert_eq!(api_call.source, ResponseSource::Fallback);
}

#[tokio::test]
async fn test_new_cache_version_evicts_old_caches() {
    let api = MockApi::start().await;
    let site = api.site_url();

    let storage = CacheStorage::new();
    storage
        .open("static-v1")
        .insert(
            site.join("/").unwrap().to_string(),
            OfflineResponse::network(200, Some("text/html"), "<h1>Old home</h1>"),
        )
        .await;

    let config = OfflineConfig {
        cache_version: "v2".to_string(),
        ..OfflineConfig::default()
    };
    let cache = OfflineCache::with_storage(fetcher(), site.clone(), config, storage);
    cache.install().await.unwrap();

    assert_eq!(cache.activate(), vec!["static-v1".to_string()]);
    assert_eq!(cache.storage().keys(), vec!["static-v2".to_string()]);

    api.stop().await;
    let home = cache
        .fetch(&OfflineRequest::page(site.join("/").unwrap()))
        .await
        .unwrap();
    assert!(home.text().contains("<h1>Home</h1>"));
}
