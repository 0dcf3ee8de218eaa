//! Named response caches.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use moka::future::Cache;

use super::fetcher::OfflineResponse;

/// Entries kept per named cache.
const MAX_ENTRIES: u64 = 1000;

/// A set of named caches keyed by request URL.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: Mutex<BTreeMap<String, Cache<String, OfflineResponse>>>,
}

impl CacheStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache called `name`, created if missing.
    pub fn open(&self, name: &str) -> Cache<String, OfflineResponse> {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Cache::builder().max_capacity(MAX_ENTRIES).build())
            .clone()
    }

    /// Names of every cache.
    pub fn keys(&self) -> Vec<String> {
        self.caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Drop a cache and its entries. Returns whether it existed.
    pub fn delete(&self, name: &str) -> bool {
        let removed = self
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(cache) = &removed {
            cache.invalidate_all();
        }
        removed.is_some()
    }

    /// Look `key` up in every cache, in name order.
    pub async fn match_any(&self, key: &str) -> Option<OfflineResponse> {
        let caches: Vec<_> = self
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for cache in caches {
            if let Some(response) = cache.get(key).await {
                return Some(response);
            }
        }
        None
    }
}
