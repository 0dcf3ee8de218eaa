//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables are optional.
//!
//! - `BASKET_API_URL` - Base URL of the remote API (default: `http://127.0.0.1:3000/api`)
//! - `BASKET_DATA_DIR` - Directory for the local stores (default: `.basket`)
//! - `BASKET_HTTP_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `BASKET_REFRESH_INTERVAL_SECS` - Token refresh check interval (default: 60)
//! - `BASKET_REFRESH_BUFFER_SECS` - Refresh when the token expires within this window (default: 300)
//! - `BASKET_STARTUP_BUFFER_SECS` - Expiry buffer used when adopting a persisted session (default: 60)
//! - `BASKET_CART_DEBOUNCE_MS` - Coalescing window for cart writes (default: 250)
//! - `BASKET_SYNC_INTERVAL_SECS` - Background sync wake interval (default: 30)
//! - `BASKET_REPLAY_MAX_ATTEMPTS` - Permanent rejections before an operation is dead-lettered (default: 5)
//! - `BASKET_CACHE_VERSION` - Suffix for the offline cache names (default: `v1`)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://127.0.0.1:3000/api";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the remote API. Always ends with a `/`.
    pub api_url: Url,
    /// Root directory for the structured and flat stores.
    pub data_dir: PathBuf,
    /// Timeout applied to every remote call.
    pub http_timeout: Duration,
    /// Session refresh settings.
    pub refresh: RefreshConfig,
    /// Cart persistence settings.
    pub cart: CartConfig,
    /// Offline queue settings.
    pub sync: SyncConfig,
    /// Offline response cache settings.
    pub offline: OfflineConfig,
}

/// Token refresh scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshConfig {
    /// How often the scheduler inspects the session.
    pub interval: Duration,
    /// Refresh proactively when the access token expires within this window.
    pub buffer_secs: i64,
    /// Buffer applied when deciding whether a persisted session is still usable.
    pub startup_buffer_secs: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            buffer_secs: 300,
            startup_buffer_secs: 60,
        }
    }
}

/// Cart persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartConfig {
    /// Writes issued within this window are coalesced into one.
    pub debounce: Duration,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
        }
    }
}

/// Offline mutation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Periodic wake interval for the background worker.
    pub interval: Duration,
    /// Permanent rejections tolerated before an operation is dead-lettered.
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// Offline response cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineConfig {
    /// Cache name version suffix; bumping it evicts old caches on activate.
    pub cache_version: String,
    /// Paths fetched into the static cache on install.
    pub precache: Vec<String>,
    /// Path of the page served when a document is requested offline.
    pub offline_page: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_version: "v1".to_string(),
            precache: ["/", "/products", "/offline.html", "/manifest.json"]
                .into_iter()
                .map(String::from)
                .collect(),
            offline_page: "/offline.html".to_string(),
        }
    }
}

impl OfflineConfig {
    /// Name of the cache holding precached and static assets.
    #[must_use]
    pub fn static_cache(&self) -> String {
        format!("static-{}", self.cache_version)
    }

    /// Name of the cache holding pages and other network-first responses.
    #[must_use]
    pub fn dynamic_cache(&self) -> String {
        format!("dynamic-{}", self.cache_version)
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = parse_api_url(
            "BASKET_API_URL",
            &lookup("BASKET_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        )?;
        let data_dir = lookup("BASKET_DATA_DIR").map_or_else(|| PathBuf::from(".basket"), PathBuf::from);

        let refresh = RefreshConfig {
            interval: Duration::from_secs(parse_or(&lookup, "BASKET_REFRESH_INTERVAL_SECS", 60)?),
            buffer_secs: parse_or(&lookup, "BASKET_REFRESH_BUFFER_SECS", 300)?,
            startup_buffer_secs: parse_or(&lookup, "BASKET_STARTUP_BUFFER_SECS", 60)?,
        };
        if refresh.interval.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "BASKET_REFRESH_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let cart = CartConfig {
            debounce: Duration::from_millis(parse_or(&lookup, "BASKET_CART_DEBOUNCE_MS", 250)?),
        };

        let sync = SyncConfig {
            interval: Duration::from_secs(parse_or(&lookup, "BASKET_SYNC_INTERVAL_SECS", 30)?),
            max_attempts: parse_or(&lookup, "BASKET_REPLAY_MAX_ATTEMPTS", 5)?,
        };
        if sync.interval.is_zero() || sync.max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "BASKET_SYNC_INTERVAL_SECS/BASKET_REPLAY_MAX_ATTEMPTS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let offline = OfflineConfig {
            cache_version: lookup("BASKET_CACHE_VERSION").unwrap_or_else(|| "v1".to_string()),
            ..OfflineConfig::default()
        };

        Ok(Self {
            api_url,
            data_dir,
            http_timeout: Duration::from_secs(parse_or(&lookup, "BASKET_HTTP_TIMEOUT_SECS", 30)?),
            refresh,
            cart,
            sync,
            offline,
        })
    }

    /// Configuration for a given API and data directory with all defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `api_url` is not a valid URL.
    pub fn new(api_url: &str, data_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: parse_api_url("api_url", api_url)?,
            data_dir: data_dir.into(),
            http_timeout: Duration::from_secs(30),
            refresh: RefreshConfig::default(),
            cart: CartConfig::default(),
            sync: SyncConfig::default(),
            offline: OfflineConfig::default(),
        })
    }

    /// Directory of the foreground (cart + session) stores.
    #[must_use]
    pub fn foreground_dir(&self) -> PathBuf {
        self.data_dir.join("foreground")
    }

    /// Directory of the background worker's stores.
    #[must_use]
    pub fn background_dir(&self) -> PathBuf {
        self.data_dir.join("background")
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse the API base URL, normalizing it to end with `/` so that relative
/// joins (`auth/login`) stay under the base path.
fn parse_api_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be an absolute http(s) URL".to_string(),
        ));
    }
    Ok(url)
}

/// Parse a variable, falling back to `default` when it is unset.
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_url.as_str(), "http://127.0.0.1:3000/api/");
        assert_eq!(config.data_dir, PathBuf::from(".basket"));
        assert_eq!(config.refresh, RefreshConfig::default());
        assert_eq!(config.cart.debounce, Duration::from_millis(250));
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.offline.static_cache(), "static-v1");
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("BASKET_API_URL", "https://shop.example.com/api/v2"),
            ("BASKET_REFRESH_BUFFER_SECS", "120"),
            ("BASKET_CART_DEBOUNCE_MS", "0"),
            ("BASKET_CACHE_VERSION", "v7"),
        ]))
        .unwrap();

        assert_eq!(config.api_url.as_str(), "https://shop.example.com/api/v2/");
        assert_eq!(config.refresh.buffer_secs, 120);
        assert!(config.cart.debounce.is_zero());
        assert_eq!(config.offline.dynamic_cache(), "dynamic-v7");
    }

    #[test]
    fn test_invalid_number() {
        let err = ClientConfig::from_lookup(lookup(&[("BASKET_SYNC_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "BASKET_SYNC_INTERVAL_SECS"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = ClientConfig::from_lookup(lookup(&[("BASKET_REFRESH_INTERVAL_SECS", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_url() {
        let result = ClientConfig::from_lookup(lookup(&[("BASKET_API_URL", "not a url")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(_, _))));
    }

    #[test]
    fn test_store_dirs_are_separate() {
        let config = ClientConfig::new("http://localhost/api", "/tmp/basket").unwrap();
        assert_ne!(config.foreground_dir(), config.background_dir());
    }
}
