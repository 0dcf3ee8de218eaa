//! Requests, responses and the network seam for the offline cache.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use url::Url;

/// The request could not reach the network.
#[derive(Debug, Clone, Error)]
#[error("network error: {0}")]
pub struct NetworkError(pub String);

/// A request routed through the offline cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineRequest {
    pub method: Method,
    pub url: Url,
    /// Value of the `Accept` header, if any.
    pub accept: Option<String>,
}

impl OfflineRequest {
    /// A `GET` without an `Accept` header.
    #[must_use]
    pub const fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            accept: None,
        }
    }

    /// A `GET` for an HTML document.
    #[must_use]
    pub fn page(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            accept: Some("text/html,application/xhtml+xml".to_string()),
        }
    }

    pub(crate) fn accepts_html(&self) -> bool {
        self.accept.as_deref().is_some_and(|a| a.contains("text/html"))
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Built locally because neither network nor cache could answer.
    Fallback,
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub source: ResponseSource,
}

impl OfflineResponse {
    /// A response straight from the network.
    #[must_use]
    pub fn network(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(String::from),
            body: body.into(),
            source: ResponseSource::Network,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 text, lossily.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub(crate) fn from_cache(mut self) -> Self {
        self.source = ResponseSource::Cache;
        self
    }
}

/// Performs network requests for the offline cache.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &OfflineRequest) -> Result<OfflineResponse, NetworkError>;
}

/// [`Fetcher`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &OfflineRequest) -> Result<OfflineResponse, NetworkError> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        if let Some(accept) = &request.accept {
            builder = builder.header(ACCEPT, accept);
        }

        let response = builder.send().await.map_err(|e| NetworkError(e.to_string()))?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await.map_err(|e| NetworkError(e.to_string()))?;

        Ok(OfflineResponse {
            status,
            content_type,
            body: body.to_vec(),
            source: ResponseSource::Network,
        })
    }
}
