//! HTTP access to the package CDN.
//!
//! [`RemoteFetcher`] is a thin reqwest wrapper with two extra guarantees:
//! responses are cached process-wide by their final (post-redirect) URL, and
//! every request observes a [`CancellationToken`]. A canceled token drops the
//! in-flight request future, which aborts the underlying connection, and the
//! call fails with [`FetchError::Canceled`] rather than a network error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::CdnConfig;
use crate::{Error, Result};

/// Failure of a single CDN request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request canceled")]
    Canceled,

    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
}

impl FetchError {
    /// HTTP status, when the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }
}

/// Something that can GET a URL under a cancellation token.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> std::result::Result<Bytes, FetchError>;
}

/// Shared, append-only response cache.
///
/// Entries are keyed by the final URL of a response; the URL that was
/// originally requested is recorded as an alias so a repeated request skips
/// the redirect round-trip too. Nothing is ever evicted.
#[derive(Debug, Clone, Default)]
pub struct FetchCache {
    entries: Arc<DashMap<String, Bytes>>,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, requested: &str, final_url: &str, body: Bytes) {
        if requested != final_url {
            self.entries.insert(requested.to_string(), body.clone());
        }
        self.entries.insert(final_url.to_string(), body);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// reqwest-backed [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    cache: FetchCache,
}

impl RemoteFetcher {
    /// Create a fetcher with a private cache.
    pub fn new(config: &CdnConfig) -> Result<Self> {
        Self::with_cache(config, FetchCache::new())
    }

    /// Create a fetcher sharing `cache` with other fetchers.
    pub fn with_cache(config: &CdnConfig, cache: FetchCache) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, cache })
    }

    pub fn cache(&self) -> &FetchCache {
        &self.cache
    }

    async fn fetch_uncached(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: final_url,
                status: status.as_u16(),
            });
        }

        if let Some(hit) = self.cache.get(&final_url) {
            debug!(url, final_url = %final_url, "cache hit after redirect");
            self.cache.insert(url, &final_url, hit.clone());
            return Ok(hit);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(&final_url, &e))?;
        self.cache.insert(url, &final_url, body.clone());
        Ok(body)
    }
}

#[async_trait]
impl Fetch for RemoteFetcher {
    #[instrument(skip(self, token), level = "debug")]
    async fn fetch(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> std::result::Result<Bytes, FetchError> {
        if token.is_cancelled() {
            return Err(FetchError::Canceled);
        }
        if let Some(hit) = self.cache.get(url) {
            debug!("cache hit");
            return Ok(hit);
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("request aborted by cancellation");
                Err(FetchError::Canceled)
            }
            result = self.fetch_uncached(url) => result,
        }
    }
}

fn network_error(url: &str, error: &reqwest::Error) -> FetchError {
    match error.status() {
        Some(status) => FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        },
        None => FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        },
    }
}
