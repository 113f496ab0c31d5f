use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;

use crate::{Error, Result, UpstreamError, cache::SharedBackend};

/// Performs one outbound GET and returns the raw body.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Identifies the fixed headers this fetcher sends; folded into cache keys.
    fn fingerprint(&self) -> &str;
}

/// reqwest based fetcher with a static user agent and a bounded timeout.
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
}

impl HttpFetcher {
    /// `timeout` bounds both connecting and the whole request.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }

    fn handle_error_req(error: reqwest::Error) -> Error {
        if error.is_timeout() {
            Error::Timeout
        } else if error.is_connect() || error.is_request() {
            UpstreamError::Unreachable(error.to_string()).into()
        } else {
            Error::Http(error)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(Self::handle_error_req)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Unreachable(format!("HTTP {status} from {url}")).into());
        }

        let bytes = response.bytes().await.map_err(Self::handle_error_req)?;
        Ok(bytes.to_vec())
    }

    fn fingerprint(&self) -> &str {
        &self.user_agent
    }
}

/// A response body and whether it came out of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Raw response body.
    pub body: Vec<u8>,
    /// Whether the network was skipped.
    pub from_cache: bool,
}

/// TTL cache in front of a [`Fetcher`], keyed by request URL.
#[derive(Clone)]
pub struct FetchCache {
    backend: SharedBackend,
    fetcher: Arc<dyn Fetcher>,
    ttl: Duration,
}

impl FetchCache {
    /// Entries live for `ttl`.
    pub fn new(backend: SharedBackend, fetcher: Arc<dyn Fetcher>, ttl: Duration) -> Self {
        Self {
            backend,
            fetcher,
            ttl,
        }
    }

    fn cache_key(&self, url: &str) -> String {
        format!("fetch:{}:{}", self.fetcher.fingerprint(), url)
    }

    /// The cached body for `url`, if one is still live.
    pub async fn lookup(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let body = self.backend.get_raw(&self.cache_key(url)).await?;
        if body.is_some() {
            tracing::debug!("Cache hit for {}", url);
        }
        Ok(body)
    }

    /// Fetches `url` and stores the body. Failed fetches are never stored.
    pub async fn fetch_and_store(&self, url: &str) -> Result<Vec<u8>> {
        let body = self.fetcher.fetch(url).await?;
        self.backend
            .set_raw(&self.cache_key(url), &body, self.ttl)
            .await?;
        Ok(body)
    }

    /// Serves `url` from the cache, or fetches and stores it.
    pub async fn get_or_fetch(&self, url: &str) -> Result<Fetched> {
        if let Some(body) = self.lookup(url).await? {
            return Ok(Fetched {
                body,
                from_cache: true,
            });
        }
        Ok(Fetched {
            body: self.fetch_and_store(url).await?,
            from_cache: false,
        })
    }
}
