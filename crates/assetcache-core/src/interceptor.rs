//! Fetch interception policy.
//!
//! For each request the interceptor decides whether the cache is consulted
//! at all, answers hits from the serving generation, and hands misses to the
//! network. Successful first-party responses are written back in a spawned
//! task so the caller never waits on storage.

use std::sync::Arc;

use futures::future::join_all;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{ConfigError, NetworkError};
use crate::http::{Destination, Request, RequestKey, Response};
use crate::network::Network;
use crate::store::{CacheStorage, CachedEntry};

/// Interception policy applied to eligible requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Honours exclusion markers, stores only first-party 200 responses and
    /// falls back to the cached root document when offline.
    #[default]
    ExclusionAwareStaleWhileRevalidate,
    /// Cache then network for every GET. No exclusions, no offline document
    /// fallback, and any 2xx response is stored.
    SimpleCacheFirst,
}

impl FetchStrategy {
    fn honours_exclusions(self) -> bool {
        matches!(self, Self::ExclusionAwareStaleWhileRevalidate)
    }

    fn falls_back_offline(self) -> bool {
        matches!(self, Self::ExclusionAwareStaleWhileRevalidate)
    }

    fn should_store(self, response: &Response) -> bool {
        match self {
            Self::ExclusionAwareStaleWhileRevalidate => response.is_first_party_success(),
            Self::SimpleCacheFirst => response.is_ok(),
        }
    }
}

/// Result of offering a request to the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Not intercepted; the host performs its default network fetch.
    Passthrough,
    /// Served from the serving generation without touching the network.
    Cached(Response),
    /// Network failed for a document; the stored root page was substituted.
    Fallback(Response),
    /// Fetched from the network on a miss.
    Network(Response),
}

impl Interception {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Passthrough => None,
            Self::Cached(r) | Self::Fallback(r) | Self::Network(r) => Some(r),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Passthrough => None,
            Self::Cached(r) | Self::Fallback(r) | Self::Network(r) => Some(r),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Cached(_) => "cache",
            Self::Fallback(_) => "offline-fallback",
            Self::Network(_) => "network",
        }
    }
}

pub struct FetchInterceptor {
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    strategy: FetchStrategy,
    exclusion_markers: Vec<String>,
    root_key: RequestKey,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl FetchInterceptor {
    pub fn new(
        config: &CacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, ConfigError> {
        let root = config.resolve("/")?;
        Ok(Self {
            storage,
            network,
            strategy: config.strategy,
            exclusion_markers: config.exclusion_markers.clone(),
            root_key: RequestKey::new(&Method::GET, &root),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    pub fn is_excluded(&self, url: &Url) -> bool {
        let url = url.as_str();
        self.exclusion_markers
            .iter()
            .any(|marker| !marker.is_empty() && url.contains(marker.as_str()))
    }

    /// Offer `request` to the cache policy, reading from and writing to
    /// `generation`. With no serving generation nothing is intercepted.
    pub async fn intercept(
        &self,
        generation: Option<&str>,
        request: &Request,
    ) -> Result<Interception, NetworkError> {
        if request.method != Method::GET {
            return Ok(Interception::Passthrough);
        }
        if self.strategy.honours_exclusions() && self.is_excluded(&request.url) {
            debug!(url = %request.url, "Excluded from caching");
            return Ok(Interception::Passthrough);
        }
        let Some(generation) = generation else {
            return Ok(Interception::Passthrough);
        };

        let key = request.key();
        if let Some(entry) = self.lookup(generation, &key).await {
            debug!(%key, generation, "Cache hit");
            return Ok(Interception::Cached(entry.response));
        }

        debug!(%key, generation, "Cache miss");
        match self.network.fetch(request).await {
            Ok(response) => {
                if self.strategy.should_store(&response) {
                    self.persist(generation, key, response.clone()).await;
                }
                Ok(Interception::Network(response))
            }
            Err(e) => {
                let document = request.destination == Destination::Document;
                if self.strategy.falls_back_offline() && document {
                    if let Some(root) = self.lookup(generation, &self.root_key).await {
                        debug!(
                            url = %request.url,
                            error = %e,
                            "Offline, serving cached root document"
                        );
                        return Ok(Interception::Fallback(root.response));
                    }
                }
                Err(e)
            }
        }
    }

    /// Wait for every store started so far.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().await);
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Cache store task panicked");
            }
        }
    }

    /// A storage failure on read is treated as a miss.
    async fn lookup(&self, generation: &str, key: &RequestKey) -> Option<CachedEntry> {
        match self.storage.lookup(generation, key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, generation, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write `snapshot` in the background. A generation retired while the
    /// request was in flight stays deleted.
    async fn persist(&self, generation: &str, key: RequestKey, snapshot: Response) {
        let storage = Arc::clone(&self.storage);
        let generation = generation.to_string();
        let handle = tokio::spawn(async move {
            match storage
                .store_existing(&generation, key.clone(), snapshot)
                .await
            {
                Ok(true) => debug!(%key, generation = %generation, "Response stored"),
                Ok(false) => {
                    debug!(%key, generation = %generation, "Generation retired, store dropped")
                }
                Err(e) => {
                    warn!(%key, generation = %generation, error = %e, "Failed to store response")
                }
            }
        });

        let mut pending = self.pending.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}
