//! Shared helpers for the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use assetcache_core::{CacheConfig, Network, NetworkError, Request, Response, Url};
use async_trait::async_trait;
use tokio::sync::Notify;

pub const ORIGIN: &str = "http://localhost:8080";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn config(generation: &str, required: &[&str]) -> CacheConfig {
    CacheConfig {
        generation: generation.to_string(),
        origin: ORIGIN.to_string(),
        required_assets: required.iter().map(|s| s.to_string()).collect(),
        ..CacheConfig::default()
    }
}

/// A fake origin server that can be switched offline.
#[derive(Default)]
pub struct FakeOrigin {
    pages: HashMap<String, Response>,
    offline: AtomicBool,
    hits: AtomicUsize,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, path: &str, status: u16, body: &str) -> Self {
        self.pages
            .insert(url(path).to_string(), Response::new(status, body));
        self
    }

    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = request.url.to_string();
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Failed {
                url,
                reason: "network unreachable".to_string(),
            });
        }
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .pages
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "not found")))
    }
}

/// Wraps a `FakeOrigin`, holding requests for one URL until released.
pub struct HeldOrigin {
    origin: FakeOrigin,
    held: Url,
    reached: Notify,
    release: Notify,
}

impl HeldOrigin {
    pub fn new(origin: FakeOrigin, held: &str) -> Self {
        Self {
            origin,
            held: url(held),
            reached: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until a request for the held URL is in flight.
    pub async fn reached(&self) {
        self.reached.notified().await
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl Network for HeldOrigin {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        if request.url == self.held {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.origin.fetch(request).await
    }
}
