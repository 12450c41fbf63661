//! assetcache-core - offline asset cache for the BitMerchant web front end.
//!
//! Keeps exactly one cache generation active, pre-caches the pages and
//! stylesheets the menu needs offline, and intercepts read requests so they
//! are answered from the cache when possible. Live endpoints (API calls,
//! event streams, payments) are never intercepted.
//!
//! The host drives the [`OfflineCache`]: it calls `register` once, then
//! offers every outgoing request to `handle_fetch` (or `fetch`).

pub mod config;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod lifecycle;
pub mod network;
pub mod offline;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::CacheConfig;
pub use error::{ConfigError, InstallError, LifecycleError, NetworkError, StorageError};
pub use http::{Destination, Request, RequestKey, Response, ResponseKind};
pub use interceptor::{FetchInterceptor, FetchStrategy, Interception};
pub use lifecycle::{
    ActivateOutcome, ActivationReport, ConsumerId, InstallReport, LifecycleController,
    LifecycleState, Registration,
};
pub use network::{HttpNetwork, Network};
pub use offline::OfflineCache;
pub use store::{CacheStorage, CachedEntry, DiskStorage, EntrySummary, MemoryStorage};

// Re-exported so hosts can build requests without a direct reqwest dependency
pub use reqwest::{Method, Url};
