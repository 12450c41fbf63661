//! The cache manager as a host sees it: one lifecycle controller and one
//! fetch interceptor sharing a storage backend and a network.

use std::sync::Arc;

use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{ConfigError, LifecycleError, NetworkError};
use crate::http::{Request, Response};
use crate::interceptor::{FetchInterceptor, Interception};
use crate::lifecycle::{LifecycleController, Registration};
use crate::network::Network;
use crate::store::CacheStorage;

pub struct OfflineCache {
    controller: LifecycleController,
    interceptor: FetchInterceptor,
    network: Arc<dyn Network>,
}

impl OfflineCache {
    pub fn new(
        config: &CacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, ConfigError> {
        let controller =
            LifecycleController::new(config, Arc::clone(&storage), Arc::clone(&network))?;
        let interceptor = FetchInterceptor::new(config, storage, Arc::clone(&network))?;
        Ok(Self {
            controller,
            interceptor,
            network,
        })
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub fn interceptor(&self) -> &FetchInterceptor {
        &self.interceptor
    }

    pub async fn register(&self) -> Result<Registration, LifecycleError> {
        self.controller.register().await
    }

    /// Offer a request to the interceptor against the serving generation.
    pub async fn handle_fetch(&self, request: &Request) -> Result<Interception, NetworkError> {
        let serving = self.controller.serving_generation().await;
        self.interceptor.intercept(serving.as_deref(), request).await
    }

    /// Resolve a request the way the host would: intercepted requests are
    /// answered by the interceptor, everything else goes to the network.
    /// Returns the label of the path taken along with the response.
    pub async fn fetch(&self, request: &Request) -> Result<(&'static str, Response), NetworkError> {
        let interception = self.handle_fetch(request).await?;
        let label = interception.label();
        match interception.into_response() {
            Some(response) => Ok((label, response)),
            None => {
                debug!(
                    url = %request.url,
                    method = %request.method,
                    "Not intercepted, fetching directly"
                );
                Ok((label, self.network.fetch(request).await?))
            }
        }
    }

    /// Wait for background stores to land.
    pub async fn flush(&self) {
        self.interceptor.flush().await
    }
}
