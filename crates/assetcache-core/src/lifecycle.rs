//! Generation lifecycle.
//!
//! The controller moves one configured generation through
//! `Uninstalled → Installing → Installed → Activating → Active`:
//!
//! - install fetches required and best-effort assets concurrently; nothing is
//!   written unless every required asset succeeded
//! - activation deletes every other generation, persists the pointer and
//!   claims all open consumers
//!
//! While a new generation installs, the previously current one (if any)
//! keeps serving.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use reqwest::Url;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{ConfigError, InstallError, LifecycleError, NetworkError, StorageError};
use crate::http::{Request, RequestKey, Response};
use crate::network::Network;
use crate::store::CacheStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninstalled,
    Installing,
    /// Installed and waiting to activate.
    Installed,
    Activating,
    Active,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninstalled => "uninstalled",
            Self::Installing => "installing",
            Self::Installed => "installed (waiting)",
            Self::Activating => "activating",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// An open page or client that a generation may control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub required_stored: usize,
    pub best_effort_stored: usize,
    /// URLs of best-effort assets that could not be cached.
    pub best_effort_failed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub generation: String,
    pub deleted: Vec<String>,
    /// Stale generations whose deletion failed.
    pub retained: Vec<String>,
    pub claimed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivateOutcome {
    Activated(ActivationReport),
    /// Consumers of another generation are still open and skip-wait is off.
    Waiting { consumers: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The configured generation was already current.
    Resumed { generation: String },
    Installed {
        install: InstallReport,
        activation: ActivateOutcome,
    },
}

#[derive(Debug)]
struct ControllerState {
    state: LifecycleState,
    serving: Option<String>,
    skip_waiting: bool,
    consumers: HashMap<ConsumerId, Option<String>>,
    next_consumer: u64,
}

impl ControllerState {
    /// State to return to when an install attempt is abandoned.
    fn settle(&mut self) {
        self.state = if self.serving.is_some() {
            LifecycleState::Active
        } else {
            LifecycleState::Uninstalled
        };
    }
}

pub struct LifecycleController {
    generation: String,
    required: Vec<Url>,
    best_effort: Vec<Url>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    inner: RwLock<ControllerState>,
}

impl LifecycleController {
    pub fn new(
        config: &CacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            generation: config.generation.clone(),
            required: config.required_urls()?,
            best_effort: config.best_effort_urls()?,
            storage,
            network,
            inner: RwLock::new(ControllerState {
                state: LifecycleState::Uninstalled,
                serving: None,
                skip_waiting: config.skip_waiting,
                consumers: HashMap::new(),
                next_consumer: 0,
            }),
        })
    }

    /// Name of the generation this controller installs.
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.read().await.state
    }

    /// Generation requests are currently served from.
    pub async fn serving_generation(&self) -> Option<String> {
        self.inner.read().await.serving.clone()
    }

    /// Allow activation without waiting for consumers of the previous
    /// generation to close.
    pub async fn skip_waiting(&self) {
        self.inner.write().await.skip_waiting = true;
    }

    /// Rebuild in-memory state from the persisted pointer.
    pub async fn restore(&self) -> Result<LifecycleState, LifecycleError> {
        let serving = match self.storage.current_generation().await? {
            Some(name) => {
                if self.storage.has_generation(&name).await? {
                    Some(name)
                } else {
                    warn!(generation = %name, "Pointer names a missing generation, ignoring");
                    None
                }
            }
            None => None,
        };
        let installed = self.storage.has_generation(&self.generation).await?;

        let mut inner = self.inner.write().await;
        if matches!(
            inner.state,
            LifecycleState::Installing | LifecycleState::Activating
        ) {
            return Err(LifecycleError::InvalidState {
                operation: "restore",
                state: inner.state,
            });
        }
        inner.state = match serving.as_deref() {
            Some(name) if name == self.generation => LifecycleState::Active,
            _ if installed => LifecycleState::Installed,
            Some(_) => LifecycleState::Active,
            None => LifecycleState::Uninstalled,
        };
        inner.serving = serving;
        debug!(state = %inner.state, serving = ?inner.serving, "Lifecycle restored");
        Ok(inner.state)
    }

    /// Registration trigger: resume if the configured generation is already
    /// current, otherwise install and activate it.
    pub async fn register(&self) -> Result<Registration, LifecycleError> {
        let state = self.restore().await?;
        if state == LifecycleState::Active
            && self.serving_generation().await.as_deref() == Some(self.generation.as_str())
        {
            info!(generation = %self.generation, "Generation already current");
            return Ok(Registration::Resumed {
                generation: self.generation.clone(),
            });
        }

        let install = self.install().await?;
        let activation = self.activate().await?;
        Ok(Registration::Installed {
            install,
            activation,
        })
    }

    pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
        {
            let mut inner = self.inner.write().await;
            match inner.state {
                LifecycleState::Uninstalled
                | LifecycleState::Installed
                | LifecycleState::Active => {
                    inner.state = LifecycleState::Installing;
                }
                state => {
                    return Err(LifecycleError::InvalidState {
                        operation: "install",
                        state,
                    })
                }
            }
        }
        info!(
            generation = %self.generation,
            required = self.required.len(),
            best_effort = self.best_effort.len(),
            "Installing generation"
        );

        let existed = match self.storage.has_generation(&self.generation).await {
            Ok(existed) => existed,
            Err(e) => {
                self.inner.write().await.settle();
                return Err(e.into());
            }
        };

        match self.populate().await {
            Ok(report) => {
                self.inner.write().await.state = LifecycleState::Installed;
                info!(
                    generation = %self.generation,
                    best_effort_failed = report.best_effort_failed.len(),
                    "Generation installed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    generation = %self.generation,
                    error = %e,
                    "Install failed, generation not promoted"
                );
                if !existed {
                    if let Err(de) = self.storage.delete_generation(&self.generation).await {
                        warn!(
                            generation = %self.generation,
                            error = %de,
                            "Failed to discard generation"
                        );
                    }
                }
                self.inner.write().await.settle();
                Err(e.into())
            }
        }
    }

    async fn populate(&self) -> Result<InstallReport, InstallError> {
        self.storage.open_generation(&self.generation).await?;

        let required = try_join_all(self.required.iter().map(|url| self.fetch_required(url)));
        let best_effort = join_all(self.best_effort.iter().map(|url| self.fetch_best_effort(url)));
        let (required, best_effort) = tokio::join!(required, best_effort);

        // All required assets arrived; only now does anything land
        let required = required?;
        let required_stored = required.len();
        try_join_all(
            required
                .into_iter()
                .map(|(key, response)| self.storage.store(&self.generation, key, response)),
        )
        .await?;

        let best_effort_failed: Vec<String> = join_all(
            self.best_effort
                .iter()
                .zip(best_effort)
                .map(|(url, fetched)| self.store_best_effort(url, fetched)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();
        Ok(InstallReport {
            generation: self.generation.clone(),
            required_stored,
            best_effort_stored: self.best_effort.len() - best_effort_failed.len(),
            best_effort_failed,
        })
    }

    async fn fetch_required(&self, url: &Url) -> Result<(RequestKey, Response), InstallError> {
        let request = Request::get(url.clone());
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|source| InstallError::RequiredAsset {
                url: url.to_string(),
                source,
            })?;
        if !response.is_ok() {
            return Err(InstallError::RequiredAsset {
                url: url.to_string(),
                source: NetworkError::BadStatus {
                    url: url.to_string(),
                    status: response.status,
                },
            });
        }
        debug!(url = %url, "Required asset fetched");
        Ok((request.key(), response))
    }

    async fn fetch_best_effort(&self, url: &Url) -> Result<(RequestKey, Response), String> {
        let request = Request::get(url.clone());
        match self.network.fetch(&request).await {
            Ok(response) if response.is_ok() => Ok((request.key(), response)),
            Ok(response) => Err(format!("status {}", response.status)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Returns the URL if the asset could not be cached.
    async fn store_best_effort(
        &self,
        url: &Url,
        fetched: Result<(RequestKey, Response), String>,
    ) -> Option<String> {
        let result = match fetched {
            Ok((key, response)) => self
                .storage
                .store(&self.generation, key, response)
                .await
                .map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };
        match result {
            Ok(()) => {
                debug!(url = %url, "Best-effort asset cached");
                None
            }
            Err(reason) => {
                warn!(url = %url, reason = %reason, "Best-effort asset not cached");
                Some(url.to_string())
            }
        }
    }

    pub async fn activate(&self) -> Result<ActivateOutcome, LifecycleError> {
        {
            let mut inner = self.inner.write().await;
            if inner.state != LifecycleState::Installed {
                return Err(LifecycleError::InvalidState {
                    operation: "activate",
                    state: inner.state,
                });
            }
            if !inner.skip_waiting {
                let waiting = inner
                    .consumers
                    .values()
                    .filter(|g| g.as_deref().is_some_and(|g| g != self.generation))
                    .count();
                if waiting > 0 {
                    info!(
                        generation = %self.generation,
                        consumers = waiting,
                        "Waiting for consumers of previous generation"
                    );
                    return Ok(ActivateOutcome::Waiting { consumers: waiting });
                }
            }
            inner.state = LifecycleState::Activating;
        }
        info!(generation = %self.generation, "Activating generation");

        let (deleted, retained) = match self.retire_stale().await {
            Ok(result) => result,
            Err(e) => {
                self.inner.write().await.state = LifecycleState::Installed;
                return Err(e.into());
            }
        };

        let claimed = {
            let mut inner = self.inner.write().await;
            inner.state = LifecycleState::Active;
            inner.serving = Some(self.generation.clone());
            Self::claim_all(&mut inner)
        };
        info!(
            generation = %self.generation,
            deleted = deleted.len(),
            retained = retained.len(),
            claimed,
            "Generation active"
        );

        Ok(ActivateOutcome::Activated(ActivationReport {
            generation: self.generation.clone(),
            deleted,
            retained,
            claimed,
        }))
    }

    /// Delete every other generation, then persist the pointer.
    async fn retire_stale(&self) -> Result<(Vec<String>, Vec<String>), StorageError> {
        let stale: Vec<String> = self
            .storage
            .generations()
            .await?
            .into_iter()
            .filter(|name| *name != self.generation)
            .collect();

        let results = join_all(stale.iter().map(|name| self.storage.delete_generation(name))).await;

        let mut deleted = Vec::new();
        let mut retained = Vec::new();
        for (name, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => {
                    debug!(generation = %name, "Stale generation deleted");
                    deleted.push(name);
                }
                Err(e) => {
                    warn!(generation = %name, error = %e, "Failed to delete stale generation");
                    retained.push(name);
                }
            }
        }

        self.storage
            .set_current_generation(Some(&self.generation))
            .await?;
        Ok((deleted, retained))
    }

    fn claim_all(inner: &mut ControllerState) -> usize {
        let serving = inner.serving.clone();
        let mut claimed = 0;
        for bound in inner.consumers.values_mut() {
            if *bound != serving {
                *bound = serving.clone();
                claimed += 1;
            }
        }
        claimed
    }

    /// Take control of every open consumer. Only meaningful while active.
    pub async fn claim(&self) -> Result<usize, LifecycleError> {
        let mut inner = self.inner.write().await;
        if inner.state != LifecycleState::Active {
            return Err(LifecycleError::InvalidState {
                operation: "claim",
                state: inner.state,
            });
        }
        Ok(Self::claim_all(&mut inner))
    }

    /// Open a consumer, controlled by the serving generation if there is one.
    pub async fn open_consumer(&self) -> ConsumerId {
        let mut inner = self.inner.write().await;
        let id = ConsumerId(inner.next_consumer);
        inner.next_consumer += 1;
        let bound = inner.serving.clone();
        inner.consumers.insert(id, bound);
        id
    }

    pub async fn close_consumer(&self, id: ConsumerId) -> bool {
        self.inner.write().await.consumers.remove(&id).is_some()
    }

    /// Generation controlling `id`, if any.
    pub async fn consumer_generation(&self, id: ConsumerId) -> Option<String> {
        self.inner.read().await.consumers.get(&id).cloned().flatten()
    }

    pub async fn consumer_count(&self) -> usize {
        self.inner.read().await.consumers.len()
    }

    /// Delete the configured generation and clear the pointer if it names it.
    pub async fn unregister(&self) -> Result<bool, LifecycleError> {
        {
            let inner = self.inner.read().await;
            if matches!(
                inner.state,
                LifecycleState::Installing | LifecycleState::Activating
            ) {
                return Err(LifecycleError::InvalidState {
                    operation: "unregister",
                    state: inner.state,
                });
            }
        }

        let deleted = self.storage.delete_generation(&self.generation).await?;
        if self.storage.current_generation().await?.as_deref() == Some(self.generation.as_str()) {
            self.storage.set_current_generation(None).await?;
        }

        let mut inner = self.inner.write().await;
        if inner.serving.as_deref() == Some(self.generation.as_str()) {
            inner.serving = None;
        }
        for bound in inner.consumers.values_mut() {
            if bound.as_deref() == Some(self.generation.as_str()) {
                *bound = None;
            }
        }
        inner.settle();
        info!(generation = %self.generation, deleted, "Generation unregistered");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseKind;
    use crate::store::{CachedEntry, EntrySummary, MemoryStorage};
    use crate::test_support::{url, StubNetwork};
    use async_trait::async_trait;
    use reqwest::Method;

    fn config(generation: &str, required: &[&str]) -> CacheConfig {
        CacheConfig {
            generation: generation.to_string(),
            required_assets: required.iter().map(|s| s.to_string()).collect(),
            ..CacheConfig::default()
        }
    }

    fn controller(
        config: &CacheConfig,
        storage: Arc<dyn CacheStorage>,
        network: StubNetwork,
    ) -> LifecycleController {
        LifecycleController::new(config, storage, Arc::new(network)).unwrap()
    }

    fn key(path: &str) -> RequestKey {
        RequestKey::new(&Method::GET, &url(path))
    }

    #[tokio::test]
    async fn test_install_succeeds_when_all_required_assets_load() {
        let storage = Arc::new(MemoryStorage::new());
        let network = StubNetwork::new().ok("/", "home").ok("/menu", "menu");
        let controller = controller(&config("v1", &["/", "/menu"]), storage.clone(), network);

        let report = controller.install().await.unwrap();
        assert_eq!(report.required_stored, 2);
        assert_eq!(controller.state().await, LifecycleState::Installed);
        assert!(storage.lookup("v1", &key("/menu")).await.unwrap().is_some());

        let outcome = controller.activate().await.unwrap();
        assert!(matches!(outcome, ActivateOutcome::Activated(_)));
        assert_eq!(controller.state().await, LifecycleState::Active);
        assert_eq!(storage.current_generation().await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_install_fails_on_404_and_discards_generation() {
        let storage = Arc::new(MemoryStorage::new());
        let network = StubNetwork::new()
            .ok("/", "home")
            .respond("/menu", Response::new(404, "missing"));
        let controller = controller(&config("v1", &["/", "/menu"]), storage.clone(), network);

        let err = controller.install().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Install(InstallError::RequiredAsset {
                source: NetworkError::BadStatus { status: 404, .. },
                ..
            })
        ));
        assert_eq!(controller.state().await, LifecycleState::Uninstalled);
        assert!(!storage.has_generation("v1").await.unwrap());
        assert_eq!(storage.current_generation().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_install_fails_on_network_error() {
        let storage = Arc::new(MemoryStorage::new());
        let network = StubNetwork::new().ok("/", "home");
        let controller = controller(&config("v1", &["/", "/menu"]), storage.clone(), network);

        let err = controller.install().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::Install(InstallError::RequiredAsset {
                source: NetworkError::Failed { .. },
                ..
            })
        ));
        assert!(storage.generations().await.unwrap().is_empty());
        assert!(controller.activate().await.is_err());
    }

    #[tokio::test]
    async fn test_best_effort_failures_do_not_block_install() {
        let storage = Arc::new(MemoryStorage::new());
        let network = StubNetwork::new()
            .ok("/", "home")
            .respond(
                "https://cdn.example.com/font.css",
                Response::new(200, "@font-face{}").with_kind(ResponseKind::Cors),
            );
        let mut config = config("v1", &["/"]);
        config.best_effort_assets = vec![
            "https://cdn.example.com/font.css".to_string(),
            "https://cdn.example.com/down.js".to_string(),
        ];
        let controller = controller(&config, storage.clone(), network);

        let report = controller.install().await.unwrap();
        assert_eq!(report.best_effort_stored, 1);
        assert_eq!(report.best_effort_failed, vec!["https://cdn.example.com/down.js"]);
        let font = RequestKey::new(&Method::GET, &url("https://cdn.example.com/font.css"));
        assert!(storage.lookup("v1", &font).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_reinstall_leaves_existing_generation_untouched() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .store("v1", key("/"), Response::new(200, "home"))
            .await
            .unwrap();

        let network = StubNetwork::new()
            .ok("/", "new home")
            .ok("https://cdn.example.com/font.css", "@font-face{}");
        let mut config = config("v1", &["/", "/menu"]);
        config.best_effort_assets = vec!["https://cdn.example.com/font.css".to_string()];
        let controller = controller(&config, storage.clone(), network);

        assert!(controller.install().await.is_err());
        assert!(storage.has_generation("v1").await.unwrap());
        let entries = storage.entries("v1").await.unwrap();
        assert_eq!(entries.len(), 1);
        let home = storage.lookup("v1", &key("/")).await.unwrap().unwrap();
        assert_eq!(home.response.body, b"home");
    }

    #[tokio::test]
    async fn test_failed_install_keeps_previous_generation_serving() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .store("v1", key("/"), Response::new(200, "old home"))
            .await
            .unwrap();
        storage.set_current_generation(Some("v1")).await.unwrap();

        let network = StubNetwork::new().ok("/", "new");
        let controller = controller(&config("v2", &["/", "/menu"]), storage.clone(), network);
        let err = controller.register().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Install(_)));

        assert_eq!(controller.state().await, LifecycleState::Active);
        assert_eq!(controller.serving_generation().await.as_deref(), Some("v1"));
        assert_eq!(storage.generations().await.unwrap(), vec!["v1"]);
        assert_eq!(storage.current_generation().await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn test_activation_leaves_exactly_one_generation() {
        let storage = Arc::new(MemoryStorage::new());
        for old in ["bitmerchant-v0", "legacy", "v1"] {
            storage.open_generation(old).await.unwrap();
        }
        storage.set_current_generation(Some("v1")).await.unwrap();

        let network = StubNetwork::new().ok("/", "home");
        let controller = controller(&config("v2", &["/"]), storage.clone(), network);
        let registration = controller.register().await.unwrap();

        let Registration::Installed {
            activation: ActivateOutcome::Activated(report),
            ..
        } = registration
        else {
            panic!("expected install and activation, got {:?}", registration);
        };
        assert_eq!(report.deleted, vec!["bitmerchant-v0", "legacy", "v1"]);
        assert!(report.retained.is_empty());
        assert_eq!(storage.generations().await.unwrap(), vec!["v2"]);
        assert_eq!(storage.current_generation().await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_register_resumes_current_generation_without_network() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open_generation("v1").await.unwrap();
        storage.set_current_generation(Some("v1")).await.unwrap();

        let network = Arc::new(StubNetwork::new());
        let controller =
            LifecycleController::new(&config("v1", &["/"]), storage, network.clone()).unwrap();

        let registration = controller.register().await.unwrap();
        assert_eq!(
            registration,
            Registration::Resumed {
                generation: "v1".to_string()
            }
        );
        assert_eq!(network.call_count(), 0);
        assert_eq!(controller.state().await, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_activation_waits_for_old_consumers_without_skip_wait() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open_generation("v1").await.unwrap();
        storage.set_current_generation(Some("v1")).await.unwrap();

        let mut config = config("v2", &["/"]);
        config.skip_waiting = false;
        let controller = controller(&config, storage.clone(), StubNetwork::new().ok("/", "home"));
        controller.restore().await.unwrap();
        let page = controller.open_consumer().await;
        assert_eq!(controller.consumer_generation(page).await.as_deref(), Some("v1"));

        controller.install().await.unwrap();
        assert_eq!(
            controller.activate().await.unwrap(),
            ActivateOutcome::Waiting { consumers: 1 }
        );
        assert_eq!(controller.state().await, LifecycleState::Installed);
        assert_eq!(controller.serving_generation().await.as_deref(), Some("v1"));

        assert!(controller.close_consumer(page).await);
        assert!(matches!(
            controller.activate().await.unwrap(),
            ActivateOutcome::Activated(_)
        ));
    }

    #[tokio::test]
    async fn test_skip_waiting_activates_and_claims_consumers() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open_generation("v1").await.unwrap();
        storage.set_current_generation(Some("v1")).await.unwrap();

        let mut config = config("v2", &["/"]);
        config.skip_waiting = false;
        let controller = controller(&config, storage, StubNetwork::new().ok("/", "home"));
        controller.restore().await.unwrap();
        let first = controller.open_consumer().await;
        let second = controller.open_consumer().await;

        controller.install().await.unwrap();
        controller.skip_waiting().await;
        let ActivateOutcome::Activated(report) = controller.activate().await.unwrap() else {
            panic!("expected activation");
        };
        assert_eq!(report.claimed, 2);
        for id in [first, second] {
            assert_eq!(controller.consumer_generation(id).await.as_deref(), Some("v2"));
        }
    }

    #[tokio::test]
    async fn test_operations_out_of_order_are_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let network = StubNetwork::new().ok("/", "home");
        let controller = controller(&config("v1", &["/"]), storage, network);

        assert!(matches!(
            controller.activate().await,
            Err(LifecycleError::InvalidState {
                operation: "activate",
                state: LifecycleState::Uninstalled
            })
        ));
        assert!(matches!(
            controller.claim().await,
            Err(LifecycleError::InvalidState { operation: "claim", .. })
        ));
    }

    #[tokio::test]
    async fn test_unregister_clears_pointer() {
        let storage = Arc::new(MemoryStorage::new());
        let network = StubNetwork::new().ok("/", "home");
        let controller = controller(&config("v1", &["/"]), storage.clone(), network);
        controller.register().await.unwrap();
        let page = controller.open_consumer().await;

        assert!(controller.unregister().await.unwrap());
        assert_eq!(controller.state().await, LifecycleState::Uninstalled);
        assert_eq!(controller.serving_generation().await, None);
        assert_eq!(controller.consumer_generation(page).await, None);
        assert_eq!(storage.current_generation().await.unwrap(), None);
        assert!(storage.generations().await.unwrap().is_empty());
    }

    /// Memory storage that refuses to delete one generation.
    struct StickyStorage {
        inner: MemoryStorage,
        sticky: &'static str,
    }

    #[async_trait]
    impl CacheStorage for StickyStorage {
        async fn generations(&self) -> Result<Vec<String>, StorageError> {
            self.inner.generations().await
        }
        async fn has_generation(&self, name: &str) -> Result<bool, StorageError> {
            self.inner.has_generation(name).await
        }
        async fn open_generation(&self, name: &str) -> Result<(), StorageError> {
            self.inner.open_generation(name).await
        }
        async fn delete_generation(&self, name: &str) -> Result<bool, StorageError> {
            if name == self.sticky {
                return Err(StorageError::Unavailable(format!("{} is locked", name)));
            }
            self.inner.delete_generation(name).await
        }
        async fn lookup(
            &self,
            generation: &str,
            key: &RequestKey,
        ) -> Result<Option<CachedEntry>, StorageError> {
            self.inner.lookup(generation, key).await
        }
        async fn store(
            &self,
            generation: &str,
            key: RequestKey,
            response: Response,
        ) -> Result<(), StorageError> {
            self.inner.store(generation, key, response).await
        }
        async fn store_existing(
            &self,
            generation: &str,
            key: RequestKey,
            response: Response,
        ) -> Result<bool, StorageError> {
            self.inner.store_existing(generation, key, response).await
        }
        async fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>, StorageError> {
            self.inner.entries(generation).await
        }
        async fn current_generation(&self) -> Result<Option<String>, StorageError> {
            self.inner.current_generation().await
        }
        async fn set_current_generation(&self, name: Option<&str>) -> Result<(), StorageError> {
            self.inner.set_current_generation(name).await
        }
    }

    #[tokio::test]
    async fn test_failed_deletion_is_left_behind() {
        let storage = Arc::new(StickyStorage {
            inner: MemoryStorage::new(),
            sticky: "v0",
        });
        storage.open_generation("v0").await.unwrap();
        storage.open_generation("v1").await.unwrap();

        let network = StubNetwork::new().ok("/", "home");
        let controller = controller(&config("v2", &["/"]), storage.clone(), network);
        controller.install().await.unwrap();
        let ActivateOutcome::Activated(report) = controller.activate().await.unwrap() else {
            panic!("expected activation");
        };

        assert_eq!(report.deleted, vec!["v1"]);
        assert_eq!(report.retained, vec!["v0"]);
        assert_eq!(controller.state().await, LifecycleState::Active);
        assert_eq!(storage.generations().await.unwrap(), vec!["v0", "v2"]);
    }
}
