use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{check_generation_name, CacheStorage, CachedEntry, EntrySummary};
use crate::error::StorageError;
use crate::http::{RequestKey, Response};

#[derive(Debug, Default)]
struct MemoryState {
    generations: BTreeMap<String, HashMap<RequestKey, CachedEntry>>,
    current: Option<String>,
}

/// In-process storage. Every operation takes the lock once, so each key
/// write is atomic with respect to concurrent readers.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn generations(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.state.read().await.generations.keys().cloned().collect())
    }

    async fn has_generation(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.state.read().await.generations.contains_key(name))
    }

    async fn open_generation(&self, name: &str) -> Result<(), StorageError> {
        check_generation_name(name)?;
        self.state
            .write()
            .await
            .generations
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.state.write().await.generations.remove(name).is_some())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .generations
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn store(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), StorageError> {
        check_generation_name(generation)?;
        let entry = CachedEntry::new(key.clone(), response);
        self.state
            .write()
            .await
            .generations
            .entry(generation.to_string())
            .or_default()
            .insert(key, entry);
        Ok(())
    }

    async fn store_existing(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        let Some(entries) = state.generations.get_mut(generation) else {
            return Ok(false);
        };
        let entry = CachedEntry::new(key.clone(), response);
        entries.insert(key, entry);
        Ok(true)
    }

    async fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>, StorageError> {
        let state = self.state.read().await;
        let mut summaries: Vec<EntrySummary> = state
            .generations
            .get(generation)
            .map(|entries| entries.values().map(CachedEntry::summary).collect())
            .unwrap_or_default();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    async fn current_generation(&self) -> Result<Option<String>, StorageError> {
        Ok(self.state.read().await.current.clone())
    }

    async fn set_current_generation(&self, name: Option<&str>) -> Result<(), StorageError> {
        self.state.write().await.current = name.map(str::to_string);
        Ok(())
    }
}
