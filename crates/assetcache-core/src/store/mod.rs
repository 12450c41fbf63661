//! Generation storage.
//!
//! A storage backend holds any number of named generations, each mapping
//! request identities to stored responses, plus a pointer naming the
//! current generation. The pointer is the only state that survives a
//! restart besides the generations themselves.
//!
//! Backends:
//! - `MemoryStorage`: in-process, lost on exit
//! - `DiskStorage`: one directory per generation under a cache root

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::http::{RequestKey, Response};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// An immutable snapshot of a response as captured at `stored_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub key: RequestKey,
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CachedEntry {
    pub fn new(key: RequestKey, response: Response) -> Self {
        Self {
            key,
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key.clone(),
            status: self.response.status,
            bytes: self.response.body.len(),
            stored_at: self.stored_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub key: RequestKey,
    pub status: u16,
    pub bytes: usize,
    pub stored_at: DateTime<Utc>,
}

/// Per-key atomic store of named generations.
///
/// `store` opens the generation if it does not exist yet, while
/// `store_existing` never brings back a deleted one. Every other operation
/// treats a missing generation as empty.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of all generations, in a stable order.
    async fn generations(&self) -> Result<Vec<String>, StorageError>;

    async fn has_generation(&self, name: &str) -> Result<bool, StorageError>;

    /// Create the generation if missing.
    async fn open_generation(&self, name: &str) -> Result<(), StorageError>;

    /// Remove a generation and all its entries. Returns false if it did not exist.
    async fn delete_generation(&self, name: &str) -> Result<bool, StorageError>;

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError>;

    /// Store or overwrite the entry for `key`.
    async fn store(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), StorageError>;

    /// Store or overwrite the entry only if `generation` exists, checked
    /// atomically with the write. Returns false if nothing was written.
    async fn store_existing(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<bool, StorageError>;

    async fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>, StorageError>;

    async fn current_generation(&self) -> Result<Option<String>, StorageError>;

    async fn set_current_generation(&self, name: Option<&str>) -> Result<(), StorageError>;
}

/// Reject names that cannot serve as a single path component.
pub(crate) fn check_generation_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
