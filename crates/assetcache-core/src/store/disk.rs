//! Directory-backed generation storage.
//!
//! Layout under the cache root:
//!
//! ```text
//! current.json                              pointer to the current generation
//! generations/<name>/<hash>.json            entry metadata (key, status, headers)
//! generations/<name>/<hash>.<nonce>.body    raw response body
//! ```
//!
//! `<hash>` is the hex SHA-256 of the request key. Each store writes its body
//! under a fresh nonce name, then swaps in the metadata that references it
//! with a single rename, so a reader sees either the old entry or the new
//! one. The superseded body is removed afterwards.
//!
//! Within one process, writes and reads of the same key are serialized on a
//! striped lock, and deleting a generation excludes writes into it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{check_generation_name, CacheStorage, CachedEntry, EntrySummary};
use crate::error::StorageError;
use crate::http::{RequestKey, Response, ResponseKind};

const GENERATIONS_DIR: &str = "generations";
const POINTER_FILE: &str = "current.json";
const META_EXT: &str = "json";
const BODY_EXT: &str = "body";
const TMP_EXT: &str = "tmp";

/// Number of per-key write locks.
const LOCK_STRIPES: usize = 64;

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: RequestKey,
    status: u16,
    headers: Vec<(String, String)>,
    url: Option<String>,
    kind: ResponseKind,
    redirected: bool,
    /// File name of the body within the generation directory.
    body_file: String,
    body_len: usize,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Pointer {
    generation: String,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn entry_hash(key: &RequestKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Unique within this process and across restarts.
fn nonce() -> String {
    format!(
        "{:x}-{:x}",
        Utc::now().timestamp_micros(),
        WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.{}", nonce(), TMP_EXT));
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).await.map_err(io_error(&tmp))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(io_error(path)(e));
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path)(e)),
    }
}

async fn remove_optional(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

fn parse_meta(path: &Path, bytes: &[u8]) -> Result<EntryMeta, StorageError> {
    serde_json::from_slice(bytes).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

pub struct DiskStorage {
    root: PathBuf,
    /// Held shared by writes, exclusively by generation deletion.
    layout: RwLock<()>,
    stripes: Vec<Mutex<()>>,
}

impl DiskStorage {
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        let generations = root.join(GENERATIONS_DIR);
        fs::create_dir_all(&generations)
            .await
            .map_err(io_error(&generations))?;
        Ok(Self {
            root,
            layout: RwLock::new(()),
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> Result<PathBuf, StorageError> {
        check_generation_name(name)?;
        Ok(self.root.join(GENERATIONS_DIR).join(name))
    }

    fn meta_path(dir: &Path, hash: &str) -> PathBuf {
        dir.join(format!("{}.{}", hash, META_EXT))
    }

    fn stripe(&self, hash: &str) -> &Mutex<()> {
        let index = usize::from_str_radix(&hash[..2], 16).unwrap_or(0);
        &self.stripes[index % self.stripes.len()]
    }

    fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER_FILE)
    }

    /// Write one entry into an existing generation directory.
    async fn write_entry(
        &self,
        dir: &Path,
        key: RequestKey,
        response: Response,
    ) -> Result<(), StorageError> {
        let hash = entry_hash(&key);
        let meta_path = Self::meta_path(dir, &hash);
        let body_file = format!("{}.{}.{}", hash, nonce(), BODY_EXT);
        let body_path = dir.join(&body_file);

        let meta = EntryMeta {
            key,
            status: response.status,
            headers: response.headers,
            url: response.url,
            kind: response.kind,
            redirected: response.redirected,
            body_file: body_file.clone(),
            body_len: response.body.len(),
            stored_at: Utc::now(),
        };
        let meta_bytes =
            serde_json::to_vec_pretty(&meta).map_err(|source| StorageError::Corrupt {
                path: meta_path.clone(),
                source,
            })?;

        // Unreferenced until the metadata rename, so no temp file is needed
        fs::write(&body_path, &response.body)
            .await
            .map_err(io_error(&body_path))?;

        let _guard = self.stripe(&hash).lock().await;
        let previous = match read_optional(&meta_path).await? {
            Some(bytes) => parse_meta(&meta_path, &bytes).ok().map(|m| m.body_file),
            None => None,
        };
        if let Err(e) = write_atomic(&meta_path, &meta_bytes).await {
            let _ = fs::remove_file(&body_path).await;
            return Err(e);
        }

        if let Some(old) = previous.filter(|old| *old != body_file) {
            let old_path = dir.join(old);
            if let Err(e) = remove_optional(&old_path).await {
                warn!(path = %old_path.display(), error = %e, "Failed to remove superseded body");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn generations(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join(GENERATIONS_DIR);
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_error(&dir))? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn has_generation(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.generation_dir(name)?;
        match fs::metadata(&dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }

    async fn open_generation(&self, name: &str) -> Result<(), StorageError> {
        let dir = self.generation_dir(name)?;
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, StorageError> {
        let dir = self.generation_dir(name)?;
        let _layout = self.layout.write().await;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!(generation = name, "Generation directory removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError> {
        let dir = self.generation_dir(generation)?;
        let hash = entry_hash(key);
        let meta_path = Self::meta_path(&dir, &hash);

        let _guard = self.stripe(&hash).lock().await;
        let Some(meta_bytes) = read_optional(&meta_path).await? else {
            return Ok(None);
        };
        let meta = parse_meta(&meta_path, &meta_bytes)?;
        let Some(body_file) = Path::new(&meta.body_file).file_name() else {
            return Ok(None);
        };
        // Missing body: the generation is being deleted underneath us
        let Some(body) = read_optional(&dir.join(body_file)).await? else {
            return Ok(None);
        };

        Ok(Some(CachedEntry {
            key: meta.key,
            response: Response {
                status: meta.status,
                headers: meta.headers,
                body,
                url: meta.url,
                kind: meta.kind,
                redirected: meta.redirected,
            },
            stored_at: meta.stored_at,
        }))
    }

    async fn store(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), StorageError> {
        let dir = self.generation_dir(generation)?;
        let _layout = self.layout.read().await;
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;
        self.write_entry(&dir, key, response).await
    }

    async fn store_existing(
        &self,
        generation: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<bool, StorageError> {
        let dir = self.generation_dir(generation)?;
        let _layout = self.layout.read().await;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(io_error(&dir)(e)),
        }
        self.write_entry(&dir, key, response).await?;
        Ok(true)
    }

    async fn entries(&self, generation: &str) -> Result<Vec<EntrySummary>, StorageError> {
        let dir = self.generation_dir(generation)?;
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            let Some(bytes) = read_optional(&path).await? else {
                continue;
            };
            let meta = parse_meta(&path, &bytes)?;
            summaries.push(EntrySummary {
                key: meta.key,
                status: meta.status,
                bytes: meta.body_len,
                stored_at: meta.stored_at,
            });
        }
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(summaries)
    }

    async fn current_generation(&self) -> Result<Option<String>, StorageError> {
        let path = self.pointer_path();
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let pointer: Pointer =
            serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?;
        Ok(Some(pointer.generation))
    }

    async fn set_current_generation(&self, name: Option<&str>) -> Result<(), StorageError> {
        let path = self.pointer_path();
        match name {
            Some(name) => {
                check_generation_name(name)?;
                let pointer = Pointer {
                    generation: name.to_string(),
                };
                let bytes = serde_json::to_vec_pretty(&pointer).map_err(|source| {
                    StorageError::Corrupt {
                        path: path.clone(),
                        source,
                    }
                })?;
                write_atomic(&path, &bytes).await
            }
            None => match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(&path)(e)),
            },
        }
    }
}
