use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::context::Params;
use crate::error::{CacheError, CacheResult};

/// Default number of documents held by the in-memory layer
pub const DEFAULT_MEMORY_ENTRIES: u64 = 10_000;

/// Deterministic identity of a request: host, full path and parameters.
///
/// Parameters are kept sorted by name, so the order they were supplied in
/// never changes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    host: String,
    path: String,
    params: Vec<(String, String)>,
    key: String,
}

impl RequestFingerprint {
    pub fn new(host: &str, path: &str, params: &Params) -> Self {
        let params: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_wire()))
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(host.as_bytes());
        hasher.update([0u8]);
        hasher.update(path.as_bytes());
        for (name, value) in &params {
            hasher.update([0u8]);
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
        }
        let key = format!("request_{:x}", hasher.finalize());

        Self {
            host: host.to_string(),
            path: path.to_string(),
            params,
            key,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Stable cache key derived from the fingerprint
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A raw document and the instant after which it must not be reused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub content: String,
    pub valid_until: DateTime<Utc>,
}

impl CachedDocument {
    pub fn new(content: impl Into<String>, valid_until: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            valid_until,
        }
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }
}

/// Pluggable request cache consulted by every call.
///
/// Implementations need not check freshness: the client discards stale
/// entries itself and calls [`CacheStore::delete`] for them.
///
/// Stores must be `Send + Sync` because a root [`Context`](crate::Context)
/// and every context derived from it may be moved to or shared with other
/// threads. The client adds no locking of its own, so a store built on
/// single-threaded state such as `RefCell` has to wrap it in a `Mutex`.
pub trait CacheStore: Send + Sync {
    fn retrieve(&self, request: &RequestFingerprint) -> CacheResult<Option<CachedDocument>>;

    /// Only called after a miss, with a positive freshness window
    fn store(&self, request: &RequestFingerprint, document: CachedDocument) -> CacheResult<()>;

    fn delete(&self, request: &RequestFingerprint) -> CacheResult<()>;
}

/// Slow persistent layer under a [`TieredCache`]
pub trait CacheBackend: Send + Sync {
    fn fetch(&self, key: &str) -> CacheResult<Option<CachedDocument>>;

    fn save(&self, key: &str, document: &CachedDocument) -> CacheResult<()>;

    fn delete(&self, key: &str) -> CacheResult<()>;
}

/// Backend that persists nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl CacheBackend for NullBackend {
    fn fetch(&self, _key: &str) -> CacheResult<Option<CachedDocument>> {
        Ok(None)
    }

    fn save(&self, _key: &str, _document: &CachedDocument) -> CacheResult<()> {
        Ok(())
    }

    fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }
}

/// Disk cache implementation using cacache for persistent, corruption-resistant storage
#[derive(Debug, Clone)]
pub struct DiskCache {
    cache_dir: PathBuf,
}

impl DiskCache {
    /// The directory must already exist
    pub fn new(cache_dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let cache_dir = cache_dir.into();
        if !cache_dir.is_dir() {
            return Err(CacheError::Directory { path: cache_dir });
        }
        Ok(Self { cache_dir })
    }

    pub fn directory(&self) -> &Path {
        &self.cache_dir
    }

    /// Number of live entries in the on-disk index
    pub fn entry_count(&self) -> usize {
        cacache::index::ls(&self.cache_dir)
            .filter_map(|entry| entry.ok())
            .count()
    }

    pub fn clear(&self) -> CacheResult<()> {
        cacache::clear_sync(&self.cache_dir).map_err(|e| CacheError::Delete {
            key: "*".to_string(),
            details: e.to_string(),
        })
    }
}

impl CacheBackend for DiskCache {
    fn fetch(&self, key: &str) -> CacheResult<Option<CachedDocument>> {
        let data = match cacache::read_sync(&self.cache_dir, key) {
            Ok(data) => data,
            Err(cacache::Error::EntryNotFound(_, _)) => return Ok(None),
            Err(e) => {
                return Err(CacheError::Read {
                    key: key.to_string(),
                    details: e.to_string(),
                });
            }
        };

        let document = serde_json::from_slice(&data).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            details: e.to_string(),
        })?;
        Ok(Some(document))
    }

    fn save(&self, key: &str, document: &CachedDocument) -> CacheResult<()> {
        let data = serde_json::to_vec(document).map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            details: e.to_string(),
        })?;

        cacache::write_sync(&self.cache_dir, key, data).map_err(|e| CacheError::Write {
            key: key.to_string(),
            details: e.to_string(),
        })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<()> {
        match cacache::remove_sync(&self.cache_dir, key) {
            Ok(()) | Err(cacache::Error::EntryNotFound(_, _)) => Ok(()),
            Err(e) => Err(CacheError::Delete {
                key: key.to_string(),
                details: e.to_string(),
            }),
        }
    }
}

/// Read-through/write-through memory layer over a backend.
///
/// A memory miss falls back to the backend before it counts as a miss, and a
/// backend hit repopulates memory.
pub struct TieredCache<B: CacheBackend> {
    memory: Cache<String, Arc<CachedDocument>>,
    backend: B,
}

/// Memory-only store
pub type MemoryCache = TieredCache<NullBackend>;

/// Memory layer over an on-disk cacache directory
pub type FileCache = TieredCache<DiskCache>;

impl<B: CacheBackend> TieredCache<B> {
    pub fn with_backend(backend: B, max_memory_entries: u64) -> Self {
        let memory = Cache::builder().max_capacity(max_memory_entries).build();
        Self { memory, backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn contains(&self, request: &RequestFingerprint) -> bool {
        self.memory.contains_key(request.key())
    }

    /// Entries currently held in memory
    pub fn memory_entry_count(&self) -> u64 {
        self.memory.run_pending_tasks();
        self.memory.entry_count()
    }

    pub fn clear_memory(&self) {
        self.memory.invalidate_all();
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_backend(NullBackend, DEFAULT_MEMORY_ENTRIES)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCache {
    /// File cache rooted at an existing directory
    pub fn open(cache_dir: impl Into<PathBuf>) -> CacheResult<Self> {
        Ok(Self::with_backend(DiskCache::new(cache_dir)?, DEFAULT_MEMORY_ENTRIES))
    }
}

impl<B: CacheBackend> CacheStore for TieredCache<B> {
    fn retrieve(&self, request: &RequestFingerprint) -> CacheResult<Option<CachedDocument>> {
        let key = request.key();

        if let Some(document) = self.memory.get(key) {
            return Ok(Some(document.as_ref().clone()));
        }

        match self.backend.fetch(key)? {
            Some(document) => {
                debug!(key, path = request.path(), "Cache backend hit");
                self.memory
                    .insert(key.to_string(), Arc::new(document.clone()));
                Ok(Some(document))
            }
            None => Ok(None),
        }
    }

    fn store(&self, request: &RequestFingerprint, document: CachedDocument) -> CacheResult<()> {
        let key = request.key().to_string();
        self.backend.save(&key, &document)?;
        self.memory.insert(key, Arc::new(document));
        Ok(())
    }

    fn delete(&self, request: &RequestFingerprint) -> CacheResult<()> {
        self.memory.invalidate(request.key());
        self.backend.delete(request.key())
    }
}
