//! A bounded, short-lived cache of blob content shared by all views.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use crate::fs::slice_range;
use crate::lock::ReadWriteLock;
use crate::object::Id;
use crate::source::{ObjectSource, Result};

#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Blobs smaller than this are fetched on every read and never cached.
    pub min_file_size: u64,

    /// Upper bound on the sum of cached blob lengths.
    pub max_cache_size: u64,

    /// Entries not touched for this long are dropped.
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            min_file_size: 131_072,
            max_cache_size: 1_073_741_824,
            max_age: Duration::from_secs(1),
        }
    }
}

/// Caches whole blobs by (repository, path) so that the run of small
/// sequential reads a kernel issues for one file costs one fetch.
///
/// Expired entries are swept on every `lookup` and `fetch_or_insert`;
/// there is no background thread. When the budget is exhausted new blobs are simply
/// not admitted; nothing is evicted to make room.
pub struct ContentCache {
    config: CacheConfig,
    table: ReadWriteLock<CacheTable>,
}

#[derive(Default)]
struct CacheTable {
    repos: HashMap<PathBuf, HashMap<String, CacheEntry>>,
    total: u64,
}

struct CacheEntry {
    touched: Mutex<Instant>,
    id: Id,
    bytes: Arc<Vec<u8>>,
}

impl CacheEntry {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl ContentCache {
    pub fn new(config: CacheConfig) -> Self {
        ContentCache {
            config,
            table: ReadWriteLock::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return `size` bytes at `offset` of a cached blob, if one is live.
    pub fn lookup(&self, repo: &Path, path: &str, size: usize, offset: u64) -> Option<Vec<u8>> {
        self.clear_expired();
        self.cached(repo, path, None)
            .map(|bytes| slice_range(&bytes, size, offset))
    }

    /// Serve a read from the cache, fetching the whole blob from `source`
    /// on a miss and offering it for admission.
    #[allow(clippy::too_many_arguments)]
    pub fn fetch_or_insert(
        &self,
        source: &dyn ObjectSource,
        repo: &Path,
        path: &str,
        id: &Id,
        declared_size: u64,
        size: usize,
        offset: u64,
    ) -> Result<Vec<u8>> {
        self.clear_expired();

        if let Some(bytes) = self.cached(repo, path, Some(id)) {
            trace!(repo = %repo.display(), path, "content cache hit");
            return Ok(slice_range(&bytes, size, offset));
        }

        let bytes = source.fetch_blob(repo, id)?;
        let range = slice_range(&bytes, size, offset);

        if declared_size >= self.config.min_file_size {
            self.admit(repo, path, id, bytes);
        }

        Ok(range)
    }

    /// Drop every entry belonging to `repo`.
    pub fn invalidate_repo(&self, repo: &Path) {
        let mut table = self.table.write();
        if let Some(entries) = table.repos.remove(repo) {
            let freed: u64 = entries.values().map(CacheEntry::len).sum();
            table.total -= freed;
        }
    }

    /// Sum of the lengths of all cached blobs.
    pub fn total_bytes(&self) -> u64 {
        self.table.read().total
    }

    fn cached(&self, repo: &Path, path: &str, id: Option<&Id>) -> Option<Arc<Vec<u8>>> {
        let table = self.table.read();
        let entry = table.repos.get(repo)?.get(path)?;

        if let Some(id) = id {
            if entry.id != *id {
                return None;
            }
        }

        let mut touched = entry.touched.lock();
        if touched.elapsed() >= self.config.max_age * 2 {
            return None;
        }
        *touched = Instant::now();

        Some(entry.bytes.clone())
    }

    fn admit(&self, repo: &Path, path: &str, id: &Id, bytes: Vec<u8>) {
        let len = bytes.len() as u64;
        let mut table = self.table.write();

        let replaced = table
            .repos
            .get(repo)
            .and_then(|entries| entries.get(path))
            .map(CacheEntry::len)
            .unwrap_or(0);

        if table.total - replaced + len > self.config.max_cache_size {
            trace!(repo = %repo.display(), path, len, "content cache full");
            return;
        }

        table.total = table.total - replaced + len;
        table.repos.entry(repo.to_owned()).or_default().insert(
            path.to_owned(),
            CacheEntry {
                touched: Mutex::new(Instant::now()),
                id: *id,
                bytes: Arc::new(bytes),
            },
        );
    }

    fn clear_expired(&self) {
        let max_age = self.config.max_age;
        let mut table = self.table.write();
        let mut freed = 0;

        for entries in table.repos.values_mut() {
            entries.retain(|_, entry| {
                let keep = entry.touched.lock().elapsed() <= max_age;
                if !keep {
                    freed += entry.len();
                }
                keep
            });
        }

        table.repos.retain(|_, entries| !entries.is_empty());
        table.total -= freed;
    }
}

impl Default for ContentCache {
    fn default() -> Self {
        ContentCache::new(CacheConfig::default())
    }
}
