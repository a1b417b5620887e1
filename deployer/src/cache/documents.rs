//! Parsed document cache keyed by file path and modification time

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Document cache entry
#[derive(Debug, Clone)]
pub struct DocumentCacheEntry<T> {
    pub document: T,
    pub modified: SystemTime,
    pub cached_at: u128,
}

/// In-memory cache of parsed JSON documents (templates, applications).
///
/// An entry is only returned while the file's modification time still matches
/// the one recorded at insert time. Not safe against concurrent writers of the
/// underlying files.
pub struct DocumentCache<T: Clone> {
    entries: RwLock<HashMap<PathBuf, DocumentCacheEntry<T>>>,
    capacity: usize,
}

impl<T: Clone> DocumentCache<T> {
    /// Create a new document cache
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Get a document if it is cached for exactly this modification time
    pub fn get(&self, path: &Path, modified: SystemTime) -> Option<T> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(path)
            .filter(|entry| entry.modified == modified)
            .map(|entry| entry.document.clone())
    }

    /// Insert a document, evicting the oldest entry at capacity
    pub fn insert(&self, path: PathBuf, modified: SystemTime, document: T) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if entries.len() >= self.capacity && !entries.contains_key(&path) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(path, _)| path.clone())
            {
                entries.remove(&oldest);
            }
        }

        let cached_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();

        entries.insert(
            path,
            DocumentCacheEntry {
                document,
                modified,
                cached_at,
            },
        );
    }

    /// Drop the entry for a path, e.g. after writing the file
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(path);
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Get cache size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
