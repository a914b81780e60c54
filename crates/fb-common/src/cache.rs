use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a batch run wants file content cached across operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    /// No caching; every handler read hits the filesystem.
    #[default]
    None,
    /// A fresh cache scoped to one batch run.
    Session,
    /// A caller-owned cache shared across runs.
    Persistent,
}

/// Content cache keyed by path string.
///
/// Misses are `None`, never errors — callers treat the cache as purely
/// opportunistic. Internally synchronized so handlers running in parallel
/// can share one instance.
#[derive(Debug, Default)]
pub struct FileCache {
    entries: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Arc<Vec<u8>>> {
        self.entries
            .lock()
            .map(|map| map.get(path).cloned())
            .unwrap_or(None)
    }

    pub fn set(&self, path: &str, content: Vec<u8>) {
        if let Ok(mut map) = self.entries.lock() {
            map.insert(path.to_string(), Arc::new(content));
        }
    }

    pub fn has(&self, path: &str) -> bool {
        self.entries
            .lock()
            .map(|map| map.contains_key(path))
            .unwrap_or(false)
    }

    pub fn delete(&self, path: &str) -> bool {
        self.entries
            .lock()
            .map(|mut map| map.remove(path).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.lock() {
            map.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
