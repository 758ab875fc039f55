//! Lookup caches for reference resolution and variation generation.
//!
//! A [`LookupCache`] is an explicit `get`/`put` map guarded by a lock, with
//! the key composition chosen by a [`CacheKeyPolicy`]. Caches can be
//! loaded from and flushed to a JSON file so repeated runs do not hit the
//! external services again.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{write_atomic, StorageError};

/// How cache keys are composed from a lookup.
///
/// `NameOnly` reuses a result across kernel versions, which is what
/// long-running graph builds pinned to one release want. `NameAndVersion`
/// keeps results per version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyPolicy {
    #[default]
    NameOnly,
    NameAndVersion,
}

impl CacheKeyPolicy {
    /// Cache key for a lookup of `name` against `version`.
    #[must_use]
    pub fn key(self, name: &str, version: &str) -> String {
        match self {
            Self::NameOnly => name.to_string(),
            Self::NameAndVersion => format!("{name}@{version}"),
        }
    }
}

impl FromStr for CacheKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name_only" | "name" => Ok(Self::NameOnly),
            "name_and_version" | "name_version" => Ok(Self::NameAndVersion),
            other => Err(format!("unknown cache key policy '{other}'")),
        }
    }
}

impl fmt::Display for CacheKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameOnly => write!(f, "name_only"),
            Self::NameAndVersion => write!(f, "name_and_version"),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit ratio in `[0, 1]`; 0 when nothing was looked up.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.hits as f64 / total as f64;
            rate
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile<V> {
    policy: CacheKeyPolicy,
    entries: HashMap<String, V>,
}

/// Keyed result cache.
///
/// Values are cloned out; both found and not-found results are cacheable
/// (store an empty value for "not found").
#[derive(Debug)]
pub struct LookupCache<V> {
    name: &'static str,
    policy: CacheKeyPolicy,
    entries: RwLock<HashMap<String, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> LookupCache<V> {
    /// Creates an empty cache. `name` only appears in log lines.
    #[must_use]
    pub fn new(name: &'static str, policy: CacheKeyPolicy) -> Self {
        Self {
            name,
            policy,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn policy(&self) -> CacheKeyPolicy {
        self.policy
    }

    /// Cached value for a lookup, counting the hit or miss.
    pub fn get(&self, name: &str, version: &str) -> Option<V> {
        let key = self.policy.key(name, version);
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match guard.get(&key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache = self.name, key = %key, "cache hit");
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores a value, replacing any previous one.
    pub fn put(&self, name: &str, version: &str, value: V) {
        let key = self.policy.key(name, version);
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(key, value);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<V: Clone + Serialize + DeserializeOwned> LookupCache<V> {
    /// Loads a cache file. A missing file gives an empty cache.
    ///
    /// A file written under a different key policy is ignored: its keys
    /// would never match.
    pub fn load(name: &'static str, policy: CacheKeyPolicy, path: &Path) -> Result<Self, StorageError> {
        let cache = Self::new(name, policy);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cache),
            Err(e) => return Err(e.into()),
        };
        let file: CacheFile<V> = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::SerializationError(format!("{}: {e}", path.display())))?;
        if file.policy != policy {
            debug!(cache = name, stored = %file.policy, wanted = %policy, "cache file policy differs; starting empty");
            return Ok(cache);
        }
        let count = file.entries.len();
        *cache.entries.write().unwrap_or_else(PoisonError::into_inner) = file.entries;
        debug!(cache = name, entries = count, path = %path.display(), "loaded lookup cache");
        Ok(cache)
    }

    /// Writes the cache to `path`, replacing it atomically.
    pub fn flush(&self, path: &Path) -> Result<(), StorageError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner).clone();
        let file = CacheFile {
            policy: self.policy,
            entries,
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        write_atomic(path, &bytes)
    }
}
