//! Conversion cache: fingerprint → finished result, with hit accounting.
//!
//! The cache is the reason repeated conversions of the same document cost
//! nothing: a [`crate::fingerprint::DocumentFingerprint`] identifies the
//! bytes + config pair, and a successful conversion is written through here
//! exactly once. Lookups on later requests short-circuit the entire
//! pipeline.
//!
//! ## Consistency rule
//!
//! Fingerprints are content-deterministic, so at most one result is ever
//! authoritative per key. Concurrent conversions of the same document may
//! race to `store`; the first write wins, an identical later write is a
//! silent no-op, and a *divergent* later write is a
//! [`Ocr2MdError::CacheConflict`] — that combination should be unreachable
//! under correct hashing and deterministic assembly, so it is surfaced
//! instead of resolved quietly. Nothing partial is ever stored: `store` is
//! only called with a fully assembled result.
//!
//! ## Layout
//!
//! A `RwLock`-guarded in-memory index fronts a [`CacheBackend`] that owns
//! durability. Two backends ship: [`JsonFileBackend`] (one JSON file per
//! fingerprint, atomic temp-file + rename writes) and [`MemoryBackend`] for
//! tests and ephemeral use. Entries are never silently evicted except by the
//! explicit [`RetentionPolicy`] applied on store.

use crate::error::Ocr2MdError;
use crate::fingerprint::DocumentFingerprint;
use crate::output::ConversionResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// One cached conversion plus its access metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The conversion result this entry preserves.
    pub result: ConversionResult,
    /// When the entry was first stored.
    pub created_at: DateTime<Utc>,
    /// When the entry was last served, if ever.
    pub last_hit: Option<DateTime<Utc>>,
    /// How many times the entry has been served.
    pub hit_count: u64,
}

impl CacheEntry {
    /// The instant used for least-recently-used comparisons.
    fn recency(&self) -> DateTime<Utc> {
        self.last_hit.unwrap_or(self.created_at)
    }
}

/// Counters reported by [`CacheStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Bounds on how long and how many entries the store keeps.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Maximum number of entries; the least recently hit are evicted beyond
    /// this. 0 disables the bound.
    pub max_entries: usize,
    /// Entries unhit for longer than this are dropped on the next store.
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 256,
            max_age: None,
        }
    }
}

// ── Backend ──────────────────────────────────────────────────────────────

/// Durable key-value storage for cache entries, keyed by fingerprint string.
///
/// Implementations own serialisation durability only; all consistency logic
/// (first-wins, retention, statistics) lives in [`CacheStore`].
pub trait CacheBackend: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, Ocr2MdError>;
    fn persist(&self, key: &str, entry: &CacheEntry) -> Result<(), Ocr2MdError>;
    fn remove(&self, key: &str) -> Result<(), Ocr2MdError>;
    fn keys(&self) -> Result<Vec<String>, Ocr2MdError>;
}

/// One pretty-printed JSON file per fingerprint under a cache directory.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never leaves a truncated entry behind.
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Open (creating if needed) a file-backed cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Ocr2MdError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Ocr2MdError::CacheBackend {
            detail: format!("create {}: {e}", dir.display()),
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Fingerprints are lowercase hex, safe as file names as-is.
        self.dir.join(format!("{key}.json"))
    }
}

impl CacheBackend for JsonFileBackend {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, Ocr2MdError> {
        let path = self.path_for(key);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Ocr2MdError::CacheBackend {
                    detail: format!("read {}: {e}", path.display()),
                })
            }
        };
        let entry = serde_json::from_slice(&data).map_err(|e| Ocr2MdError::CacheBackend {
            detail: format!("parse {}: {e}", path.display()),
        })?;
        Ok(Some(entry))
    }

    fn persist(&self, key: &str, entry: &CacheEntry) -> Result<(), Ocr2MdError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let data =
            serde_json::to_vec_pretty(entry).map_err(|e| Ocr2MdError::CacheBackend {
                detail: format!("serialise {key}: {e}"),
            })?;
        std::fs::write(&tmp, data).map_err(|e| Ocr2MdError::CacheBackend {
            detail: format!("write {}: {e}", tmp.display()),
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| Ocr2MdError::CacheBackend {
            detail: format!("rename {}: {e}", path.display()),
        })
    }

    fn remove(&self, key: &str) -> Result<(), Ocr2MdError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Ocr2MdError::CacheBackend {
                detail: format!("remove {}: {e}", path.display()),
            }),
        }
    }

    fn keys(&self) -> Result<Vec<String>, Ocr2MdError> {
        let mut keys = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| Ocr2MdError::CacheBackend {
            detail: format!("list {}: {e}", self.dir.display()),
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }
}

/// Volatile backend; entries die with the process.
#[derive(Default)]
pub struct MemoryBackend {
    map: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<CacheEntry>, Ocr2MdError> {
        Ok(self.map.read().expect("cache lock poisoned").get(key).cloned())
    }

    fn persist(&self, key: &str, entry: &CacheEntry) -> Result<(), Ocr2MdError> {
        self.map
            .write()
            .expect("cache lock poisoned")
            .insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Ocr2MdError> {
        self.map.write().expect("cache lock poisoned").remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, Ocr2MdError> {
        Ok(self
            .map
            .read()
            .expect("cache lock poisoned")
            .keys()
            .cloned()
            .collect())
    }
}

// ── Store ────────────────────────────────────────────────────────────────

/// The conversion cache: concurrent-safe lookup/store with hit statistics.
pub struct CacheStore {
    backend: Box<dyn CacheBackend>,
    index: RwLock<HashMap<String, CacheEntry>>,
    policy: RetentionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Purely in-memory store (tests, one-shot runs with `--no-cache` off).
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::default()), RetentionPolicy::default())
    }

    /// File-backed store rooted at `dir`, warmed from existing entries.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Ocr2MdError> {
        let backend = JsonFileBackend::new(dir.as_ref())?;
        Ok(Self::with_backend(
            Box::new(backend),
            RetentionPolicy::default(),
        ))
    }

    /// Build a store over an arbitrary backend with an explicit policy.
    ///
    /// Existing backend entries are loaded into the index eagerly so
    /// `stats().entries` is accurate from the first call. Unreadable entries
    /// are skipped with a warning rather than failing the whole store.
    pub fn with_backend(backend: Box<dyn CacheBackend>, policy: RetentionPolicy) -> Self {
        let mut index = HashMap::new();
        match backend.keys() {
            Ok(keys) => {
                for key in keys {
                    match backend.load(&key) {
                        Ok(Some(entry)) => {
                            index.insert(key, entry);
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Skipping unreadable cache entry {key}: {e}"),
                    }
                }
            }
            Err(e) => warn!("Cache backend not listable, starting empty: {e}"),
        }
        debug!("Cache warmed with {} entries", index.len());

        Self {
            backend,
            index: RwLock::new(index),
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a fingerprint. A hit bumps the entry's access metadata and the
    /// global hit counter; a miss bumps the miss counter. No other side
    /// effects.
    pub fn lookup(&self, fp: &DocumentFingerprint) -> Option<ConversionResult> {
        let mut index = self.index.write().expect("cache lock poisoned");
        match index.get_mut(fp.as_str()) {
            Some(entry) => {
                let now = Utc::now();
                entry.hit_count += 1;
                entry.last_hit = Some(now);
                self.hits.fetch_add(1, Ordering::Relaxed);

                // Persist the bumped counters; a failure here only loses
                // statistics, never the result, so it is logged and ignored.
                if let Err(e) = self.backend.persist(fp.as_str(), entry) {
                    warn!("Failed to persist cache hit metadata: {e}");
                }

                let mut result = entry.result.clone();
                result.last_reused_at = Some(now);
                debug!(
                    "Cache hit for {} (hit #{})",
                    &fp.as_str()[..8.min(fp.as_str().len())],
                    entry.hit_count
                );
                Some(result)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a freshly computed result under its fingerprint.
    ///
    /// First store wins. Re-storing an identical result is a no-op (the
    /// expected outcome when two in-flight conversions of the same document
    /// both complete); re-storing a *different* result is a
    /// [`Ocr2MdError::CacheConflict`].
    pub fn store(
        &self,
        fp: &DocumentFingerprint,
        result: &ConversionResult,
    ) -> Result<(), Ocr2MdError> {
        let mut index = self.index.write().expect("cache lock poisoned");

        if let Some(existing) = index.get(fp.as_str()) {
            if existing.result.markdown == result.markdown {
                debug!("Ignoring duplicate store for {}", fp);
                return Ok(());
            }
            return Err(Ocr2MdError::CacheConflict {
                fingerprint: fp.to_string(),
            });
        }

        let entry = CacheEntry {
            result: result.clone(),
            created_at: Utc::now(),
            last_hit: None,
            hit_count: 0,
        };
        self.backend.persist(fp.as_str(), &entry)?;
        index.insert(fp.to_string(), entry);

        self.apply_retention(&mut index);
        Ok(())
    }

    /// Current counters. `entries` reflects the live index.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.index.read().expect("cache lock poisoned").len(),
        }
    }

    /// Drop every entry, in memory and in the backend.
    pub fn clear(&self) -> Result<(), Ocr2MdError> {
        let mut index = self.index.write().expect("cache lock poisoned");
        for key in index.keys() {
            self.backend.remove(key)?;
        }
        index.clear();
        Ok(())
    }

    /// Enforce the retention policy: drop expired entries first, then evict
    /// least-recently-hit entries down to `max_entries`.
    fn apply_retention(&self, index: &mut HashMap<String, CacheEntry>) {
        if let Some(max_age) = self.policy.max_age {
            let cutoff = Utc::now() - max_age;
            let expired: Vec<String> = index
                .iter()
                .filter(|(_, e)| e.recency() < cutoff)
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                debug!("Evicting expired cache entry {key}");
                if let Err(e) = self.backend.remove(&key) {
                    warn!("Failed to remove expired entry {key}: {e}");
                }
                index.remove(&key);
            }
        }

        if self.policy.max_entries > 0 {
            while index.len() > self.policy.max_entries {
                let oldest = index
                    .iter()
                    .min_by_key(|(_, e)| e.recency())
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(key) => {
                        debug!("Evicting least-recently-hit cache entry {key}");
                        if let Err(e) = self.backend.remove(&key) {
                            warn!("Failed to remove evicted entry {key}: {e}");
                        }
                        index.remove(&key);
                    }
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;
    use crate::fingerprint::fingerprint;
    use crate::output::{ConversionStats, DocumentMetadata};

    fn result_for(fp: &DocumentFingerprint, markdown: &str) -> ConversionResult {
        ConversionResult {
            markdown: markdown.to_string(),
            fingerprint: fp.to_string(),
            pages: vec![],
            metadata: DocumentMetadata::default(),
            stats: ConversionStats::default(),
            created_at: Utc::now(),
            last_reused_at: None,
        }
    }

    fn fp(bytes: &[u8]) -> DocumentFingerprint {
        fingerprint(bytes, &ConversionConfig::default()).unwrap()
    }

    #[test]
    fn miss_then_hit() {
        let store = CacheStore::in_memory();
        let key = fp(b"doc-a");

        assert!(store.lookup(&key).is_none());
        assert_eq!(store.stats().misses, 1);

        store.store(&key, &result_for(&key, "# A\n")).unwrap();
        let hit = store.lookup(&key).expect("entry should be present");
        assert_eq!(hit.markdown, "# A\n");
        assert!(hit.last_reused_at.is_some(), "hit must be marked as reused");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn duplicate_store_is_noop() {
        let store = CacheStore::in_memory();
        let key = fp(b"doc-b");
        let result = result_for(&key, "# B\n");

        store.store(&key, &result).unwrap();
        store.store(&key, &result).unwrap();
        assert_eq!(store.stats().entries, 1);
    }

    #[test]
    fn divergent_store_is_conflict() {
        let store = CacheStore::in_memory();
        let key = fp(b"doc-c");

        store.store(&key, &result_for(&key, "# one\n")).unwrap();
        let err = store
            .store(&key, &result_for(&key, "# two\n"))
            .expect_err("divergent store must be rejected");
        assert!(matches!(err, Ocr2MdError::CacheConflict { .. }));
    }

    #[test]
    fn hit_count_accumulates() {
        let store = CacheStore::in_memory();
        let key = fp(b"doc-d");
        store.store(&key, &result_for(&key, "# D\n")).unwrap();

        store.lookup(&key);
        store.lookup(&key);
        store.lookup(&key);
        assert_eq!(store.stats().hits, 3);
    }

    #[test]
    fn retention_evicts_least_recently_hit() {
        let store = CacheStore::with_backend(
            Box::new(MemoryBackend::default()),
            RetentionPolicy {
                max_entries: 2,
                max_age: None,
            },
        );

        let k1 = fp(b"doc-1");
        let k2 = fp(b"doc-2");
        let k3 = fp(b"doc-3");
        store.store(&k1, &result_for(&k1, "1")).unwrap();
        store.store(&k2, &result_for(&k2, "2")).unwrap();

        // Touch k1 so k2 is the least recently used.
        store.lookup(&k1);
        store.store(&k3, &result_for(&k3, "3")).unwrap();

        assert_eq!(store.stats().entries, 2);
        assert!(store.lookup(&k1).is_some());
        assert!(store.lookup(&k3).is_some());
        assert!(store.lookup(&k2).is_none(), "k2 should have been evicted");
    }

    #[test]
    fn file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = fp(b"doc-persist");

        {
            let store = CacheStore::open(dir.path()).unwrap();
            store.store(&key, &result_for(&key, "# persisted\n")).unwrap();
        }

        let reopened = CacheStore::open(dir.path()).unwrap();
        assert_eq!(reopened.stats().entries, 1);
        let hit = reopened.lookup(&key).expect("entry must survive reopen");
        assert_eq!(hit.markdown, "# persisted\n");
    }

    #[test]
    fn clear_empties_store_and_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        let key = fp(b"doc-clear");
        store.store(&key, &result_for(&key, "x")).unwrap();

        store.clear().unwrap();
        assert_eq!(store.stats().entries, 0);

        let reopened = CacheStore::open(dir.path()).unwrap();
        assert_eq!(reopened.stats().entries, 0);
    }
}
