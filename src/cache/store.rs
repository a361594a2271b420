//! Content-addressed artifact cache
//!
//! The index maps a [`CacheKey`] to exactly one stored artifact. Writers for
//! the same key are serialized by a per-key lock and the first writer wins;
//! later writers get the stored artifact back and their bytes are dropped.
//! Lookups copy blob contents into a shared buffer, so evicting an entry never
//! invalidates an [`Artifact`] a caller already holds.

use crate::cache::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::cache::key::{sha256_hex, CacheKey};
use crate::cache::usage::CacheUsage;
use crate::config::schema::CacheConfig;
use crate::error::{RollgateError, RollgateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Immutable build output
#[derive(Clone)]
pub struct Artifact {
    digest: String,
    size: u64,
    produced_by: Uuid,
    location: String,
    content: Arc<[u8]>,
}

impl Artifact {
    /// Wrap bytes that were not persisted in the cache
    pub fn uncached(bytes: Vec<u8>, produced_by: Uuid) -> Self {
        let digest = sha256_hex(&bytes);
        Self {
            location: format!("uncached://{}", digest),
            size: bytes.len() as u64,
            digest,
            produced_by,
            content: Arc::from(bytes),
        }
    }

    /// SHA256 hex digest of the contents
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Run that produced this artifact
    pub fn produced_by(&self) -> Uuid {
        self.produced_by
    }

    /// Where the bytes live
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Artifact contents
    pub fn bytes(&self) -> &[u8] {
        &self.content
    }

    /// Serializable reference without the contents
    pub fn reference(&self) -> ArtifactRef {
        ArtifactRef {
            digest: self.digest.clone(),
            size: self.size,
            produced_by: self.produced_by,
            location: self.location.clone(),
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("digest", &self.digest)
            .field("size", &self.size)
            .field("produced_by", &self.produced_by)
            .field("location", &self.location)
            .finish()
    }
}

/// Artifact metadata handed to executors and recorded on runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub digest: String,
    pub size: u64,
    pub produced_by: Uuid,
    pub location: String,
}

/// Index record for one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key derived from build inputs
    pub key: CacheKey,
    /// Digest of the stored blob
    pub digest: String,
    /// Size in bytes
    pub size: u64,
    /// Run that produced the artifact
    pub produced_by: Uuid,
    /// Blob location
    pub location: String,
    /// When the entry was stored
    pub created_at: DateTime<Utc>,
    /// Last lookup or store that touched the entry
    pub last_access: DateTime<Utc>,
    /// Monotonic access counter for LRU ordering
    #[serde(default)]
    pub access_seq: u64,
}

/// Result of a cache lookup
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Artifact),
    Miss,
}

impl CacheLookup {
    /// Whether the lookup found an artifact
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Eviction policy applied by [`CacheStore::evict`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictionPolicy {
    /// Evict least-recently-used entries until the total fits
    pub max_total_bytes: Option<u64>,
    /// Evict entries not accessed within this window
    pub max_age: Option<chrono::Duration>,
}

impl EvictionPolicy {
    /// LRU bound only
    pub fn lru(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes: Some(max_total_bytes),
            max_age: None,
        }
    }

    /// Policy derived from cache config
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_total_bytes: Some(config.max_total_bytes()),
            max_age: (config.gc_days > 0).then(|| chrono::Duration::days(i64::from(config.gc_days))),
        }
    }
}

/// Outcome of an eviction pass
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub evicted: Vec<CacheEntry>,
    pub freed_bytes: u64,
}

#[derive(Clone)]
enum BuildSignal {
    Building,
    Ready(Artifact),
    Failed,
}

enum Probe {
    Stored(CacheEntry),
    Building(watch::Receiver<BuildSignal>),
    Absent,
}

struct InFlight {
    claim_id: u64,
    signal: watch::Sender<BuildSignal>,
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<CacheKey, CacheEntry>,
    inflight: HashMap<CacheKey, InFlight>,
    seq: u64,
}

impl IndexState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    fn touch(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        entry.last_access = Utc::now();
        entry.access_seq = seq;
        Some(entry.clone())
    }

    /// Pick entries to evict, least recently used first
    fn victims(&self, policy: &EvictionPolicy, protect: Option<&CacheKey>) -> Vec<CacheEntry> {
        let mut candidates: Vec<&CacheEntry> = self
            .entries
            .values()
            .filter(|e| Some(&e.key) != protect)
            .collect();
        candidates.sort_by_key(|e| e.access_seq);

        let mut victims = Vec::new();
        let mut remaining = self.total_bytes();

        if let Some(max_age) = policy.max_age {
            let cutoff = Utc::now() - max_age;
            candidates.retain(|e| {
                if e.last_access < cutoff {
                    remaining -= e.size;
                    victims.push((*e).clone());
                    false
                } else {
                    true
                }
            });
        }

        if let Some(max) = policy.max_total_bytes {
            for entry in candidates {
                if remaining <= max {
                    break;
                }
                remaining -= entry.size;
                victims.push(entry.clone());
            }
        }

        victims
    }
}

fn lock(state: &Mutex<IndexState>) -> MutexGuard<'_, IndexState> {
    // A panic while holding the lock leaves plain data behind; keep serving it
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration of an in-flight build for one key
///
/// Lookups for the key wait on the claim instead of missing immediately.
/// Dropping the claim without a matching [`CacheStore::store`] tells waiters
/// the producer failed.
pub struct BuildClaim {
    key: CacheKey,
    claim_id: u64,
    state: Arc<Mutex<IndexState>>,
}

impl BuildClaim {
    /// Key this claim covers
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for BuildClaim {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        let ours = state
            .inflight
            .get(&self.key)
            .is_some_and(|f| f.claim_id == self.claim_id);
        if ours {
            if let Some(inflight) = state.inflight.remove(&self.key) {
                debug!("Build claim for {} released without store", self.key.short());
                inflight.signal.send_replace(BuildSignal::Failed);
            }
        }
    }
}

/// Content-addressed artifact cache
pub struct CacheStore {
    blobs: Arc<dyn BlobStore>,
    index_path: Option<PathBuf>,
    state: Arc<Mutex<IndexState>>,
    key_locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    lookup_wait: Duration,
    max_total_bytes: u64,
}

impl CacheStore {
    /// Create a store over any blob backend
    pub fn new(blobs: Arc<dyn BlobStore>, max_total_bytes: u64, lookup_wait: Duration) -> Self {
        Self {
            blobs,
            index_path: None,
            state: Arc::new(Mutex::new(IndexState::default())),
            key_locks: Mutex::new(HashMap::new()),
            lookup_wait,
            max_total_bytes,
        }
    }

    /// Cache held entirely in memory
    pub fn in_memory(max_total_bytes: u64, lookup_wait: Duration) -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()), max_total_bytes, lookup_wait)
    }

    /// Open a filesystem cache rooted at `root`, loading its persisted index
    pub async fn open(root: &Path, config: &CacheConfig) -> RollgateResult<Self> {
        fs::create_dir_all(root)
            .await
            .map_err(|e| RollgateError::io(format!("creating cache dir {}", root.display()), e))?;

        let blobs = Arc::new(FsBlobStore::new(root.join("objects")));
        let mut store = Self::new(blobs, config.max_total_bytes(), config.lookup_wait());
        let index_path = root.join("index.json");

        match Self::read_index(&index_path).await {
            Ok(entries) => {
                let mut state = lock(&store.state);
                state.seq = entries.iter().map(|e| e.access_seq).max().unwrap_or(0);
                state.entries = entries.into_iter().map(|e| (e.key.clone(), e)).collect();
                debug!("Loaded {} cache entries", state.entries.len());
            }
            Err(e) => warn!("Ignoring unreadable cache index: {}", e),
        }

        store.index_path = Some(index_path);
        Ok(store)
    }

    async fn read_index(path: &Path) -> RollgateResult<Vec<CacheEntry>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(RollgateError::io("reading cache index", e)),
        };
        serde_json::from_str(&content).map_err(|e| RollgateError::CacheIndexCorrupt(e.to_string()))
    }

    /// Look up an artifact by key
    ///
    /// Waits up to the configured bound when another producer holds a claim
    /// on the key; a failed or slow producer yields `Miss`.
    pub async fn lookup(&self, key: &CacheKey) -> CacheLookup {
        let probe = {
            let mut state = lock(&self.state);
            match state.touch(key) {
                Some(entry) => Probe::Stored(entry),
                None => match state.inflight.get(key) {
                    Some(inflight) => Probe::Building(inflight.signal.subscribe()),
                    None => Probe::Absent,
                },
            }
        };

        let mut rx = match probe {
            Probe::Stored(entry) => {
                return match self.read_entry(&entry).await {
                    Some(artifact) => {
                        debug!("Cache hit for {}", key.short());
                        CacheLookup::Hit(artifact)
                    }
                    None => CacheLookup::Miss,
                };
            }
            Probe::Building(rx) => rx,
            Probe::Absent => {
                debug!("Cache miss for {}", key.short());
                return CacheLookup::Miss;
            }
        };

        debug!("Waiting on in-flight build for {}", key.short());
        let ready = rx.wait_for(|signal| !matches!(signal, BuildSignal::Building));
        let lookup = match tokio::time::timeout(self.lookup_wait, ready).await {
            Ok(Ok(signal)) => match &*signal {
                BuildSignal::Ready(artifact) => CacheLookup::Hit(artifact.clone()),
                _ => CacheLookup::Miss,
            },
            Ok(Err(_)) => CacheLookup::Miss,
            Err(_) => {
                debug!("Gave up waiting on in-flight build for {}", key.short());
                CacheLookup::Miss
            }
        };
        lookup
    }

    /// Register an in-flight build for `key`
    ///
    /// Returns `None` when the key is already stored or another producer
    /// holds a claim; look the key up instead.
    pub fn claim(&self, key: &CacheKey) -> Option<BuildClaim> {
        let mut state = lock(&self.state);
        if state.entries.contains_key(key) || state.inflight.contains_key(key) {
            return None;
        }
        let claim_id = state.next_seq();
        let (signal, _) = watch::channel(BuildSignal::Building);
        state
            .inflight
            .insert(key.clone(), InFlight { claim_id, signal });
        Some(BuildClaim {
            key: key.clone(),
            claim_id,
            state: Arc::clone(&self.state),
        })
    }

    /// Store an artifact under `key`
    ///
    /// If the key is already stored, `bytes` are discarded and the existing
    /// artifact is returned. Blob write failures surface as
    /// [`RollgateError::CacheWriteFailure`], which callers treat as soft.
    pub async fn store(
        &self,
        key: &CacheKey,
        bytes: Vec<u8>,
        produced_by: Uuid,
    ) -> RollgateResult<Artifact> {
        let key_lock = self.key_lock(key);
        let guard = key_lock.lock().await;

        let existing = lock(&self.state).touch(key);
        if let Some(entry) = existing {
            if let Some(artifact) = self.read_entry(&entry).await {
                debug!(
                    "Key {} already stored by run {}, discarding duplicate output",
                    key.short(),
                    entry.produced_by
                );
                drop(guard);
                self.release_key_lock(key, key_lock);
                return Ok(artifact);
            }
        }

        let result = self.write_new(key, bytes, produced_by).await;
        drop(guard);
        self.release_key_lock(key, key_lock);

        let artifact = result?;
        self.persist_index().await;
        self.enforce_limit(key).await;
        Ok(artifact)
    }

    async fn write_new(
        &self,
        key: &CacheKey,
        bytes: Vec<u8>,
        produced_by: Uuid,
    ) -> RollgateResult<Artifact> {
        let digest = sha256_hex(&bytes);
        let location = self
            .blobs
            .put(&digest, &bytes)
            .await
            .map_err(|e| RollgateError::CacheWriteFailure {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        let artifact = Artifact {
            size: bytes.len() as u64,
            digest: digest.clone(),
            produced_by,
            location: location.clone(),
            content: Arc::from(bytes),
        };

        let now = Utc::now();
        let mut state = lock(&self.state);
        let access_seq = state.next_seq();
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                digest,
                size: artifact.size,
                produced_by,
                location,
                created_at: now,
                last_access: now,
                access_seq,
            },
        );
        if let Some(inflight) = state.inflight.remove(key) {
            inflight.signal.send_replace(BuildSignal::Ready(artifact.clone()));
        }
        drop(state);

        info!(
            "Cached artifact {} ({} bytes) under {}",
            &artifact.digest[..12],
            artifact.size,
            key.short()
        );
        Ok(artifact)
    }

    /// Read an indexed entry's blob, dropping the entry if its blob is gone
    async fn read_entry(&self, entry: &CacheEntry) -> Option<Artifact> {
        let bytes = match self.blobs.get(&entry.digest).await {
            Ok(Some(bytes)) if sha256_hex(&bytes) == entry.digest => bytes,
            Ok(Some(_)) => {
                warn!("Cache blob for {} is corrupt, dropping entry", entry.key.short());
                self.forget(entry);
                return None;
            }
            Ok(None) => {
                debug!("Cache blob for {} vanished, dropping entry", entry.key.short());
                self.forget(entry);
                return None;
            }
            Err(e) => {
                warn!("Failed to read cache blob for {}: {}", entry.key.short(), e);
                return None;
            }
        };

        Some(Artifact {
            digest: entry.digest.clone(),
            size: entry.size,
            produced_by: entry.produced_by,
            location: entry.location.clone(),
            content: Arc::from(bytes),
        })
    }

    fn forget(&self, entry: &CacheEntry) {
        let mut state = lock(&self.state);
        if state
            .entries
            .get(&entry.key)
            .is_some_and(|e| e.digest == entry.digest)
        {
            state.entries.remove(&entry.key);
        }
    }

    /// Apply an eviction policy
    pub async fn evict(&self, policy: &EvictionPolicy) -> EvictionReport {
        self.evict_protecting(policy, None).await
    }

    /// Entries `evict` would remove, without removing them
    pub fn plan_eviction(&self, policy: &EvictionPolicy) -> Vec<CacheEntry> {
        lock(&self.state).victims(policy, None)
    }

    async fn enforce_limit(&self, just_stored: &CacheKey) {
        let policy = EvictionPolicy::lru(self.max_total_bytes);
        let report = self.evict_protecting(&policy, Some(just_stored)).await;
        if !report.evicted.is_empty() {
            info!(
                "Evicted {} cache entries ({} bytes) to stay under limit",
                report.evicted.len(),
                report.freed_bytes
            );
        }
    }

    async fn evict_protecting(
        &self,
        policy: &EvictionPolicy,
        protect: Option<&CacheKey>,
    ) -> EvictionReport {
        let (evicted, orphaned) = {
            let mut state = lock(&self.state);
            let victims = state.victims(policy, protect);
            for victim in &victims {
                state.entries.remove(&victim.key);
            }
            let live: HashSet<&str> = state.entries.values().map(|e| e.digest.as_str()).collect();
            let orphaned: HashSet<String> = victims
                .iter()
                .filter(|v| !live.contains(v.digest.as_str()))
                .map(|v| v.digest.clone())
                .collect();
            (victims, orphaned)
        };

        if evicted.is_empty() {
            return EvictionReport::default();
        }

        for digest in &orphaned {
            if let Err(e) = self.blobs.delete(digest).await {
                warn!("Failed to delete cache blob {}: {}", digest, e);
            }
        }
        self.persist_index().await;

        EvictionReport {
            freed_bytes: evicted.iter().map(|e| e.size).sum(),
            evicted,
        }
    }

    /// Remove every entry
    pub async fn clear(&self) -> EvictionReport {
        let policy = EvictionPolicy::lru(0);
        self.evict(&policy).await
    }

    /// All entries, most recently used first
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = lock(&self.state).entries.values().cloned().collect();
        entries.sort_by(|a, b| b.access_seq.cmp(&a.access_seq));
        entries
    }

    /// Current usage against the configured limit
    pub fn usage(&self) -> CacheUsage {
        let state = lock(&self.state);
        CacheUsage {
            entries: state.entries.len(),
            total_bytes: state.total_bytes(),
            limit_bytes: self.max_total_bytes,
        }
    }

    /// Backend name for display
    pub fn backend_name(&self) -> &'static str {
        self.blobs.backend_name()
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    fn release_key_lock(&self, key: &CacheKey, key_lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .key_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller hold it: nobody else is queued
        if Arc::strong_count(&key_lock) == 2 {
            locks.remove(key);
        }
    }

    /// Persist the index; failures only cost durability
    async fn persist_index(&self) {
        let Some(path) = &self.index_path else {
            return;
        };

        let mut entries: Vec<CacheEntry> = lock(&self.state).entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let content = match serde_json::to_string_pretty(&entries) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to serialize cache index: {}", e);
                return;
            }
        };

        let tmp = path.with_extension(format!("json.{}", Uuid::new_v4()));
        let result = async {
            fs::write(&tmp, content).await?;
            fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            warn!("Failed to persist cache index: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn store() -> CacheStore {
        CacheStore::in_memory(1024 * 1024, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn miss_then_store_then_hit() {
        let cache = store();
        let key = CacheKey::new("abc");
        let run = Uuid::new_v4();

        assert!(!cache.lookup(&key).await.is_hit());

        let stored = cache.store(&key, b"X".to_vec(), run).await.unwrap();
        assert_eq!(stored.bytes(), b"X");

        match cache.lookup(&key).await {
            CacheLookup::Hit(artifact) => {
                assert_eq!(artifact.bytes(), b"X");
                assert_eq!(artifact.produced_by(), run);
                assert_eq!(artifact.digest(), stored.digest());
            }
            CacheLookup::Miss => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn second_writer_gets_first_artifact() {
        let cache = store();
        let key = CacheKey::new("k");
        let first = cache.store(&key, b"first".to_vec(), Uuid::new_v4()).await.unwrap();
        let second = cache.store(&key, b"second".to_vec(), Uuid::new_v4()).await.unwrap();

        assert_eq!(second.bytes(), b"first");
        assert_eq!(second.produced_by(), first.produced_by());
        assert_eq!(cache.usage().entries, 1);
    }

    #[tokio::test]
    async fn concurrent_writers_converge() {
        let cache = Arc::new(store());
        let key = CacheKey::new("race");

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache.store(&key, vec![i; 16], Uuid::new_v4()).await.unwrap()
            }));
        }

        let mut digests = HashSet::new();
        for handle in handles {
            digests.insert(handle.await.unwrap().digest().to_string());
        }
        assert_eq!(digests.len(), 1);

        match cache.lookup(&key).await {
            CacheLookup::Hit(artifact) => assert!(digests.contains(artifact.digest())),
            CacheLookup::Miss => panic!("expected hit"),
        }
    }

    #[tokio::test]
    async fn lookup_waits_for_claimed_build() {
        let cache = Arc::new(store());
        let key = CacheKey::new("slow");
        let claim = cache.claim(&key).unwrap();
        assert!(cache.claim(&key).is_none());

        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move { cache.lookup(&key).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.store(&key, b"built".to_vec(), Uuid::new_v4()).await.unwrap();
        drop(claim);

        match waiter.await.unwrap() {
            CacheLookup::Hit(artifact) => assert_eq!(artifact.bytes(), b"built"),
            CacheLookup::Miss => panic!("waiter should see the stored artifact"),
        }
    }

    #[tokio::test]
    async fn dropped_claim_yields_miss() {
        let cache = Arc::new(store());
        let key = CacheKey::new("doomed");
        let claim = cache.claim(&key).unwrap();

        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move { cache.lookup(&key).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(claim);

        assert!(!waiter.await.unwrap().is_hit());
        // Key can be claimed again after the failure
        assert!(cache.claim(&key).is_some());
    }

    #[tokio::test]
    async fn lookup_wait_is_bounded() {
        let cache = CacheStore::in_memory(1024, Duration::from_millis(30));
        let key = CacheKey::new("stuck");
        let _claim = cache.claim(&key).unwrap();

        let started = std::time::Instant::now();
        assert!(!cache.lookup(&key).await.is_hit());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn lru_eviction_respects_recent_use() {
        let cache = CacheStore::in_memory(30, Duration::from_secs(1));
        let run = Uuid::new_v4();
        let a = CacheKey::new("a");
        let b = CacheKey::new("b");
        let c = CacheKey::new("c");

        cache.store(&a, vec![1; 10], run).await.unwrap();
        cache.store(&b, vec![2; 10], run).await.unwrap();
        assert!(cache.lookup(&a).await.is_hit()); // a is now more recent than b
        cache.store(&c, vec![3; 15], run).await.unwrap();

        assert!(cache.lookup(&a).await.is_hit());
        assert!(!cache.lookup(&b).await.is_hit());
        assert!(cache.lookup(&c).await.is_hit());
        assert!(cache.usage().total_bytes <= 30);
    }

    #[tokio::test]
    async fn held_artifact_survives_eviction() {
        let cache = store();
        let key = CacheKey::new("held");
        cache.store(&key, b"keep me".to_vec(), Uuid::new_v4()).await.unwrap();

        let CacheLookup::Hit(held) = cache.lookup(&key).await else {
            panic!("expected hit");
        };
        let report = cache.clear().await;

        assert_eq!(report.evicted.len(), 1);
        assert_eq!(held.bytes(), b"keep me");
        assert!(!cache.lookup(&key).await.is_hit());
    }

    #[tokio::test]
    async fn shared_blob_kept_while_referenced() {
        let cache = CacheStore::in_memory(1024, Duration::from_secs(1));
        let run = Uuid::new_v4();
        cache.store(&CacheKey::new("one"), b"same".to_vec(), run).await.unwrap();
        cache.store(&CacheKey::new("two"), b"same".to_vec(), run).await.unwrap();

        let policy = EvictionPolicy::lru(4);
        let report = cache.evict(&policy).await;
        assert_eq!(report.evicted.len(), 1);

        assert!(cache.lookup(&CacheKey::new("two")).await.is_hit());
    }

    #[tokio::test]
    async fn plan_eviction_is_dry_run() {
        let cache = store();
        cache.store(&CacheKey::new("x"), vec![0; 8], Uuid::new_v4()).await.unwrap();
        let planned = cache.plan_eviction(&EvictionPolicy::lru(0));
        assert_eq!(planned.len(), 1);
        assert_eq!(cache.usage().entries, 1);
    }

    struct FailingBlobs;

    #[async_trait]
    impl BlobStore for FailingBlobs {
        async fn put(&self, _: &str, _: &[u8]) -> std::io::Result<String> {
            Err(std::io::Error::other("disk full"))
        }
        async fn get(&self, _: &str) -> std::io::Result<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete(&self, _: &str) -> std::io::Result<()> {
            Ok(())
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn write_failure_is_soft_error() {
        let cache = CacheStore::new(Arc::new(FailingBlobs), 1024, Duration::from_secs(1));
        let err = cache
            .store(&CacheKey::new("k"), b"x".to_vec(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(err.is_soft());
        assert_eq!(cache.usage().entries, 0);
    }

    #[tokio::test]
    async fn index_persists_across_open() {
        let dir = TempDir::new().unwrap();
        let config = CacheConfig::default();
        let key = CacheKey::new("persisted");

        {
            let cache = CacheStore::open(dir.path(), &config).await.unwrap();
            cache.store(&key, b"durable".to_vec(), Uuid::new_v4()).await.unwrap();
        }

        let reopened = CacheStore::open(dir.path(), &config).await.unwrap();
        assert_eq!(reopened.backend_name(), "filesystem");
        match reopened.lookup(&key).await {
            CacheLookup::Hit(artifact) => assert_eq!(artifact.bytes(), b"durable"),
            CacheLookup::Miss => panic!("expected persisted hit"),
        }
    }

    #[tokio::test]
    async fn vanished_blob_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::open(dir.path(), &CacheConfig::default()).await.unwrap();
        let key = CacheKey::new("gone");
        let artifact = cache.store(&key, b"bytes".to_vec(), Uuid::new_v4()).await.unwrap();

        std::fs::remove_file(artifact.location()).unwrap();

        assert!(!cache.lookup(&key).await.is_hit());
        assert_eq!(cache.usage().entries, 0);
    }
}
