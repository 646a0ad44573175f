//! Write-batched, read-cached filesystem storage (§4.2).
//!
//! A single background worker drains dirty cache entries every
//! `batch_interval`, coalescing writes keyed by `(namespace, key)` so only
//! the last value in the window hits disk. Reads consult the cache first and
//! read through to disk on a miss, populating the cache with `cache_ttl`.

use dashmap::DashMap;
use runtime_core::{RuntimeError, RuntimeResult, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

type Key = (String, String);

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` represents a logically deleted key (a pending or flushed tombstone).
    value: Option<serde_json::Value>,
    cached_at: Instant,
    /// Not yet written to disk.
    dirty: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OnDiskRecord {
    key: String,
    value: serde_json::Value,
}

/// Counters surfaced for observability; never read by the storage layer itself.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Writes that failed and were logged, not retried.
    pub write_errors: AtomicU64,
    /// Flush passes completed by the background worker.
    pub flushes: AtomicU64,
}

struct Inner {
    base_path: PathBuf,
    cache: DashMap<Key, CacheEntry>,
    config: StorageConfig,
    stats: StorageStats,
    started: AtomicBool,
}

/// Write-batched, read-cached storage backing the runtime's scoped state stores.
#[derive(Clone)]
pub struct ConcurrentStorage {
    inner: Arc<Inner>,
    worker: Arc<AsyncMutex<Option<JoinHandle<()>>>>,
    shutdown: Arc<tokio::sync::Notify>,
}

impl std::fmt::Debug for ConcurrentStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentStorage")
            .field("base_path", &self.inner.base_path)
            .field("started", &self.inner.started.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConcurrentStorage {
    /// Build a storage layer rooted at `base_path`, not yet started.
    pub fn new(base_path: impl Into<PathBuf>, config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_path: base_path.into(),
                cache: DashMap::new(),
                config,
                stats: StorageStats::default(),
                started: AtomicBool::new(false),
            }),
            worker: Arc::new(AsyncMutex::new(None)),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Start the background flush worker. Idempotent: a second call is a no-op.
    pub async fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("ConcurrentStorage already started");
            return;
        }
        let inner = self.inner.clone();
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_secs_f64(inner.config.batch_interval_secs.max(0.001));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        flush_dirty(&inner).await;
                    }
                    _ = shutdown.notified() => {
                        flush_dirty(&inner).await;
                        break;
                    }
                }
            }
        });
        *self.worker.lock().await = Some(handle);
    }

    /// Stop the background worker after flushing any pending writes.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            tracing::debug!("ConcurrentStorage already stopped");
            return;
        }
        self.shutdown.notify_one();
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Enqueue a write. Returns immediately; the value lands on disk at the
    /// next flush, coalesced with any further writes to the same key.
    pub fn put(&self, namespace: &str, key: &str, value: serde_json::Value) {
        self.inner.cache.insert(
            (namespace.to_string(), key.to_string()),
            CacheEntry {
                value: Some(value),
                cached_at: Instant::now(),
                dirty: true,
            },
        );
    }

    /// Enqueue a delete. Returns immediately.
    pub fn delete(&self, namespace: &str, key: &str) {
        self.inner.cache.insert(
            (namespace.to_string(), key.to_string()),
            CacheEntry {
                value: None,
                cached_at: Instant::now(),
                dirty: true,
            },
        );
    }

    /// Read `key`, consulting the cache first and reading through to disk on
    /// a miss. Returns `None` as the "absent" sentinel.
    pub async fn get(&self, namespace: &str, key: &str) -> RuntimeResult<Option<serde_json::Value>> {
        let cache_key = (namespace.to_string(), key.to_string());
        if let Some(entry) = self.inner.cache.get(&cache_key) {
            let ttl = Duration::from_secs(self.inner.config.cache_ttl_secs);
            if entry.dirty || entry.cached_at.elapsed() < ttl {
                return Ok(entry.value.clone());
            }
        }

        let path = record_path(&self.inner.base_path, namespace, key);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let record: OnDiskRecord = serde_json::from_str(&text).map_err(RuntimeError::Serialization)?;
                self.inner.cache.insert(
                    cache_key,
                    CacheEntry {
                        value: Some(record.value.clone()),
                        cached_at: Instant::now(),
                        dirty: false,
                    },
                );
                Ok(Some(record.value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RuntimeError::Io(e)),
        }
    }

    /// Snapshot of the write-error / flush-pass counters.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.inner.stats.write_errors.load(Ordering::Relaxed),
            self.inner.stats.flushes.load(Ordering::Relaxed),
        )
    }
}

async fn flush_dirty(inner: &Inner) {
    let dirty: Vec<Key> = inner
        .cache
        .iter()
        .filter(|e| e.dirty)
        .map(|e| e.key().clone())
        .collect();

    for key in dirty {
        let Some(mut entry) = inner.cache.get_mut(&key) else {
            continue;
        };
        if !entry.dirty {
            continue;
        }
        let (namespace, raw_key) = &key;
        let result = match &entry.value {
            Some(value) => write_record(&inner.base_path, namespace, raw_key, value).await,
            None => remove_record(&inner.base_path, namespace, raw_key).await,
        };
        match result {
            Ok(()) => entry.dirty = false,
            Err(e) => {
                inner.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(namespace = %namespace, key = %raw_key, error = %e, "storage flush failed");
            }
        }
    }
    inner.stats.flushes.fetch_add(1, Ordering::Relaxed);
}

fn record_path(base: &Path, namespace: &str, key: &str) -> PathBuf {
    let digest = md5::compute(key.as_bytes());
    base.join(namespace).join(format!("{digest:x}.json"))
}

async fn write_record(base: &Path, namespace: &str, key: &str, value: &serde_json::Value) -> std::io::Result<()> {
    let path = record_path(base, namespace, key);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let record = OnDiskRecord {
        key: key.to_string(),
        value: value.clone(),
    };
    let content = serde_json::to_string(&record).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, &path).await
}

async fn remove_record(base: &Path, namespace: &str, key: &str) -> std::io::Result<()> {
    let path = record_path(base, namespace, key);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_before_flush() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConcurrentStorage::new(dir.path(), StorageConfig::default());
        storage.put("ns", "k1", serde_json::json!({"a": 1}));
        let value = storage.get("ns", "k1").await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn get_returns_none_for_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConcurrentStorage::new(dir.path(), StorageConfig::default());
        assert_eq!(storage.get("ns", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn background_worker_flushes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            batch_interval_secs: 0.02,
            ..Default::default()
        };
        let storage = ConcurrentStorage::new(dir.path(), config);
        storage.start().await;
        storage.put("ns", "k1", serde_json::json!("hello"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        storage.stop().await;

        let path = record_path(dir.path(), "ns", "k1");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn stop_flushes_pending_writes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConcurrentStorage::new(dir.path(), StorageConfig::default());
        storage.start().await;
        storage.put("ns", "k1", serde_json::json!("value"));
        storage.stop().await;

        let path = record_path(dir.path(), "ns", "k1");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn delete_removes_value_from_subsequent_reads() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConcurrentStorage::new(dir.path(), StorageConfig::default());
        storage.put("ns", "k1", serde_json::json!(1));
        storage.delete("ns", "k1");
        assert_eq!(storage.get("ns", "k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn coalesces_multiple_writes_to_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            batch_interval_secs: 0.02,
            ..Default::default()
        };
        let storage = ConcurrentStorage::new(dir.path(), config);
        storage.start().await;
        for i in 0..5 {
            storage.put("ns", "k1", serde_json::json!(i));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        storage.stop().await;

        let path = record_path(dir.path(), "ns", "k1");
        let text = std::fs::read_to_string(path).unwrap();
        let record: OnDiskRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(record.value, serde_json::json!(4));
    }

    #[tokio::test]
    async fn double_start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ConcurrentStorage::new(dir.path(), StorageConfig::default());
        storage.start().await;
        storage.start().await;
        storage.stop().await;
        storage.stop().await;
    }
}
