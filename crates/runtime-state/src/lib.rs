//! Three-tier scoped key/value store (§4.4): global, stream, and execution
//! partitions, lazily loaded from [`ConcurrentStorage`](runtime_storage::ConcurrentStorage)
//! on first touch and purged from the execution tier once a partition's
//! last-access timestamp falls outside the configured TTL.

use dashmap::DashMap;
use runtime_core::RuntimeResult;
use runtime_storage::ConcurrentStorage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Whether a write/read targets the isolated execution partition regardless
/// of the caller-named [`StateScope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Honor the caller-named scope.
    Shared,
    /// Always target the execution partition, regardless of `scope`.
    Isolated,
}

/// Which partition a write targets, or the search order for a shared read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateScope {
    /// Single partition shared by the whole process.
    Global,
    /// One partition per entry-point stream.
    Stream,
    /// One partition per execution instance.
    Execution,
}

impl StateScope {
    fn label(self) -> &'static str {
        match self {
            StateScope::Global => "global",
            StateScope::Stream => "stream",
            StateScope::Execution => "execution",
        }
    }
}

struct PartitionEntry {
    data: HashMap<String, Value>,
    last_access: Instant,
}

/// Active-partition counts per scope, from [`SharedStateManager::get_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    /// Always 0 or 1: the single global partition, once touched.
    pub global_partitions: usize,
    /// Number of distinct streams with an in-memory partition.
    pub stream_partitions: usize,
    /// Number of distinct executions with an in-memory partition.
    pub execution_partitions: usize,
}

struct Inner {
    storage: Option<Arc<ConcurrentStorage>>,
    partitions: DashMap<(StateScope, String), Arc<Mutex<PartitionEntry>>>,
}

/// Scoped shared-state store. Cheaply cloneable; all clones share state.
///
/// `storage = None` runs in "mixed mode": partitions live only in memory for
/// the lifetime of the process, with no lazy load or persistence.
#[derive(Clone)]
pub struct SharedStateManager {
    inner: Arc<Inner>,
}

impl SharedStateManager {
    /// Build a manager, optionally backed by [`ConcurrentStorage`] for lazy
    /// load and persistence.
    pub fn new(storage: Option<Arc<ConcurrentStorage>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                partitions: DashMap::new(),
            }),
        }
    }

    fn partition_key(scope: StateScope, execution_id: &str, stream_id: &str) -> String {
        match scope {
            StateScope::Global => "global".to_string(),
            StateScope::Stream => stream_id.to_string(),
            StateScope::Execution => execution_id.to_string(),
        }
    }

    fn resolve_target_scope(isolation: IsolationLevel, scope: StateScope) -> StateScope {
        match isolation {
            IsolationLevel::Isolated => StateScope::Execution,
            IsolationLevel::Shared => scope,
        }
    }

    async fn partition(&self, scope: StateScope, partition_key: String) -> Arc<Mutex<PartitionEntry>> {
        if let Some(existing) = self.inner.partitions.get(&(scope, partition_key.clone())) {
            return existing.clone();
        }

        let data = match &self.inner.storage {
            Some(storage) => {
                let namespace = format!("states/{}", scope.label());
                match storage.get(&namespace, &partition_key).await {
                    Ok(Some(Value::Object(map))) => map.into_iter().collect(),
                    Ok(_) => HashMap::new(),
                    Err(e) => {
                        tracing::warn!(error = %e, namespace = %namespace, key = %partition_key, "failed to lazy-load partition");
                        HashMap::new()
                    }
                }
            }
            None => HashMap::new(),
        };

        let entry = Arc::new(Mutex::new(PartitionEntry {
            data,
            last_access: Instant::now(),
        }));
        self.inner
            .partitions
            .entry((scope, partition_key))
            .or_insert_with(|| entry.clone())
            .clone()
    }

    /// Write `key = value` into the partition resolved from `isolation` and
    /// `scope`, enqueueing a full-partition snapshot write via storage if configured.
    pub async fn write(
        &self,
        key: &str,
        value: Value,
        execution_id: &str,
        stream_id: &str,
        isolation: IsolationLevel,
        scope: StateScope,
    ) -> RuntimeResult<()> {
        let target = Self::resolve_target_scope(isolation, scope);
        let partition_key = Self::partition_key(target, execution_id, stream_id);
        let partition = self.partition(target, partition_key.clone()).await;

        let snapshot = {
            let mut guard = partition.lock().await;
            guard.data.insert(key.to_string(), value);
            guard.last_access = Instant::now();
            guard.data.clone()
        };

        if let Some(storage) = &self.inner.storage {
            let namespace = format!("states/{}", target.label());
            storage.put(&namespace, &partition_key, Value::Object(snapshot.into_iter().collect()));
        }
        Ok(())
    }

    /// Read `key`. `Isolated` only ever consults the execution partition;
    /// `Shared` searches execution, then stream, then global, returning the
    /// first hit (the caller doesn't know which scope a value landed in).
    pub async fn read(
        &self,
        key: &str,
        execution_id: &str,
        stream_id: &str,
        isolation: IsolationLevel,
    ) -> RuntimeResult<Option<Value>> {
        let search_order: &[StateScope] = match isolation {
            IsolationLevel::Isolated => &[StateScope::Execution],
            IsolationLevel::Shared => &[StateScope::Execution, StateScope::Stream, StateScope::Global],
        };

        for &scope in search_order {
            let partition_key = Self::partition_key(scope, execution_id, stream_id);
            let partition = self.partition(scope, partition_key).await;
            let mut guard = partition.lock().await;
            if let Some(value) = guard.data.get(key).cloned() {
                guard.last_access = Instant::now();
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Remove execution partitions whose last access predates `ttl`, from
    /// memory and (if configured) from disk. Global and stream partitions
    /// are never purged by this call.
    pub async fn purge_expired_state(&self, ttl: Duration) {
        let mut expired = Vec::new();
        for entry in self.inner.partitions.iter() {
            let (scope, key) = entry.key().clone();
            if scope != StateScope::Execution {
                continue;
            }
            if entry.value().lock().await.last_access.elapsed() > ttl {
                expired.push(key);
            }
        }

        for key in expired {
            self.inner.partitions.remove(&(StateScope::Execution, key.clone()));
            if let Some(storage) = &self.inner.storage {
                storage.delete("states/execution", &key);
            }
        }
    }

    /// A full snapshot of one partition's key/value map, for `session_state`
    /// resumption (§9) and for supplying `extra` context keys to the
    /// conditional-edge expression evaluator.
    pub async fn snapshot(&self, scope: StateScope, execution_id: &str, stream_id: &str) -> HashMap<String, Value> {
        let partition_key = Self::partition_key(scope, execution_id, stream_id);
        let partition = self.partition(scope, partition_key).await;
        let guard = partition.lock().await;
        guard.data.clone()
    }

    /// Active in-memory partition counts per scope.
    pub fn get_stats(&self) -> StateStats {
        let mut stats = StateStats::default();
        for entry in self.inner.partitions.iter() {
            match entry.key().0 {
                StateScope::Global => stats.global_partitions += 1,
                StateScope::Stream => stats.stream_partitions += 1,
                StateScope::Execution => stats.execution_partitions += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::StorageConfig;

    #[tokio::test]
    async fn writes_and_reads_global_scope_without_storage() {
        let manager = SharedStateManager::new(None);
        manager
            .write("key", Value::from("val"), "e1", "s1", IsolationLevel::Shared, StateScope::Global)
            .await
            .unwrap();
        let value = manager.read("key", "e1", "s1", IsolationLevel::Shared).await.unwrap();
        assert_eq!(value, Some(Value::from("val")));
    }

    #[tokio::test]
    async fn isolated_writes_always_target_execution_scope() {
        let manager = SharedStateManager::new(None);
        manager
            .write(
                "key",
                Value::from("isolated"),
                "e1",
                "s1",
                IsolationLevel::Isolated,
                StateScope::Global,
            )
            .await
            .unwrap();

        assert_eq!(
            manager.read("key", "e1", "s1", IsolationLevel::Isolated).await.unwrap(),
            Some(Value::from("isolated"))
        );
        // A different execution never sees it, even though it was "written to global".
        assert_eq!(
            manager.read("key", "e2", "s1", IsolationLevel::Isolated).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn shared_read_falls_back_from_execution_to_stream_to_global() {
        let manager = SharedStateManager::new(None);
        manager
            .write("key", Value::from("stream-val"), "e1", "stream_A", IsolationLevel::Shared, StateScope::Stream)
            .await
            .unwrap();

        let value = manager
            .read("key", "e-new", "stream_A", IsolationLevel::Shared)
            .await
            .unwrap();
        assert_eq!(value, Some(Value::from("stream-val")));
    }

    #[tokio::test]
    async fn stream_partitions_are_isolated_from_each_other() {
        let manager = SharedStateManager::new(None);
        manager
            .write("key", Value::from("A"), "e1", "stream_A", IsolationLevel::Shared, StateScope::Stream)
            .await
            .unwrap();
        manager
            .write("key", Value::from("B"), "e2", "stream_B", IsolationLevel::Shared, StateScope::Stream)
            .await
            .unwrap();

        assert_eq!(
            manager.read("key", "e3", "stream_A", IsolationLevel::Shared).await.unwrap(),
            Some(Value::from("A"))
        );
        assert_eq!(
            manager.read("key", "e4", "stream_B", IsolationLevel::Shared).await.unwrap(),
            Some(Value::from("B"))
        );
    }

    #[tokio::test]
    async fn state_persists_across_managers_sharing_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(ConcurrentStorage::new(dir.path(), StorageConfig::default()));

        let manager = SharedStateManager::new(Some(storage.clone()));
        manager
            .write("app_name", Value::from("agent-runtime"), "e1", "s1", IsolationLevel::Shared, StateScope::Global)
            .await
            .unwrap();

        let new_manager = SharedStateManager::new(Some(storage));
        let value = new_manager
            .read("app_name", "e-new", "s-new", IsolationLevel::Shared)
            .await
            .unwrap();
        assert_eq!(value, Some(Value::from("agent-runtime")));
    }

    #[tokio::test]
    async fn purge_expired_state_removes_only_stale_execution_partitions() {
        let manager = SharedStateManager::new(None);
        manager
            .write("key", Value::from(1), "e1", "s1", IsolationLevel::Isolated, StateScope::Execution)
            .await
            .unwrap();

        manager.purge_expired_state(Duration::from_secs(0)).await;

        let stats = manager.get_stats();
        assert_eq!(stats.execution_partitions, 0);
    }

    #[tokio::test]
    async fn snapshot_returns_full_partition_map() {
        let manager = SharedStateManager::new(None);
        manager
            .write("a", Value::from(1), "e1", "s1", IsolationLevel::Isolated, StateScope::Execution)
            .await
            .unwrap();
        manager
            .write("b", Value::from(2), "e1", "s1", IsolationLevel::Isolated, StateScope::Execution)
            .await
            .unwrap();

        let snapshot = manager.snapshot(StateScope::Execution, "e1", "s1").await;
        assert_eq!(snapshot.get("a"), Some(&Value::from(1)));
        assert_eq!(snapshot.get("b"), Some(&Value::from(2)));
    }

    #[tokio::test]
    async fn get_stats_counts_partitions_per_scope() {
        let manager = SharedStateManager::new(None);
        manager
            .write("k", Value::from(1), "e1", "s1", IsolationLevel::Shared, StateScope::Global)
            .await
            .unwrap();
        manager
            .write("k", Value::from(1), "e1", "s1", IsolationLevel::Shared, StateScope::Stream)
            .await
            .unwrap();
        manager
            .write("k", Value::from(1), "e1", "s1", IsolationLevel::Isolated, StateScope::Execution)
            .await
            .unwrap();

        let stats = manager.get_stats();
        assert_eq!(stats.global_partitions, 1);
        assert_eq!(stats.stream_partitions, 1);
        assert_eq!(stats.execution_partitions, 1);
    }
}
