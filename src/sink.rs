// vecload — sink.rs
// Storage contracts consumed by the loader, the partition-level sink adapter,
// and collection provisioning helpers.
// Author: d65v <https://github.com/d65v>

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{LoadError, Result};

/// Key under which collection statistics report the stored row count.
pub const ROW_COUNT_KEY: &str = "row_count";

/// Primary key field, supplied by the loader rather than auto-generated.
pub const ID_FIELD: &str = "id";
pub const VECTOR_FIELD: &str = "vector";

// ── Contracts ─────────────────────────────────────────────────────────────────

/// Acknowledgement for one accepted insert.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertAck {
    pub inserted: usize,
}

/// Where workers write their batches. One partition per worker.
pub trait Sink: Send + Sync {
    fn insert(&self, partition: &str, ids: &[i64], vectors: &[Vec<f32>]) -> Result<InsertAck>;
}

/// Schema of the collection every run writes into: an `Int64` primary key
/// ([`ID_FIELD`]) and one float vector field ([`VECTOR_FIELD`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub description: String,
    pub dim: usize,
}

impl CollectionSchema {
    pub fn random_vectors(name: &str, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            description: "A collection of random vectors".to_string(),
            dim,
        }
    }
}

/// Operations the loader needs from a vector storage service.
pub trait StorageClient: Send + Sync {
    fn has_collection(&self, name: &str) -> Result<bool>;

    fn create_collection(&self, schema: &CollectionSchema, shards: u32) -> Result<()>;

    fn drop_collection(&self, name: &str) -> Result<()>;

    fn has_partition(&self, collection: &str, partition: &str) -> Result<bool>;

    fn create_partition(&self, collection: &str, partition: &str) -> Result<()>;

    fn insert(
        &self,
        collection: &str,
        partition: &str,
        ids: &[i64],
        vectors: &[Vec<f32>],
    ) -> Result<InsertAck>;

    /// Free-form statistics; `row_count` must be present.
    fn collection_statistics(&self, collection: &str) -> Result<HashMap<String, String>>;

    fn list_collections(&self) -> Result<Vec<String>>;
}

/// Partition written by `worker_id`.
pub fn partition_name(worker_id: usize) -> String {
    format!("partition{}", worker_id)
}

// ── Collection Sink ───────────────────────────────────────────────────────────

/// Binds a storage client to one collection so workers only name partitions.
pub struct CollectionSink<C: StorageClient + ?Sized> {
    client: Arc<C>,
    collection: String,
}

impl<C: StorageClient + ?Sized> CollectionSink<C> {
    pub fn new(client: Arc<C>, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl<C: StorageClient + ?Sized> Sink for CollectionSink<C> {
    fn insert(&self, partition: &str, ids: &[i64], vectors: &[Vec<f32>]) -> Result<InsertAck> {
        self.client.insert(&self.collection, partition, ids, vectors)
    }
}

// ── Provisioning ──────────────────────────────────────────────────────────────

/// Probe the service with `list_collections` until it answers.
///
/// # Errors
/// Returns `LoadError::Connection` after `attempts` failed probes.
pub fn wait_for_storage<C: StorageClient + ?Sized>(
    client: &C,
    attempts: u32,
    delay: Duration,
) -> Result<()> {
    for attempt in 1..=attempts {
        match client.list_collections() {
            Ok(_) => {
                log::info!("Storage service is ready");
                return Ok(());
            }
            Err(e) => {
                log::warn!(
                    "Storage service not ready yet ({}), retrying in {:?}... (attempt {}/{})",
                    e,
                    delay,
                    attempt,
                    attempts
                );
                if attempt < attempts {
                    thread::sleep(delay);
                }
            }
        }
    }
    Err(LoadError::Connection(format!(
        "storage service is not ready after {} attempts",
        attempts
    )))
}

/// Create the collection when absent, then `partition{i}` for every worker
/// that does not have one yet.
pub fn ensure_collection<C: StorageClient + ?Sized>(
    client: &C,
    schema: &CollectionSchema,
    shards: u32,
    num_partitions: usize,
) -> Result<()> {
    if !client.has_collection(&schema.name)? {
        log::info!("Creating collection: {}", schema.name);
        client.create_collection(schema, shards)?;
    }

    for worker_id in 0..num_partitions {
        let partition = partition_name(worker_id);
        if !client.has_partition(&schema.name, &partition)? {
            log::debug!("Creating partition {}/{}", schema.name, partition);
            client.create_partition(&schema.name, &partition)?;
        }
    }
    Ok(())
}

/// Rows currently stored in `collection`.
pub fn record_count<C: StorageClient + ?Sized>(client: &C, collection: &str) -> Result<i64> {
    if !client.has_collection(collection)? {
        return Err(LoadError::CollectionNotFound {
            name: collection.to_string(),
        });
    }

    let stats = client.collection_statistics(collection)?;
    let raw = stats.get(ROW_COUNT_KEY).ok_or_else(|| {
        LoadError::Storage(format!("{} not found in collection statistics", ROW_COUNT_KEY))
    })?;
    raw.trim().parse::<i64>().map_err(|e| {
        LoadError::Storage(format!("failed to parse {} '{}': {}", ROW_COUNT_KEY, raw, e))
    })
}

/// Drop `collection` if it exists. Returns whether anything was dropped.
pub fn drop_collection_if_exists<C: StorageClient + ?Sized>(
    client: &C,
    collection: &str,
) -> Result<bool> {
    if !client.has_collection(collection)? {
        log::info!("Collection {} does not exist", collection);
        return Ok(false);
    }
    client.drop_collection(collection)?;
    log::info!("Dropped collection {}", collection);
    Ok(true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `list_collections` a fixed number of times, then delegates.
    struct SlowStart {
        inner: MemoryStore,
        failures_left: AtomicU32,
    }

    impl StorageClient for SlowStart {
        fn has_collection(&self, name: &str) -> Result<bool> {
            self.inner.has_collection(name)
        }
        fn create_collection(&self, schema: &CollectionSchema, shards: u32) -> Result<()> {
            self.inner.create_collection(schema, shards)
        }
        fn drop_collection(&self, name: &str) -> Result<()> {
            self.inner.drop_collection(name)
        }
        fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
            self.inner.has_partition(collection, partition)
        }
        fn create_partition(&self, collection: &str, partition: &str) -> Result<()> {
            self.inner.create_partition(collection, partition)
        }
        fn insert(
            &self,
            collection: &str,
            partition: &str,
            ids: &[i64],
            vectors: &[Vec<f32>],
        ) -> Result<InsertAck> {
            self.inner.insert(collection, partition, ids, vectors)
        }
        fn collection_statistics(&self, collection: &str) -> Result<HashMap<String, String>> {
            self.inner.collection_statistics(collection)
        }
        fn list_collections(&self) -> Result<Vec<String>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(LoadError::Connection("proxy not ready".into()));
            }
            self.inner.list_collections()
        }
    }

    fn slow_start(failures: u32) -> SlowStart {
        SlowStart {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }

    #[test]
    fn test_partition_name() {
        assert_eq!(partition_name(0), "partition0");
        assert_eq!(partition_name(12), "partition12");
    }

    #[test]
    fn test_wait_for_storage_retries_then_succeeds() {
        let client = slow_start(3);
        assert!(wait_for_storage(&client, 10, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_wait_for_storage_gives_up() {
        let client = slow_start(5);
        let err = wait_for_storage(&client, 3, Duration::ZERO).unwrap_err();
        assert!(matches!(err, LoadError::Connection(_)));
    }

    #[test]
    fn test_ensure_collection_is_idempotent() {
        let store = MemoryStore::new();
        let schema = CollectionSchema::random_vectors("random_vectors", 4);
        ensure_collection(&store, &schema, 2, 3).unwrap();
        ensure_collection(&store, &schema, 2, 4).unwrap();

        assert!(store.has_collection("random_vectors").unwrap());
        for i in 0..4 {
            assert!(store.has_partition("random_vectors", &partition_name(i)).unwrap());
        }
    }

    #[test]
    fn test_record_count_missing_collection() {
        let store = MemoryStore::new();
        let err = record_count(&store, "ghost").unwrap_err();
        assert!(matches!(err, LoadError::CollectionNotFound { .. }));
    }

    #[test]
    fn test_collection_sink_routes_to_partition() {
        let store = Arc::new(MemoryStore::new());
        let schema = CollectionSchema::random_vectors("c", 2);
        ensure_collection(store.as_ref(), &schema, 1, 2).unwrap();

        let sink = CollectionSink::new(store.clone(), "c");
        let ack = sink
            .insert("partition1", &[7, 8], &[vec![0.1, 0.2], vec![0.3, 0.4]])
            .unwrap();

        assert_eq!(ack.inserted, 2);
        assert_eq!(record_count(store.as_ref(), "c").unwrap(), 2);
        assert_eq!(store.partition_ids("c", "partition1").unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_drop_collection_if_exists() {
        let store = MemoryStore::new();
        assert!(!drop_collection_if_exists(&store, "c").unwrap());
        ensure_collection(&store, &CollectionSchema::random_vectors("c", 2), 1, 1).unwrap();
        assert!(drop_collection_if_exists(&store, "c").unwrap());
        assert!(!store.has_collection("c").unwrap());
    }
}
