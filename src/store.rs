// vecload — store.rs
// In-process storage client: collections, partitions and rows held in memory.
// Used for dry runs and as the storage double in tests.
// Author: d65v <https://github.com/d65v>

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::sink::{CollectionSchema, InsertAck, StorageClient, ROW_COUNT_KEY};
use crate::{LoadError, Record, Result};

// ── Storage Layout ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Partition {
    ids: Vec<i64>,
    /// Empty when the store discards vectors.
    vectors: Vec<Vec<f32>>,
}

#[derive(Debug)]
struct Collection {
    schema: CollectionSchema,
    shards: u32,
    partitions: HashMap<String, Partition>,
}

impl Collection {
    fn row_count(&self) -> usize {
        self.partitions.values().map(|p| p.ids.len()).sum()
    }
}

// ── Memory Store ──────────────────────────────────────────────────────────────

pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    keep_vectors: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store that keeps every inserted vector.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            keep_vectors: true,
        }
    }

    /// A store that validates and counts rows but only retains ids.
    pub fn discarding_vectors() -> Self {
        Self {
            keep_vectors: false,
            ..Self::new()
        }
    }

    /// Ids stored in one partition, in insertion order.
    pub fn partition_ids(&self, collection: &str, partition: &str) -> Result<Vec<i64>> {
        let collections = self.collections.read();
        let coll = lookup(&collections, collection)?;
        let part = coll
            .partitions
            .get(partition)
            .ok_or_else(|| partition_not_found(collection, partition))?;
        Ok(part.ids.clone())
    }

    /// Shard count the collection was created with.
    pub fn shards(&self, collection: &str) -> Result<u32> {
        let collections = self.collections.read();
        Ok(lookup(&collections, collection)?.shards)
    }

    /// Retrieve a stored record by id. `None` when the id is absent or the
    /// store discards vectors.
    pub fn get(&self, collection: &str, id: i64) -> Option<Record> {
        let collections = self.collections.read();
        let coll = collections.get(collection)?;
        coll.partitions.values().find_map(|p| {
            let pos = p.ids.iter().position(|x| *x == id)?;
            p.vectors.get(pos).map(|v| Record {
                id,
                vector: v.clone(),
            })
        })
    }
}

fn lookup<'a>(
    collections: &'a HashMap<String, Collection>,
    name: &str,
) -> Result<&'a Collection> {
    collections
        .get(name)
        .ok_or_else(|| LoadError::CollectionNotFound {
            name: name.to_string(),
        })
}

fn partition_not_found(collection: &str, partition: &str) -> LoadError {
    LoadError::PartitionNotFound {
        collection: collection.to_string(),
        partition: partition.to_string(),
    }
}

impl StorageClient for MemoryStore {
    fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().contains_key(name))
    }

    fn create_collection(&self, schema: &CollectionSchema, shards: u32) -> Result<()> {
        if schema.dim == 0 {
            return Err(LoadError::Storage("vector dim must be > 0".into()));
        }
        let mut collections = self.collections.write();
        if collections.contains_key(&schema.name) {
            return Err(LoadError::Storage(format!(
                "collection {} already exists",
                schema.name
            )));
        }

        // Every collection starts with its default partition.
        let mut partitions = HashMap::new();
        partitions.insert("_default".to_string(), Partition::default());

        collections.insert(
            schema.name.clone(),
            Collection {
                schema: schema.clone(),
                shards,
                partitions,
            },
        );
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| LoadError::CollectionNotFound {
                name: name.to_string(),
            })
    }

    fn has_partition(&self, collection: &str, partition: &str) -> Result<bool> {
        let collections = self.collections.read();
        Ok(lookup(&collections, collection)?
            .partitions
            .contains_key(partition))
    }

    fn create_partition(&self, collection: &str, partition: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| LoadError::CollectionNotFound {
                name: collection.to_string(),
            })?;
        if coll.partitions.contains_key(partition) {
            return Err(LoadError::Storage(format!(
                "partition {}/{} already exists",
                collection, partition
            )));
        }
        coll.partitions
            .insert(partition.to_string(), Partition::default());
        Ok(())
    }

    fn insert(
        &self,
        collection: &str,
        partition: &str,
        ids: &[i64],
        vectors: &[Vec<f32>],
    ) -> Result<InsertAck> {
        if ids.len() != vectors.len() {
            return Err(LoadError::Storage(format!(
                "column length mismatch: {} ids, {} vectors",
                ids.len(),
                vectors.len()
            )));
        }

        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| LoadError::CollectionNotFound {
                name: collection.to_string(),
            })?;

        let dim = coll.schema.dim;
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(LoadError::DimensionMismatch {
                expected: dim,
                got: bad.len(),
            });
        }

        let part = coll
            .partitions
            .get_mut(partition)
            .ok_or_else(|| partition_not_found(collection, partition))?;

        part.ids.extend_from_slice(ids);
        if self.keep_vectors {
            part.vectors.extend(vectors.iter().cloned());
        }

        Ok(InsertAck {
            inserted: ids.len(),
        })
    }

    fn collection_statistics(&self, collection: &str) -> Result<HashMap<String, String>> {
        let collections = self.collections.read();
        let coll = lookup(&collections, collection)?;
        let mut stats = HashMap::new();
        stats.insert(ROW_COUNT_KEY.to_string(), coll.row_count().to_string());
        Ok(stats)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
