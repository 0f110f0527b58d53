// vecload — lib.rs
// Public API, error types, run configuration, core data types, re-exports.
// Author: d65v <https://github.com/d65v>

pub mod batch;
pub mod control;
pub mod distributor;
pub mod generator;
pub mod milvus;
pub mod monitor;
pub mod pipeline;
pub mod sink;
pub mod store;
pub mod worker;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::control::{BroadcastMode, ControlPlane, ControlReceiver, WorkerState};
pub use crate::distributor::{PartitionAssignment, PartitionPlan};
pub use crate::pipeline::{run_ingest, IngestReport};
pub use crate::sink::{CollectionSink, Sink, StorageClient};
pub use crate::worker::{Worker, WorkerReport};

/// Dimensionality of every generated vector unless overridden.
pub const DIM: usize = 150;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("Partition not found: {collection}/{partition}")]
    PartitionNotFound { collection: String, partition: String },

    #[error("Final flush failed in worker {worker}: {reason}")]
    FinalFlush { worker: usize, reason: String },

    #[error("Memory sample error: {0}")]
    MemorySample(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, LoadError>;

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Records requested for the whole run
    pub total_records: usize,
    /// Fixed worker pool size, one partition per worker
    pub workers: usize,
    /// Batch capacity `B`
    pub batch_size: usize,
    /// Pause workers when available/total memory drops below this fraction
    pub memory_threshold: f64,
    /// Storage service address, e.g. `http://localhost:19530`
    pub address: Option<String>,
    pub collection: String,
    pub shards: u32,
    pub dim: usize,
    /// Base seed for reproducible vectors; each worker uses `seed + worker_id`
    pub seed: Option<u64>,
    pub token: Option<String>,
    pub ready_attempts: u32,
    pub ready_delay: Duration,
    pub broadcast_mode: BroadcastMode,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            total_records: 0,
            workers: 1,
            batch_size: 90_000,
            memory_threshold: 0.10,
            address: None,
            collection: "random_vectors".to_string(),
            shards: 2,
            dim: DIM,
            seed: None,
            token: None,
            ready_attempts: 10,
            ready_delay: Duration::from_secs(5),
            broadcast_mode: BroadcastMode::Overwrite,
        }
    }
}

impl LoadConfig {
    /// Load config from environment variables.
    ///
    /// `TOTAL_RECORDS` and `WORKERS` are required; everything else falls back
    /// to [`LoadConfig::default`].
    ///
    /// # Errors
    /// Returns `LoadError::Config` when a required variable is missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_counts(None, None)
    }

    /// [`LoadConfig::from_env`] where a given `records` or `workers` count
    /// replaces the environment variable, which is then not required.
    pub fn from_env_with_counts(records: Option<usize>, workers: Option<usize>) -> Result<Self> {
        let base = Self::storage_from_env()?;
        Ok(Self {
            total_records: count_or_var(records, "TOTAL_RECORDS")?,
            workers: count_or_var(workers, "WORKERS")?,
            ..base
        })
    }

    /// Like [`LoadConfig::from_env`] but without the record and worker
    /// counts, for commands that only talk to the storage service.
    pub fn storage_from_env() -> Result<Self> {
        let defaults = Self::default();

        let broadcast_mode = match std::env::var("BROADCAST_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.broadcast_mode,
        };

        Ok(Self {
            batch_size: optional_var("BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            memory_threshold: optional_var("MEMORY_THRESHOLD")?
                .unwrap_or(defaults.memory_threshold),
            address: std::env::var("ADDRESS").ok().filter(|a| !a.is_empty()),
            collection: std::env::var("COLLECTION")
                .unwrap_or_else(|_| defaults.collection.clone()),
            shards: optional_var("SHARDS")?.unwrap_or(defaults.shards),
            dim: optional_var("VECTOR_DIM")?.unwrap_or(defaults.dim),
            seed: optional_var("SEED")?,
            token: std::env::var("MILVUS_TOKEN").ok().filter(|t| !t.is_empty()),
            ready_attempts: optional_var("READY_ATTEMPTS")?.unwrap_or(defaults.ready_attempts),
            ready_delay: optional_var("READY_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.ready_delay),
            broadcast_mode,
            ..defaults
        })
    }

    /// Reject configurations no run can execute.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LoadError::Config("WORKERS must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(LoadError::Config("BATCH_SIZE must be > 0".into()));
        }
        if self.dim == 0 {
            return Err(LoadError::Config("VECTOR_DIM must be > 0".into()));
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold < 1.0) {
            return Err(LoadError::Config(format!(
                "MEMORY_THRESHOLD must lie in (0, 1), got {}",
                self.memory_threshold
            )));
        }
        if self.collection.is_empty() {
            return Err(LoadError::Config("COLLECTION cannot be empty".into()));
        }
        Ok(())
    }
}

fn required_var<T: std::str::FromStr>(key: &str) -> Result<T> {
    optional_var(key)?.ok_or_else(|| LoadError::Config(format!("{} not set in environment", key)))
}

fn count_or_var(flag: Option<usize>, key: &str) -> Result<usize> {
    match flag {
        Some(n) => Ok(n),
        None => required_var(key),
    }
}

fn optional_var<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LoadError::Config(format!("invalid {} value: '{}'", key, raw))),
        _ => Ok(None),
    }
}

// ── Core Data Types ───────────────────────────────────────────────────────────

/// A single generated record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub vector: Vec<f32>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
