// vecload — generator.rs
// Deterministic record ids and uniformly random vectors.
// Author: d65v <https://github.com/d65v>

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::Record;

/// Global id of the record at `offset` inside worker `worker_id`'s range.
///
/// Ids are unique by construction: every worker owns the contiguous block
/// `[worker_id * records_per_worker, (worker_id + 1) * records_per_worker)`.
#[inline]
pub fn record_id(worker_id: usize, records_per_worker: usize, offset: usize) -> i64 {
    (worker_id * records_per_worker + offset) as i64
}

// ── Record Generator ──────────────────────────────────────────────────────────

/// Produces records for one worker. Components are drawn from `[0, 1)`.
pub struct RecordGenerator {
    worker_id: usize,
    records_per_worker: usize,
    dim: usize,
    rng: StdRng,
}

impl RecordGenerator {
    /// Create a generator for `worker_id`.
    ///
    /// With a `seed`, the worker's stream is seeded with `seed + worker_id`
    /// so two runs with the same seed produce identical vectors.
    pub fn new(worker_id: usize, records_per_worker: usize, dim: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s.wrapping_add(worker_id as u64)),
            None => StdRng::from_entropy(),
        };
        Self {
            worker_id,
            records_per_worker,
            dim,
            rng,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Generate the record at `offset` within this worker's range.
    pub fn generate(&mut self, offset: usize) -> Record {
        debug_assert!(
            offset < self.records_per_worker,
            "offset {} outside worker range of {}",
            offset,
            self.records_per_worker
        );
        Record {
            id: record_id(self.worker_id, self.records_per_worker, offset),
            vector: self.random_vector(),
        }
    }

    fn random_vector(&mut self) -> Vec<f32> {
        (0..self.dim).map(|_| self.rng.gen::<f32>()).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
