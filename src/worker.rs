// vecload — worker.rs
// Insertion loop for one partition: generate, accumulate, flush, honour the
// memory monitor's pause signal between flushes.
// Author: d65v <https://github.com/d65v>

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::control::{ControlReceiver, WorkerState};
use crate::distributor::PartitionAssignment;
use crate::generator::RecordGenerator;
use crate::sink::{partition_name, Sink};
use crate::{LoadError, Result};

/// Which flush failed decides whether the worker survives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    /// A full batch mid-range. Failures are logged and the batch is lost.
    Interior,
    /// The trailing partial batch. Failures abort the worker.
    Final,
}

/// What one worker did over its range.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub partition: String,
    pub records_generated: usize,
    pub records_acked: usize,
    pub batches_flushed: usize,
    pub batches_failed: usize,
    pub pauses: usize,
}

// ── Worker ────────────────────────────────────────────────────────────────────

pub struct Worker {
    assignment: PartitionAssignment,
    partition: String,
    batch: Batch,
    generator: RecordGenerator,
    sink: Arc<dyn Sink>,
    control: ControlReceiver,
    report: WorkerReport,
}

impl Worker {
    pub fn new(
        assignment: PartitionAssignment,
        batch_size: usize,
        dim: usize,
        seed: Option<u64>,
        sink: Arc<dyn Sink>,
        control: ControlReceiver,
    ) -> Self {
        debug_assert_eq!(assignment.worker_id, control.worker_id());
        let partition = partition_name(assignment.worker_id);
        let generator = RecordGenerator::new(assignment.worker_id, assignment.len(), dim, seed);
        let report = WorkerReport {
            worker_id: assignment.worker_id,
            partition: partition.clone(),
            ..WorkerReport::default()
        };
        Self {
            assignment,
            partition,
            batch: Batch::with_capacity(batch_size),
            generator,
            sink,
            control,
            report,
        }
    }

    pub fn id(&self) -> usize {
        self.assignment.worker_id
    }

    /// Generate and flush the whole assigned range.
    ///
    /// # Errors
    /// Returns `LoadError::FinalFlush` when the trailing partial batch cannot
    /// be inserted. Interior flush failures never surface here.
    pub fn run(mut self) -> Result<WorkerReport> {
        let id = self.id();
        log::info!(
            "Worker {} starting: ids [{}, {}) into {}",
            id,
            self.assignment.low,
            self.assignment.high,
            self.partition
        );

        for offset in 0..self.assignment.len() {
            let record = self.generator.generate(offset);
            self.report.records_generated += 1;

            if self.batch.push(record) {
                self.flush(FlushKind::Interior)?;
                self.check_control();
            }
        }

        if !self.batch.is_empty() {
            self.flush(FlushKind::Final)?;
        }

        log::info!(
            "Worker {} done inserting: {} acked, {} batches failed",
            id,
            self.report.records_acked,
            self.report.batches_failed
        );
        Ok(self.report)
    }

    fn flush(&mut self, kind: FlushKind) -> Result<()> {
        let id = self.id();
        let size = self.batch.len();

        log::debug!("Worker {} inserting {} records", id, size);
        let started = Instant::now();
        let outcome = self
            .sink
            .insert(&self.partition, self.batch.ids(), self.batch.vectors());
        self.batch.clear();

        match outcome {
            Ok(ack) => {
                self.report.batches_flushed += 1;
                self.report.records_acked += ack.inserted;
                log::debug!(
                    "Worker {}: insertion of {} took {:.3}s",
                    id,
                    size,
                    started.elapsed().as_secs_f64()
                );
                Ok(())
            }
            Err(e) => match kind {
                FlushKind::Interior => {
                    self.report.batches_failed += 1;
                    log::error!("Worker {}: error inserting {} records: {}", id, size, e);
                    Ok(())
                }
                FlushKind::Final => Err(LoadError::FinalFlush {
                    worker: id,
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Non-blocking look at the control channel; blocks only once paused.
    fn check_control(&mut self) {
        if self.control.try_signal() != Some(WorkerState::Paused) {
            return;
        }

        let id = self.id();
        self.report.pauses += 1;
        log::info!("Worker {} paused due to memory constraints.", id);

        self.control.await_resume();
        log::info!("Worker {} resumed", id);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
