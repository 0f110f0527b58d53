// vecload — distributor.rs
// Splits the record range across a fixed worker pool and runs one worker per
// partition on its own thread.
// Author: d65v <https://github.com/d65v>

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver};
use serde::{Deserialize, Serialize};

use crate::control::ControlReceiver;
use crate::sink::Sink;
use crate::worker::{Worker, WorkerReport};
use crate::{LoadError, Result};

// ── Partition Plan ────────────────────────────────────────────────────────────

/// Id range `[low, high)` owned by one worker for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub worker_id: usize,
    pub low: usize,
    pub high: usize,
}

impl PartitionAssignment {
    pub fn new(worker_id: usize, records_per_worker: usize) -> Self {
        let low = worker_id * records_per_worker;
        Self {
            worker_id,
            low,
            high: low + records_per_worker,
        }
    }

    pub fn len(&self) -> usize {
        self.high - self.low
    }

    pub fn is_empty(&self) -> bool {
        self.high == self.low
    }
}

/// Equal split of `total_records` over `num_workers`.
///
/// The `total_records % num_workers` trailing records belong to no worker
/// and are never generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub total_records: usize,
    pub num_workers: usize,
    pub records_per_worker: usize,
    assignments: Vec<PartitionAssignment>,
}

impl PartitionPlan {
    /// # Errors
    /// Returns `LoadError::Config` when `num_workers` is zero.
    pub fn new(total_records: usize, num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(LoadError::Config("worker count must be > 0".into()));
        }

        let records_per_worker = total_records / num_workers;
        let assignments = (0..num_workers)
            .map(|w| PartitionAssignment::new(w, records_per_worker))
            .collect();

        let plan = Self {
            total_records,
            num_workers,
            records_per_worker,
            assignments,
        };

        if plan.remainder() != 0 {
            log::warn!(
                "TOTAL_RECORDS ({}) is not divisible by WORKERS ({}): \
                 {} records will not be generated",
                total_records,
                num_workers,
                plan.remainder()
            );
        }
        Ok(plan)
    }

    pub fn assignments(&self) -> &[PartitionAssignment] {
        &self.assignments
    }

    /// Records no worker owns.
    pub fn remainder(&self) -> usize {
        self.total_records % self.num_workers
    }

    /// Records the workers will actually generate.
    pub fn planned_records(&self) -> usize {
        self.records_per_worker * self.num_workers
    }
}

// ── Worker Pool ───────────────────────────────────────────────────────────────

/// Per-worker settings shared by the whole pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub dim: usize,
    pub seed: Option<u64>,
}

/// One unit of work: a partition and the control channel that goes with it.
pub struct Job {
    pub assignment: PartitionAssignment,
    pub control: ControlReceiver,
}

/// Publish one job per worker onto a closed intake channel.
///
/// The receivers must be in worker order, as returned by
/// [`crate::control::ControlPlane::new`].
pub fn publish_jobs(plan: &PartitionPlan, controls: Vec<ControlReceiver>) -> Result<Receiver<Job>> {
    if controls.len() != plan.num_workers {
        return Err(LoadError::Config(format!(
            "{} control channels for {} workers",
            controls.len(),
            plan.num_workers
        )));
    }

    let (tx, rx) = bounded(plan.num_workers);
    for (assignment, control) in plan.assignments().iter().zip(controls) {
        debug_assert_eq!(assignment.worker_id, control.worker_id());
        tx.send(Job {
            assignment: *assignment,
            control,
        })
        .map_err(|_| LoadError::Worker("job intake closed early".into()))?;
    }
    // Dropping the sender closes intake: workers stop after their last job.
    Ok(rx)
}

/// Run every job to completion on `plan.num_workers` threads.
///
/// Returns reports in worker order. The first worker failure is returned
/// immediately; workers still running are left detached.
pub fn run_workers(
    plan: &PartitionPlan,
    controls: Vec<ControlReceiver>,
    settings: WorkerSettings,
    sink: Arc<dyn Sink>,
) -> Result<Vec<WorkerReport>> {
    let jobs = publish_jobs(plan, controls)?;
    let (outcome_tx, outcome_rx) = bounded::<Result<WorkerReport>>(plan.num_workers);
    let mut handles = Vec::with_capacity(plan.num_workers);

    for thread_id in 0..plan.num_workers {
        let jobs = jobs.clone();
        let outcome_tx = outcome_tx.clone();
        let sink = sink.clone();

        let handle = thread::Builder::new()
            .name(format!("vecload-worker-{}", thread_id))
            .spawn(move || {
                for job in jobs.iter() {
                    let worker = Worker::new(
                        job.assignment,
                        settings.batch_size,
                        settings.dim,
                        settings.seed,
                        sink.clone(),
                        job.control,
                    );
                    if outcome_tx.send(worker.run()).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| {
                LoadError::Worker(format!("failed to spawn worker {}: {}", thread_id, e))
            })?;
        handles.push(handle);
    }
    drop(outcome_tx);

    let mut reports = Vec::with_capacity(plan.num_workers);
    while reports.len() < plan.num_workers {
        match outcome_rx.recv() {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                log::error!("worker failed, aborting run: {}", e);
                return Err(e);
            }
            Err(_) => {
                return Err(LoadError::Worker(format!(
                    "{} of {} workers exited without reporting",
                    plan.num_workers - reports.len(),
                    plan.num_workers
                )));
            }
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            log::error!("worker thread panicked after reporting");
        }
    }

    reports.sort_by_key(|r| r.worker_id);
    Ok(reports)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
