// vecload — pipeline.rs
// End-to-end run: readiness probe, provisioning, monitor, worker pool, report.
// Author: d65v <https://github.com/d65v>

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::control::ControlPlane;
use crate::distributor::{run_workers, PartitionPlan, WorkerSettings};
use crate::monitor::{MemoryMonitor, MemoryProbe, MonitorConfig, SysinfoProbe};
use crate::sink::{
    ensure_collection, record_count, wait_for_storage, CollectionSchema, CollectionSink, Sink,
    StorageClient,
};
use crate::worker::WorkerReport;
use crate::{LoadConfig, Result};

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub collection: String,
    pub requested_records: usize,
    /// Records assigned to workers after integer division
    pub planned_records: usize,
    pub dropped_remainder: usize,
    pub records_acked: usize,
    pub batches_failed: usize,
    /// Row count reported by the store after the run, if it answered
    pub row_count: Option<i64>,
    pub elapsed_secs: f64,
    pub workers: Vec<WorkerReport>,
}

/// Run a full ingestion against `client`, sampling host memory via `sysinfo`.
pub fn run_ingest<C>(config: &LoadConfig, client: Arc<C>) -> Result<IngestReport>
where
    C: StorageClient + ?Sized + 'static,
{
    run_ingest_with_probe(
        config,
        client,
        SysinfoProbe::new(),
        MonitorConfig::with_threshold(config.memory_threshold),
    )
}

/// [`run_ingest`] with an explicit memory probe and monitor cadence.
pub fn run_ingest_with_probe<C, P>(
    config: &LoadConfig,
    client: Arc<C>,
    probe: P,
    monitor_config: MonitorConfig,
) -> Result<IngestReport>
where
    C: StorageClient + ?Sized + 'static,
    P: MemoryProbe + 'static,
{
    config.validate()?;
    let started = Instant::now();

    // Setup failures are fatal before any worker starts.
    wait_for_storage(client.as_ref(), config.ready_attempts, config.ready_delay)?;
    let schema = CollectionSchema::random_vectors(&config.collection, config.dim);
    ensure_collection(client.as_ref(), &schema, config.shards, config.workers)?;

    let plan = PartitionPlan::new(config.total_records, config.workers)?;
    log::info!(
        "Loading {} records: {} workers x {} records, batch size {}",
        plan.planned_records(),
        plan.num_workers,
        plan.records_per_worker,
        config.batch_size
    );

    let (plane, controls) = ControlPlane::new(plan.num_workers, config.broadcast_mode);
    let monitor = MemoryMonitor::new(monitor_config, probe, plane).spawn()?;

    let sink: Arc<dyn Sink> = Arc::new(CollectionSink::new(client.clone(), &config.collection));
    let settings = WorkerSettings {
        batch_size: config.batch_size,
        dim: config.dim,
        seed: config.seed,
    };
    let workers = run_workers(&plan, controls, settings, sink)?;
    monitor.stop();

    let row_count = match record_count(client.as_ref(), &config.collection) {
        Ok(n) => Some(n),
        Err(e) => {
            log::warn!("could not read row count after run: {}", e);
            None
        }
    };

    let report = IngestReport {
        collection: config.collection.clone(),
        requested_records: config.total_records,
        planned_records: plan.planned_records(),
        dropped_remainder: plan.remainder(),
        records_acked: workers.iter().map(|w| w.records_acked).sum(),
        batches_failed: workers.iter().map(|w| w.batches_failed).sum(),
        row_count,
        elapsed_secs: started.elapsed().as_secs_f64(),
        workers,
    };
    log::info!(
        "Run finished in {:.2}s: {} records acked, {} batches failed",
        report.elapsed_secs,
        report.records_acked,
        report.batches_failed
    );
    Ok(report)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::partition_name;
    use crate::store::MemoryStore;
    use crate::{BroadcastMode, LoadError};
    use std::collections::HashSet;
    use std::time::Duration;

    struct Plenty;

    impl MemoryProbe for Plenty {
        fn available_fraction(&mut self) -> Result<f64> {
            Ok(0.9)
        }
    }

    /// Replays fixed readings, then repeats the last one.
    struct Replay {
        readings: Vec<f64>,
        next: usize,
    }

    impl MemoryProbe for Replay {
        fn available_fraction(&mut self) -> Result<f64> {
            let i = self.next.min(self.readings.len() - 1);
            self.next += 1;
            Ok(self.readings[i])
        }
    }

    fn fast_monitor() -> MonitorConfig {
        MonitorConfig {
            threshold: 0.10,
            normal_interval: Duration::from_millis(5),
            paused_interval: Duration::from_millis(5),
        }
    }

    fn config(total: usize, workers: usize, batch: usize) -> LoadConfig {
        LoadConfig {
            total_records: total,
            workers,
            batch_size: batch,
            dim: 8,
            seed: Some(3),
            ready_attempts: 1,
            ready_delay: Duration::ZERO,
            broadcast_mode: BroadcastMode::Overwrite,
            ..LoadConfig::default()
        }
    }

    #[test]
    fn test_full_run_against_memory_store() {
        let store = Arc::new(MemoryStore::new());
        let report =
            run_ingest_with_probe(&config(1000, 4, 64), store.clone(), Plenty, fast_monitor())
                .unwrap();

        assert_eq!(report.records_acked, 1000);
        assert_eq!(report.row_count, Some(1000));
        assert_eq!(report.dropped_remainder, 0);
        assert_eq!(store.shards("random_vectors").unwrap(), 2);

        for w in 0..4 {
            let ids = store.partition_ids("random_vectors", &partition_name(w)).unwrap();
            let expected: Vec<i64> = ((w * 250) as i64..((w + 1) * 250) as i64).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_remainder_is_reported_not_inserted() {
        let store = Arc::new(MemoryStore::discarding_vectors());
        let report =
            run_ingest_with_probe(&config(1001, 4, 100), store.clone(), Plenty, fast_monitor())
                .unwrap();

        assert_eq!(report.planned_records, 1000);
        assert_eq!(report.dropped_remainder, 1);
        assert_eq!(report.row_count, Some(1000));

        let mut all = HashSet::new();
        for w in 0..4 {
            all.extend(store.partition_ids("random_vectors", &partition_name(w)).unwrap());
        }
        assert!(!all.contains(&1000));
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_invalid_config_fails_before_provisioning() {
        let store = Arc::new(MemoryStore::new());
        let err = run_ingest_with_probe(&config(10, 0, 5), store.clone(), Plenty, fast_monitor())
            .unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
        assert!(!store.has_collection("random_vectors").unwrap());
    }

    #[test]
    fn test_memory_dip_pauses_each_worker_at_most_once() {
        for mode in [BroadcastMode::Overwrite, BroadcastMode::Blocking] {
            let store = Arc::new(MemoryStore::discarding_vectors());
            let probe = Replay {
                readings: vec![0.5, 0.05, 0.05, 0.5],
                next: 0,
            };
            let cfg = LoadConfig {
                broadcast_mode: mode,
                ..config(40_000, 4, 250)
            };
            let report = run_ingest_with_probe(&cfg, store, probe, fast_monitor()).unwrap();

            assert_eq!(report.records_acked, report.planned_records);
            assert_eq!(report.row_count, Some(40_000));
            for w in &report.workers {
                assert!(
                    w.pauses <= 1,
                    "{:?}: worker {} paused {} times",
                    mode,
                    w.worker_id,
                    w.pauses
                );
                assert_eq!(w.batches_failed, 0);
            }
        }
    }

    #[test]
    fn test_report_serializes() {
        let store = Arc::new(MemoryStore::new());
        let report =
            run_ingest_with_probe(&config(10, 2, 4), store, Plenty, fast_monitor()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["records_acked"], 10);
        assert_eq!(json["workers"].as_array().unwrap().len(), 2);
    }
}
