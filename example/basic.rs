// vecload — example/basic.rs
// Demonstrates a full load into the in-process store.
// Run with:  cargo run --example basic

use std::sync::Arc;
use std::time::Duration;

use vload::sink::partition_name;
use vload::store::MemoryStore;
use vload::{run_ingest, LoadConfig};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("── vecload Basic Example ─────────────────────");

    let config = LoadConfig {
        total_records: 10_003,
        workers: 4,
        batch_size: 1_000,
        dim: 16,
        seed: Some(42),
        ready_attempts: 1,
        ready_delay: Duration::ZERO,
        ..LoadConfig::default()
    };

    let store = Arc::new(MemoryStore::new());
    let report = run_ingest(&config, store.clone())?;

    println!("\nPartitions:");
    for w in &report.workers {
        let ids = store.partition_ids(&config.collection, &partition_name(w.worker_id))?;
        println!(
            "  {:12}  ids [{}, {}]  acked={}",
            w.partition,
            ids.first().copied().unwrap_or_default(),
            ids.last().copied().unwrap_or_default(),
            w.records_acked
        );
    }

    println!("\nDropped remainder: {}", report.dropped_remainder);
    println!("Row count:         {:?}", report.row_count);

    if let Some(record) = store.get(&config.collection, 0) {
        println!("\nRecord 0: {:?}", &record.vector[..4]);
    }

    Ok(())
}
