// vecload — example/batch.rs
// Demonstrates batch accumulation and insert with error reporting.

use std::sync::Arc;

use vload::batch::Batch;
use vload::generator::RecordGenerator;
use vload::sink::{ensure_collection, CollectionSchema, CollectionSink, Sink};
use vload::store::MemoryStore;

fn main() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    ensure_collection(store.as_ref(), &CollectionSchema::random_vectors("demo", 3), 1, 1)?;
    let sink = CollectionSink::new(store.clone(), "demo");

    let mut gen = RecordGenerator::new(0, 7, 3, Some(1));
    let mut batch = Batch::with_capacity(3);

    for offset in 0..7 {
        if batch.push(gen.generate(offset)) {
            let ack = sink.insert("partition0", batch.ids(), batch.vectors())?;
            println!("flushed full batch: {} inserted", ack.inserted);
            batch.clear();
        }
    }
    if !batch.is_empty() {
        let ack = sink.insert("partition0", batch.ids(), batch.vectors())?;
        println!("flushed final batch: {} inserted", ack.inserted);
        batch.clear();
    }

    // Wrong dim: will fail
    match sink.insert("partition0", &[99], &[vec![1.0, 2.0]]) {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("rejected: {}", e),
    }

    // Unknown partition: will fail
    match sink.insert("partition9", &[100], &[vec![0.0; 3]]) {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("rejected: {}", e),
    }

    println!("\nids in partition0: {:?}", store.partition_ids("demo", "partition0")?);
    Ok(())
}
