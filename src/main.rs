// vecload — main.rs
// Binary entry point: bulk-load random vectors into a partitioned collection.
// Author: d65v <https://github.com/d65v>

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use vload::milvus::{MilvusClient, MilvusConfig};
use vload::sink::{drop_collection_if_exists, record_count, wait_for_storage};
use vload::store::MemoryStore;
use vload::{run_ingest, IngestReport, LoadConfig, StorageClient};

/// Bulk-load synthetic vectors into a partitioned vector store
#[derive(Parser)]
#[command(name = "vecload", version, about)]
struct Cli {
    /// Verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate and insert records (default)
    Run(RunArgs),
    /// Print the collection's row count
    Count,
    /// Drop the collection if it exists
    Drop,
    /// Probe the storage service until it answers
    Wait,
}

#[derive(Args, Default)]
struct RunArgs {
    /// Total records to generate (overrides TOTAL_RECORDS)
    #[arg(long)]
    records: Option<usize>,
    /// Worker count (overrides WORKERS)
    #[arg(long)]
    workers: Option<usize>,
    /// Batch capacity (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,
    /// Write into an in-process store instead of the storage service
    #[arg(long)]
    in_memory: bool,
    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    // Load .env if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let outcome = match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run(args),
        Command::Count => count(),
        Command::Drop => drop_collection(),
        Command::Wait => wait(),
    };

    if let Err(e) = outcome {
        eprintln!("[vecload] error: {:#}", e);
        std::process::exit(1);
    }
}

fn connect(config: &LoadConfig) -> Result<Arc<MilvusClient>> {
    let address = config
        .address
        .clone()
        .context("ADDRESS not set in environment")?;
    let client = MilvusClient::new(MilvusConfig {
        token: config.token.clone(),
        ..MilvusConfig::new(address)
    })
    .context("error connecting to storage service")?;
    Ok(Arc::new(client))
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = LoadConfig::from_env_with_counts(args.records, args.workers)?;
    if let Some(n) = args.batch_size {
        config.batch_size = n;
    }
    config.validate()?;

    println!("records to insert : {}", config.total_records);
    println!("worker threads    : {}", config.workers);

    let report = if args.in_memory {
        log::info!("Using in-memory store; vectors are validated and discarded");
        run_ingest(&config, Arc::new(MemoryStore::discarding_vectors()))
    } else {
        run_ingest(&config, connect(&config)?)
    }
    .context("ingestion run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("\n[vecload] Run summary for '{}':", report.collection);
    for w in &report.workers {
        println!(
            "  worker {:3}  {:12}  acked={:10}  batches={:5}  failed={:3}  pauses={}",
            w.worker_id,
            w.partition,
            w.records_acked,
            w.batches_flushed,
            w.batches_failed,
            w.pauses
        );
    }
    if report.dropped_remainder > 0 {
        println!(
            "  {} of {} requested records were not assigned to any worker",
            report.dropped_remainder, report.requested_records
        );
    }
    if let Some(rows) = report.row_count {
        println!("  collection row count: {}", rows);
    }
    println!("{}", completion_line(report));
}

fn completion_line(report: &IngestReport) -> String {
    if report.batches_failed == 0 && report.dropped_remainder == 0 {
        format!(
            "All records inserted successfully! Application runtime: {:.2}s",
            report.elapsed_secs
        )
    } else {
        format!(
            "Finished with {} of {} requested records acked ({} batches failed). \
             Application runtime: {:.2}s",
            report.records_acked,
            report.requested_records,
            report.batches_failed,
            report.elapsed_secs
        )
    }
}

fn count() -> Result<()> {
    let config = LoadConfig::storage_from_env()?;
    let client = connect(&config)?;
    let rows = record_count(client.as_ref(), &config.collection)?;
    println!("{}: {} records", config.collection, rows);
    Ok(())
}

fn drop_collection() -> Result<()> {
    let config = LoadConfig::storage_from_env()?;
    let client = connect(&config)?;
    if drop_collection_if_exists(client.as_ref(), &config.collection)? {
        println!("dropped {}", config.collection);
    } else {
        println!("{} doesn't exist", config.collection);
    }
    Ok(())
}

fn wait() -> Result<()> {
    let config = LoadConfig::storage_from_env()?;
    let client = connect(&config)?;
    wait_for_storage(client.as_ref(), config.ready_attempts, config.ready_delay)?;
    let names = client.list_collections()?;
    println!("storage ready; collections: {:?}", names);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
