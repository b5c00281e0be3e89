//! Roundtrack Simulator (`roundtrack-sim`)
//!
//! Feeds synthetic blocks through the tracker pipeline and reports when each
//! round becomes visible in memory and when it becomes durable.

mod ledger;

use clap::Parser;
use ledger::SimLedger;
use roundtrack_model::{LedgerForTracker, StorageConfig};
use roundtrack_storage::TrackerDb;
use roundtrack_tracker::{
    BlockTail, BulletinDisk, BulletinMem, CommitSyncer, LedgerTracker, TrackerConfig,
    TrackerRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "roundtrack-sim", version, about = "Simulate the roundtrack commit pipeline")]
struct Args {
    /// Number of blocks to apply
    #[arg(long, default_value_t = 32)]
    rounds: u64,

    /// Delay between applying a block and reporting it committed
    #[arg(long, default_value_t = 25)]
    commit_delay_ms: u64,

    /// Rounds the block tail keeps behind the durable round
    #[arg(long, default_value_t = 4)]
    retain: u64,

    /// Maximum rounds flushed per commit cycle
    #[arg(long, default_value_t = 16)]
    max_rounds_per_commit: u64,

    /// Directory for the tracker database (in-memory when omitted)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = TrackerConfig {
        max_rounds_per_commit: args.max_rounds_per_commit,
        block_tail_retain: args.retain,
        ..TrackerConfig::default()
    }
    .with_storage(match &args.data_dir {
        Some(dir) => StorageConfig::File(dir.clone()),
        None => StorageConfig::InMemory,
    });

    let db = Arc::new(TrackerDb::open(&config.storage)?);
    let ledger = Arc::new(SimLedger::new(db.db_round()?));
    let mem = Arc::new(BulletinMem::new());
    let disk = Arc::new(BulletinDisk::new());
    let tail = Arc::new(BlockTail::new(db.clone(), config.block_tail_retain));
    let trackers: Vec<Arc<dyn LedgerTracker>> = vec![mem.clone(), disk.clone(), tail.clone()];

    let registry = Arc::new(TrackerRegistry::new(db, trackers, config)?);
    registry.load_from_disk(ledger.as_ref())?;

    let shutdown = CancellationToken::new();
    let syncer = CommitSyncer::new(registry.clone())?.spawn(shutdown.clone());

    let start_round = ledger.latest();
    let last_round = start_round + args.rounds;
    tracing::info!(from = %start_round, to = %last_round, "roundtrack-sim v{} starting", env!("CARGO_PKG_VERSION"));

    let started = Instant::now();
    let grace = Duration::from_millis(args.rounds * args.commit_delay_ms + 1000);
    let mut watchers = Vec::new();
    let mut round = start_round.next();
    while round <= last_round {
        let mem_wait = mem.wait(round);
        let disk_wait = disk.wait(round);
        watchers.push(tokio::spawn(async move {
            mem_wait.await;
            let mem_at = started.elapsed();
            let durable = disk_wait.wait_timeout(grace).await;
            (round, mem_at, durable.then(|| started.elapsed()))
        }));
        round = round.next();
    }

    let producer = {
        let registry = registry.clone();
        let ledger = ledger.clone();
        let delay = Duration::from_millis(args.commit_delay_ms);
        tokio::spawn(async move {
            for _ in 0..args.rounds {
                let (block, delta) = ledger.append();
                registry.new_block(&block, &delta);
                tokio::time::sleep(delay).await;
                registry.committed_up_to(block.round());
            }
        })
    };
    producer.await?;
    registry.wait_idle().await;

    for watcher in watchers {
        let (round, mem_at, disk_at) = watcher.await?;
        match disk_at {
            Some(disk_at) => tracing::info!(
                round = %round,
                in_memory_ms = mem_at.as_millis() as u64,
                durable_ms = disk_at.as_millis() as u64,
                "Round released"
            ),
            // The newest rounds stay in the block tail until later reports push the base past them
            None => tracing::info!(
                round = %round,
                in_memory_ms = mem_at.as_millis() as u64,
                db_round = %registry.db_round(),
                "Round not durable yet"
            ),
        }
    }

    let durable = registry.db_round();
    if let Some(entry) = tail.entry(durable)? {
        tracing::info!(round = %durable, hash = %hex::encode(&entry.hash.as_bytes()[..8]), "Tail head");
    }
    tracing::info!(db_round = %registry.db_round(), "Simulation finished");

    shutdown.cancel();
    let _ = syncer.await;
    registry.close();
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        if let Ok(directive) = level.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
