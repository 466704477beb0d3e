//! Walkthrough of scaling a sharded quote store out and back in.
//!
//! Seeds an in-memory store with a few symbols, adds a shard, forces one
//! bucket to fail, retries it, and finally removes the shard again.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example rebalance

use chrono::{Duration as ChronoDuration, Utc};
use quoteshard::testing::FaultyStore;
use quoteshard::{MemoryStore, QuoteRecord, ShardConfig, ShardCoordinator, ShardStore};
use std::env;
use std::sync::Arc;

const SYMBOLS: &[&str] = &[
    "AAPL", "MSFT", "GOOG", "AMZN", "NVDA", "META", "TSLA", "NFLX", "AMD", "INTC", "ORCL", "IBM",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let memory = Arc::new(MemoryStore::new());
    let store = Arc::new(FaultyStore::new(memory.clone() as Arc<dyn ShardStore>));
    let coordinator = ShardCoordinator::new(ShardConfig::new(8, 2), store.clone() as Arc<dyn ShardStore>)?;

    println!("===========================================");
    println!("  Shard rebalance walkthrough");
    println!("===========================================");

    // Seed a few minutes of quotes per symbol
    let now = Utc::now();
    let records: Vec<QuoteRecord> = SYMBOLS
        .iter()
        .flat_map(|symbol| {
            (0..5).map(move |i| QuoteRecord::flat(*symbol, now - ChronoDuration::minutes(i), 100.0 + i as f64))
        })
        .collect();
    let inserted = coordinator.insert_quotes(records).await?;
    println!("Inserted {} quotes", inserted);
    print_stats(&coordinator).await?;

    // Make the first symbol's collection fail to copy on the next scale-out
    let next = {
        let snapshot = coordinator.ring().snapshot();
        snapshot.moves_to(&snapshot.rebuild(snapshot.node_count() + 1))
    };
    let victim = SYMBOLS.iter().copied().find(|symbol| {
        coordinator
            .ring()
            .bucket_of(symbol)
            .map(|bucket| next.iter().any(|mv| mv.bucket == bucket))
            .unwrap_or(false)
    });
    if let Some(victim) = victim {
        println!("\nInjecting copy failure for {}", victim);
        store.fail_copy_of(victim);
    }

    let added = coordinator.add_node().await?;
    println!(
        "\nAdded {} (took most buckets from {:?}): moved {:?}, failed {:?}",
        added.new_database,
        added.old_database,
        added.report.moved,
        added.report.failed_buckets()
    );
    println!("Ring state: {}", coordinator.state());

    if let Some(victim) = victim {
        let location = coordinator.locate(victim)?;
        println!(
            "{} is owned by node {} but still read from {}",
            victim, location.owner, location.database
        );
    }

    store.heal();
    let retry = coordinator.retry_migration().await?;
    println!("\nRetry moved {:?}; ring state: {}", retry.moved, coordinator.state());
    print_stats(&coordinator).await?;

    let removed = coordinator.remove_node().await?;
    println!(
        "\nRemoved {}: moved {:?} back",
        removed.database, removed.report.moved
    );
    print_stats(&coordinator).await?;

    let metrics = coordinator.metrics();
    println!(
        "\nRebalances: {} started, {} completed, {} partial; {} documents copied",
        metrics.rebalances_started,
        metrics.rebalances_completed,
        metrics.rebalances_partial,
        metrics.documents_copied
    );
    println!(
        "Migration passes: {} (mean {:.3}s, p99 <= {}s)",
        metrics.migration_passes,
        metrics.migration_duration.mean(),
        metrics.migration_duration.percentile(99.0)
    );

    coordinator.shutdown().await?;
    println!("Store closed: {}", memory.is_closed());
    Ok(())
}

async fn print_stats(coordinator: &ShardCoordinator) -> Result<(), Box<dyn std::error::Error>> {
    for stats in coordinator.shard_stats().await? {
        println!(
            "  {:<12} buckets={:<3} documents={:<4} collections={:?}",
            stats.database, stats.owned_buckets, stats.documents, stats.collections
        );
    }
    Ok(())
}
