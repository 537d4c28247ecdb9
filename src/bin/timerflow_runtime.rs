//! Timerflow Runtime
//!
//! Reads newline-delimited JSON measurement events from stdin, coalesces them in the
//! aggregation cache and persists aggregates through the configured gateway.
//!
//! Usage:
//!   some-agent | cargo run --release --bin timerflow_runtime
//!
//! Event format (one per line):
//!   {"entity_id":1,"method_id":7,"timestamp_ms":1700000000123,"duration":4.2,"cpu_duration":3.9}
//!
//! Environment variables:
//!   TIMERFLOW_AGGREGATION_PERIOD_MS - Bucket width (default: 5000)
//!   TIMERFLOW_MAX_ELEMENTS - Resident bucket cap (default: 100000)
//!   TIMERFLOW_CACHE_CLEAN_SLEEPING_PERIOD_MS - Drainer interval (default: 30000)
//!   TIMERFLOW_DB_PATH - Storage path (default: timerflow.db)
//!   TIMERFLOW_BACKEND - sqlite | jsonl (default: sqlite)
//!
//! Shutdown (stdin EOF or CTRL+C): stop the drainer, drain the hand-off queue, then
//! flush every resident bucket in one transaction.

use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use timerflow::{open_gateway, AggregationCache, CacheConfig, CacheDrainer, MeasurementEvent, TimerStatsMerger};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Timerflow Runtime");

    let config = CacheConfig::from_env();
    info!("📊 Configuration:");
    info!("   ├─ Aggregation period: {}ms", config.aggregation_period_ms);
    info!("   ├─ Max elements: {}", config.max_elements);
    info!("   ├─ Drainer interval: {}ms", config.cache_clean_sleeping_period_ms);
    info!("   └─ Storage: {} ({:?})", config.db_path, config.backend);

    let gateway = open_gateway(&config)?;
    let cache = Arc::new(AggregationCache::new(&config, Arc::new(TimerStatsMerger), gateway));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drainer = CacheDrainer::new(cache.clone(), config.cache_clean_sleeping_period());
    let drainer_handle = tokio::spawn(drainer.run(shutdown_rx));
    info!("✅ Cache drainer spawned");
    info!("🔄 Reading events from stdin (CTRL+C to stop)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut recorded = 0u64;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<MeasurementEvent>(line) {
                            Ok(event) => {
                                cache.record(&event);
                                recorded += 1;
                            }
                            Err(e) => {
                                rejected += 1;
                                warn!("⚠️  Skipping malformed event: {}", e);
                            }
                        }
                    }
                    Ok(None) => {
                        info!("📭 stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("❌ Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => warn!("⚠️  Received CTRL+C, shutting down..."),
                    Err(e) => error!("❌ Failed to listen for CTRL+C: {}", e),
                }
                break;
            }
        }
    }

    info!("📊 Ingested {} events ({} rejected), {} buckets resident", recorded, rejected, cache.live_count());

    // Drainer first, so its final queue drain runs before the resident flush
    let _ = shutdown_tx.send(true);
    match drainer_handle.await {
        Ok(stats) => info!(
            "   ├─ Drainer: {} buckets persisted, {} failed batches",
            stats.buckets_persisted, stats.failed_batches
        ),
        Err(e) => error!("❌ Drainer task failed: {}", e),
    }

    match cache.flush_and_persist_all().await {
        Ok(count) => info!("   └─ Final flush: {} buckets", count),
        Err(e) => error!("❌ Final flush failed, resident buckets lost: {}", e),
    }

    info!("✅ Timerflow runtime stopped");
    Ok(())
}
