//! Background drainer - persists evicted buckets and flushes a quiescent cache
//!
//! Each cycle:
//! 1. Quiescence check: if the newest created bucket is the same one seen on the
//!    previous cycle, no new key arrived in between and the whole cache is drained
//!    into the hand-off queue.
//! 2. Queue drain: everything in the hand-off queue is finalized and written in one
//!    transaction.
//!
//! A failed transaction is logged and counted; its buckets are not re-queued.

use super::cache::AggregationCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Running totals of a drainer's work
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainerStats {
    pub cycles: u64,
    pub quiescent_flushes: u64,
    pub batches_persisted: u64,
    pub buckets_persisted: u64,
    pub failed_batches: u64,
    pub buckets_lost: u64,
}

/// Outcome of a single drainer cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Buckets moved out of the cache by the quiescence check
    pub quiescent_drained: Option<usize>,
    pub persisted: usize,
    pub lost: usize,
}

pub struct CacheDrainer {
    cache: Arc<AggregationCache>,
    sleep_period: Duration,
    last_seen_newest: Option<u64>,
    stats: DrainerStats,
}

impl CacheDrainer {
    pub fn new(cache: Arc<AggregationCache>, sleep_period: Duration) -> Self {
        Self {
            cache,
            sleep_period,
            last_seen_newest: None,
            stats: DrainerStats::default(),
        }
    }

    pub fn stats(&self) -> &DrainerStats {
        &self.stats
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// Wakes every `sleep_period`. On shutdown the hand-off queue is drained one last
    /// time; resident buckets are left for [`AggregationCache::flush_and_persist_all`].
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> DrainerStats {
        log::info!("⏰ Starting cache drainer (interval: {}ms)", self.sleep_period.as_millis());

        let mut timer = interval_at(Instant::now() + self.sleep_period, self.sleep_period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = timer.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("🔄 Cache drainer stopping, draining hand-off queue...");
        self.drain_queue().await;
        log::info!(
            "✅ Cache drainer stopped: {} cycles, {} buckets persisted, {} lost",
            self.stats.cycles,
            self.stats.buckets_persisted,
            self.stats.buckets_lost
        );
        self.stats
    }

    /// One quiescence check followed by one queue drain.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.stats.cycles += 1;

        let newest = self.cache.newest_bucket();
        let quiescent_drained = if newest == self.last_seen_newest {
            let drained = self.cache.drain_all();
            if drained > 0 {
                self.stats.quiescent_flushes += 1;
                log::debug!("💤 No new buckets since last cycle, drained {} resident buckets", drained);
            }
            Some(drained)
        } else {
            None
        };
        self.last_seen_newest = newest;

        let (persisted, lost) = self.drain_queue().await;
        CycleReport { quiescent_drained, persisted, lost }
    }

    async fn drain_queue(&mut self) -> (usize, usize) {
        let batch = self.cache.handoff().drain();
        if batch.is_empty() {
            return (0, 0);
        }

        let size = batch.len();
        let first_serial = batch.first().map(|b| b.serial).unwrap_or_default();
        let last_serial = batch.last().map(|b| b.serial).unwrap_or_default();

        match self.cache.persist(batch).await {
            Ok(persisted) => {
                self.stats.batches_persisted += 1;
                self.stats.buckets_persisted += persisted as u64;
                log::debug!("✅ Drainer persisted {} buckets", persisted);
                (persisted, 0)
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                self.stats.buckets_lost += size as u64;
                log::error!(
                    "❌ Failed to persist batch of {} buckets (serials {}..={}), batch dropped: {}",
                    size,
                    first_serial,
                    last_serial,
                    e
                );
                (0, size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{AggregateBucket, MeasurementEvent, TimerStatsMerger};
    use crate::config::CacheConfig;
    use crate::persistence::{PersistError, PersistenceGateway};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        batches: Mutex<Vec<Vec<AggregateBucket>>>,
        fail: AtomicBool,
    }

    impl RecordingGateway {
        fn persisted_serials(&self) -> Vec<u64> {
            self.batches.lock().unwrap().iter().flatten().map(|b| b.serial).collect()
        }
    }

    #[async_trait]
    impl PersistenceGateway for RecordingGateway {
        async fn run_in_transaction(&self, batch: &[AggregateBucket]) -> Result<(), PersistError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PersistError::Database("injected failure".to_string()));
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "Recording"
        }
    }

    fn setup(max_elements: usize) -> (Arc<AggregationCache>, Arc<RecordingGateway>, CacheDrainer) {
        let gateway = Arc::new(RecordingGateway::default());
        let config = CacheConfig::new(1_000, max_elements, 50);
        let cache = Arc::new(AggregationCache::new(&config, Arc::new(TimerStatsMerger), gateway.clone()));
        let drainer = CacheDrainer::new(cache.clone(), config.cache_clean_sleeping_period());
        (cache, gateway, drainer)
    }

    #[tokio::test]
    async fn test_queue_drain_persists_evicted() {
        let (cache, gateway, mut drainer) = setup(1);
        cache.record(&MeasurementEvent::new(1, 1, 0, 1.0));
        cache.record(&MeasurementEvent::new(2, 1, 0, 1.0));

        let report = drainer.run_cycle().await;
        assert_eq!(report.quiescent_drained, None);
        assert_eq!(report.persisted, 1);
        assert_eq!(gateway.persisted_serials(), vec![1]);
        assert_eq!(cache.live_count(), 1);
    }

    #[tokio::test]
    async fn test_quiescence_flush_after_two_idle_cycles() {
        let (cache, gateway, mut drainer) = setup(10);
        for entity in 1..=3 {
            cache.record(&MeasurementEvent::new(entity, 1, 0, 1.0));
        }

        // First sighting of the newest bucket: nothing flushed
        let first = drainer.run_cycle().await;
        assert_eq!(first.quiescent_drained, None);
        assert_eq!(cache.live_count(), 3);

        // Merges do not count as inflow of new keys
        cache.record(&MeasurementEvent::new(1, 1, 5, 1.0));

        let second = drainer.run_cycle().await;
        assert_eq!(second.quiescent_drained, Some(3));
        assert_eq!(second.persisted, 3);
        assert_eq!(cache.live_count(), 0);

        let third = drainer.run_cycle().await;
        assert_eq!(third.quiescent_drained, Some(0));
        assert_eq!(third.persisted, 0);

        assert_eq!(gateway.persisted_serials(), vec![1, 2, 3]);
        assert_eq!(drainer.stats().quiescent_flushes, 1);
        assert_eq!(drainer.stats().buckets_persisted, 3);
    }

    #[tokio::test]
    async fn test_new_key_postpones_quiescence() {
        let (cache, _gateway, mut drainer) = setup(10);
        cache.record(&MeasurementEvent::new(1, 1, 0, 1.0));
        drainer.run_cycle().await;

        cache.record(&MeasurementEvent::new(2, 1, 0, 1.0));
        let report = drainer.run_cycle().await;
        assert_eq!(report.quiescent_drained, None);
        assert_eq!(cache.live_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_not_requeued() {
        let (cache, gateway, mut drainer) = setup(1);
        cache.record(&MeasurementEvent::new(1, 1, 0, 1.0));
        cache.record(&MeasurementEvent::new(2, 1, 0, 1.0));
        gateway.fail.store(true, Ordering::SeqCst);

        let report = drainer.run_cycle().await;
        assert_eq!(report.lost, 1);
        assert_eq!(cache.pending_handoff(), 0);

        // The lost bucket never comes back; only the quiescent flush of the resident one lands
        gateway.fail.store(false, Ordering::SeqCst);
        let report = drainer.run_cycle().await;
        assert_eq!(report.quiescent_drained, Some(1));
        assert_eq!(report.persisted, 1);
        assert_eq!(gateway.persisted_serials(), vec![2]);

        let stats = drainer.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.buckets_lost, 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_drains_queue() {
        let (cache, gateway, drainer) = setup(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(drainer.run(shutdown_rx));

        cache.record(&MeasurementEvent::new(1, 1, 0, 1.0));
        cache.record(&MeasurementEvent::new(2, 1, 0, 1.0));
        cache.record(&MeasurementEvent::new(3, 1, 0, 1.0));

        shutdown_tx.send(true).unwrap();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("drainer did not stop")
            .unwrap();

        // Evicted buckets reach storage either via a cycle or the final drain
        assert_eq!(stats.buckets_persisted, 2);
        assert_eq!(cache.pending_handoff(), 0);
        assert_eq!(cache.live_count(), 1);
        let mut serials = gateway.persisted_serials();
        serials.sort_unstable();
        assert_eq!(serials, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_run_cycles_on_timer() {
        let (cache, gateway, drainer) = setup(10);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        cache.record(&MeasurementEvent::new(1, 1, 0, 1.0));

        let handle = tokio::spawn(drainer.run(shutdown_rx));

        // 50ms interval: two idle cycles are well within this window
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while cache.live_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        drop(shutdown_tx);
        let stats = handle.await.unwrap();
        assert_eq!(cache.live_count(), 0);
        assert!(stats.cycles >= 2);
        assert_eq!(gateway.persisted_serials(), vec![1]);
    }
}
