//! Bounded write-coalescing cache
//!
//! Producers call [`AggregationCache::record`] from any thread. Events with the same
//! (entity, method, bucket start) merge into one resident bucket. When a creation pushes
//! the resident count above `max_elements`, the oldest-created buckets move to the
//! hand-off queue. Eviction is FIFO by creation, not by last update: a bucket that is
//! merged into constantly is still evicted once it is the oldest.
//!
//! The map, the FIFO and the serial counter sit behind one mutex. No I/O happens under
//! it; persistence of evicted buckets is done by the drainer from the lock-free queue.

use super::handoff::PersistHandoffQueue;
use super::key::BucketKey;
use super::merge::AggregateMerger;
use super::types::{AggregateBucket, MeasurementEvent};
use crate::config::CacheConfig;
use crate::persistence::{PersistError, PersistenceGateway};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct CacheState {
    buckets: HashMap<BucketKey, AggregateBucket>,
    /// Keys in creation order; always the same key set as `buckets`
    fifo: VecDeque<BucketKey>,
    next_serial: u64,
}

pub struct AggregationCache {
    aggregation_period_ms: u64,
    max_elements: AtomicUsize,
    state: Mutex<CacheState>,

    /// Mirrors `buckets.len()`; written under the lock, readable without it
    live: AtomicUsize,

    /// Serial of the most recently created bucket, 0 before the first creation
    newest: AtomicU64,

    handoff: PersistHandoffQueue,
    merger: Arc<dyn AggregateMerger>,
    gateway: Arc<dyn PersistenceGateway>,
}

impl AggregationCache {
    pub fn new(
        config: &CacheConfig,
        merger: Arc<dyn AggregateMerger>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Self {
        log::info!(
            "🗃️  Aggregation cache: period {}ms, max {} buckets, backend {}",
            config.aggregation_period_ms,
            config.max_elements,
            gateway.backend_type()
        );

        Self {
            aggregation_period_ms: config.aggregation_period_ms.max(1),
            max_elements: AtomicUsize::new(config.max_elements),
            state: Mutex::new(CacheState::default()),
            live: AtomicUsize::new(0),
            newest: AtomicU64::new(0),
            handoff: PersistHandoffQueue::new(),
            merger,
            gateway,
        }
    }

    /// Merge `event` into its bucket, creating (and possibly evicting) as needed.
    ///
    /// Never fails. Only the creation path can trigger eviction.
    pub fn record(&self, event: &MeasurementEvent) {
        let key = BucketKey::for_event(event, self.aggregation_period_ms);
        let mut state = self.lock_state();

        if let Some(bucket) = state.buckets.get_mut(&key) {
            self.merger.merge(bucket, event);
            return;
        }

        state.next_serial += 1;
        let serial = state.next_serial;
        let bucket = self.merger.create(serial, key, event);
        state.buckets.insert(key, bucket);
        state.fifo.push_back(key);
        self.newest.store(serial, Ordering::Release);

        let max_elements = self.max_elements.load(Ordering::Relaxed);
        let mut evicted = 0usize;
        while state.buckets.len() > max_elements {
            let Some(oldest) = state.fifo.pop_front() else {
                break;
            };
            if let Some(bucket) = state.buckets.remove(&oldest) {
                self.handoff.push(bucket);
                evicted += 1;
            }
        }
        self.live.store(state.buckets.len(), Ordering::Release);
        drop(state);

        if evicted > 1 {
            log::debug!("Evicted {} buckets to catch up with cap {}", evicted, max_elements);
        }
    }

    /// Move every resident bucket to the hand-off queue, oldest first.
    ///
    /// Atomic with respect to `record`: an event recorded concurrently either lands in a
    /// drained bucket before the drain or in a fresh bucket after it.
    pub fn drain_all(&self) -> usize {
        let mut state = self.lock_state();
        let drained = Self::take_resident(&mut state);
        let count = drained.len();
        for bucket in drained {
            self.handoff.push(bucket);
        }
        self.live.store(0, Ordering::Release);
        count
    }

    /// Shutdown hook: persist every resident bucket directly, in one transaction.
    ///
    /// Bypasses the hand-off queue. Safe to call while the drainer is still running.
    /// On failure the buckets are gone from the cache and not re-queued.
    pub async fn flush_and_persist_all(&self) -> Result<usize, PersistError> {
        let batch = self.take_all();
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        log::info!("🔄 Flushing {} resident buckets", count);
        self.persist(batch).await?;
        Ok(count)
    }

    /// Finalize each bucket and write the batch in one transaction.
    pub(crate) async fn persist(&self, mut batch: Vec<AggregateBucket>) -> Result<usize, PersistError> {
        if batch.is_empty() {
            return Ok(0);
        }
        for bucket in batch.iter_mut() {
            self.merger.finalize(bucket);
        }
        self.gateway.run_in_transaction(&batch).await?;
        Ok(batch.len())
    }

    fn take_all(&self) -> Vec<AggregateBucket> {
        let mut state = self.lock_state();
        let drained = Self::take_resident(&mut state);
        self.live.store(0, Ordering::Release);
        drained
    }

    /// Remove every bucket in creation order. Caller holds the lock.
    fn take_resident(state: &mut CacheState) -> Vec<AggregateBucket> {
        let CacheState { buckets, fifo, .. } = state;

        let mut drained = Vec::with_capacity(fifo.len());
        for key in fifo.drain(..) {
            if let Some(bucket) = buckets.remove(&key) {
                drained.push(bucket);
            }
        }
        debug_assert!(buckets.is_empty());
        drained
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handoff(&self) -> &PersistHandoffQueue {
        &self.handoff
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    /// Number of resident buckets
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements.load(Ordering::Relaxed)
    }

    /// Change the cap at runtime. A lowered cap is enforced on the next creating `record`.
    pub fn set_max_elements(&self, max_elements: usize) {
        self.max_elements.store(max_elements, Ordering::Relaxed);
    }

    pub fn aggregation_period(&self) -> Duration {
        Duration::from_millis(self.aggregation_period_ms)
    }

    /// Evicted buckets waiting for the drainer
    pub fn pending_handoff(&self) -> usize {
        self.handoff.len()
    }

    /// Serial of the most recently created bucket, if any was created yet.
    pub fn newest_bucket(&self) -> Option<u64> {
        match self.newest.load(Ordering::Acquire) {
            0 => None,
            serial => Some(serial),
        }
    }
}
