//! Lock-free hand-off queue between evicting producers and the drainer

use super::types::AggregateBucket;
use crossbeam_queue::SegQueue;

/// Unbounded MPMC FIFO of buckets that left the cache but are not yet persisted
///
/// Producers never block on it. Each bucket is moved in and moved out exactly once.
#[derive(Debug, Default)]
pub struct PersistHandoffQueue {
    inner: SegQueue<AggregateBucket>,
}

impl PersistHandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, bucket: AggregateBucket) {
        self.inner.push(bucket);
    }

    /// Pop everything currently queued, oldest first.
    ///
    /// Buckets pushed concurrently may or may not be included; they are never lost.
    pub fn drain(&self) -> Vec<AggregateBucket> {
        let mut batch = Vec::with_capacity(self.inner.len());
        while let Some(bucket) = self.inner.pop() {
            batch.push(bucket);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
