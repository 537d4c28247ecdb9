//! Merge/finalize collaborator
//!
//! The cache never interprets statistics itself; it creates, merges and finalizes
//! buckets through an [`AggregateMerger`].

use super::key::BucketKey;
use super::types::{AggregateBucket, MeasurementEvent, TimerStats};

/// Combines raw measurements into aggregate buckets
///
/// `create` and `merge` are called while the cache lock is held and must not block.
/// `finalize` is called exactly once per bucket, right before its only persistence attempt.
pub trait AggregateMerger: Send + Sync {
    /// Build the bucket for the first event of a key.
    fn create(&self, serial: u64, key: BucketKey, event: &MeasurementEvent) -> AggregateBucket {
        let mut bucket = AggregateBucket::empty(serial, key);
        self.merge(&mut bucket, event);
        bucket
    }

    /// Fold `incoming` into `existing` in place.
    fn merge(&self, existing: &mut AggregateBucket, incoming: &MeasurementEvent);

    /// Compute closing statistics.
    fn finalize(&self, _bucket: &mut AggregateBucket) {}
}

/// Timer statistics: count, total/min/max duration and the same for CPU and exclusive time
#[derive(Debug, Default, Clone, Copy)]
pub struct TimerStatsMerger;

impl AggregateMerger for TimerStatsMerger {
    fn merge(&self, existing: &mut AggregateBucket, incoming: &MeasurementEvent) {
        let stats = &mut existing.stats;
        stats.count += 1;
        stats.duration += incoming.duration;
        stats.min = Some(min_of(stats.min, incoming.duration));
        stats.max = Some(max_of(stats.max, incoming.duration));

        if let Some(cpu) = incoming.cpu_duration {
            stats.cpu_duration += cpu;
            stats.cpu_min = Some(min_of(stats.cpu_min, cpu));
            stats.cpu_max = Some(max_of(stats.cpu_max, cpu));
        }

        if let Some(exclusive) = incoming.exclusive_duration {
            stats.exclusive_count += 1;
            stats.exclusive_duration += exclusive;
            stats.exclusive_min = Some(min_of(stats.exclusive_min, exclusive));
            stats.exclusive_max = Some(max_of(stats.exclusive_max, exclusive));
        }

        stats.charting |= incoming.charting;
    }

    fn finalize(&self, bucket: &mut AggregateBucket) {
        let stats: &mut TimerStats = &mut bucket.stats;
        if stats.count == 0 {
            return;
        }
        let count = stats.count as f64;
        stats.average = Some(stats.duration / count);
        if stats.has_cpu_metrics() {
            stats.cpu_average = Some(stats.cpu_duration / count);
        }
        if stats.exclusive_count > 0 {
            stats.exclusive_average = Some(stats.exclusive_duration / stats.exclusive_count as f64);
        }
    }
}

fn min_of(current: Option<f64>, value: f64) -> f64 {
    current.map_or(value, |c| c.min(value))
}

fn max_of(current: Option<f64>, value: f64) -> f64 {
    current.map_or(value, |c| c.max(value))
}
