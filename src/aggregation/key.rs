//! Bucket key derivation
//!
//! The cache map is keyed by the full (entity, method, bucket start) tuple, so two
//! distinct tuples can never be merged into one bucket.

use super::types::MeasurementEvent;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub entity_id: u64,
    pub method_id: u64,
    pub bucket_start_ms: i64,
}

impl BucketKey {
    /// Key of the bucket `event` falls into for the given aggregation period.
    pub fn for_event(event: &MeasurementEvent, aggregation_period_ms: u64) -> Self {
        Self {
            entity_id: event.entity_id,
            method_id: event.method_id,
            bucket_start_ms: bucket_start(event.timestamp_ms, aggregation_period_ms),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.entity_id, self.method_id, self.bucket_start_ms)
    }
}

/// Floor `timestamp_ms` to the start of its fixed-width window.
///
/// Uses euclidean division so pre-epoch timestamps floor downwards too. Windows that
/// would start below `i64::MIN` saturate to it, so any timestamp is accepted.
/// A zero period is treated as 1ms (one bucket per distinct timestamp).
pub fn bucket_start(timestamp_ms: i64, aggregation_period_ms: u64) -> i64 {
    let period = i64::try_from(aggregation_period_ms.max(1)).unwrap_or(i64::MAX);
    timestamp_ms.div_euclid(period).saturating_mul(period)
}
