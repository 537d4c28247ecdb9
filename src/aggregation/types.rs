//! Core data structures for timer aggregation

use super::key::BucketKey;
use serde::{Deserialize, Serialize};

/// Single raw timing measurement from an instrumented method
///
/// Immutable input: the cache reads it, never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEvent {
    /// Monitored entity (agent / platform) the measurement came from
    pub entity_id: u64,

    /// Instrumented method
    pub method_id: u64,

    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,

    /// Wall-clock duration of the invocation (ms)
    pub duration: f64,

    /// CPU time of the invocation (ms), when the sensor measures it
    #[serde(default)]
    pub cpu_duration: Option<f64>,

    /// Time spent in the method itself, excluding instrumented callees (ms)
    #[serde(default)]
    pub exclusive_duration: Option<f64>,

    /// Whether the measurement should feed long-term charts
    #[serde(default)]
    pub charting: bool,
}

impl MeasurementEvent {
    pub fn new(entity_id: u64, method_id: u64, timestamp_ms: i64, duration: f64) -> Self {
        Self {
            entity_id,
            method_id,
            timestamp_ms,
            duration,
            cpu_duration: None,
            exclusive_duration: None,
            charting: false,
        }
    }

    pub fn with_cpu_duration(mut self, cpu_duration: f64) -> Self {
        self.cpu_duration = Some(cpu_duration);
        self
    }

    pub fn with_exclusive_duration(mut self, exclusive_duration: f64) -> Self {
        self.exclusive_duration = Some(exclusive_duration);
        self
    }

    pub fn with_charting(mut self, charting: bool) -> Self {
        self.charting = charting;
        self
    }
}

/// Merged timer statistics
///
/// Min/max fields are `None` until the first value arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerStats {
    pub count: u64,
    pub duration: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub cpu_duration: f64,
    pub cpu_min: Option<f64>,
    pub cpu_max: Option<f64>,

    /// Only measurements that carried an exclusive duration are counted here
    pub exclusive_count: u64,
    pub exclusive_duration: f64,
    pub exclusive_min: Option<f64>,
    pub exclusive_max: Option<f64>,

    /// Sticky: set once any merged measurement asked for charting
    pub charting: bool,

    /// Set by finalize, right before persistence
    pub average: Option<f64>,
    pub cpu_average: Option<f64>,
    pub exclusive_average: Option<f64>,
}

impl TimerStats {
    pub fn has_cpu_metrics(&self) -> bool {
        self.cpu_min.is_some()
    }

    pub fn has_exclusive_metrics(&self) -> bool {
        self.exclusive_min.is_some()
    }
}

/// Running aggregate for one (entity, method, bucket-start) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBucket {
    /// Creation order of the bucket inside the cache; unique per cache instance
    pub serial: u64,

    pub entity_id: u64,
    pub method_id: u64,

    /// Start of the time window (ms), floored to the aggregation period
    pub bucket_start_ms: i64,

    pub stats: TimerStats,
}

impl AggregateBucket {
    pub fn empty(serial: u64, key: BucketKey) -> Self {
        Self {
            serial,
            entity_id: key.entity_id,
            method_id: key.method_id,
            bucket_start_ms: key.bucket_start_ms,
            stats: TimerStats::default(),
        }
    }

    pub fn key(&self) -> BucketKey {
        BucketKey {
            entity_id: self.entity_id,
            method_id: self.method_id,
            bucket_start_ms: self.bucket_start_ms,
        }
    }
}
