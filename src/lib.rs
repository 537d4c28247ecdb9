//! # timerflow
//!
//! Write-coalescing aggregation cache for method timing measurements.
//!
//! ```text
//! producer threads ──record()──► AggregationCache (map + FIFO, one lock)
//!                                      │ eviction / drain_all
//!                                      ▼
//!                             PersistHandoffQueue (lock-free)
//!                                      │ CacheDrainer cycle
//!                                      ▼
//!                          PersistenceGateway (one transaction per batch)
//! ```

pub mod aggregation;
pub mod config;
pub mod persistence;

pub use aggregation::{
    AggregateBucket, AggregateMerger, AggregationCache, BucketKey, CacheDrainer, DrainerStats,
    MeasurementEvent, PersistHandoffQueue, TimerStats, TimerStatsMerger,
};
pub use config::{BackendType, CacheConfig};
pub use persistence::{open_gateway, JsonlGateway, PersistError, PersistenceGateway, SqliteGateway};
