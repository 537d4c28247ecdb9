//! # Write-coalescing aggregation
//!
//! Raw timing events are never written one row per event. Instead:
//! 1. Events are floored to a fixed-width time bucket per (entity, method)
//! 2. Events in the same bucket merge into one resident aggregate
//! 3. The number of resident aggregates is capped; overflow evicts oldest-created first
//! 4. Evicted aggregates travel through a lock-free hand-off queue
//! 5. A background drainer persists them in batches, one transaction per batch,
//!    and flushes the whole cache once inflow of new keys stops
//!
//! ## Module Organization
//!
//! - `types` - MeasurementEvent, TimerStats, AggregateBucket
//! - `key` - BucketKey and bucket-start flooring
//! - `merge` - merge/finalize collaborator trait and timer statistics
//! - `handoff` - lock-free queue of evicted buckets
//! - `cache` - bounded map + FIFO eviction
//! - `drainer` - background persistence and quiescence detection

pub mod cache;
pub mod drainer;
pub mod handoff;
pub mod key;
pub mod merge;
pub mod types;

pub use cache::AggregationCache;
pub use drainer::{CacheDrainer, CycleReport, DrainerStats};
pub use handoff::PersistHandoffQueue;
pub use key::{bucket_start, BucketKey};
pub use merge::{AggregateMerger, TimerStatsMerger};
pub use types::{AggregateBucket, MeasurementEvent, TimerStats};
