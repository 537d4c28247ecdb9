//! Transactional persistence interface for aggregate buckets

use super::error::PersistError;
use crate::aggregation::AggregateBucket;
use async_trait::async_trait;

/// Executes a batch of bucket writes atomically
///
/// Implementations commit the whole batch on success. On failure nothing from the
/// batch may remain visible in storage and the error is returned to the caller.
/// An empty batch is a no-op.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn run_in_transaction(&self, batch: &[AggregateBucket]) -> Result<(), PersistError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
