//! Persistence gateways
//!
//! Routes batches of evicted buckets to either SQLite or a JSONL file based on
//! configuration. Each batch is one transaction.

pub mod error;
pub mod gateway;
pub mod jsonl;
pub mod pragma;
pub mod sqlite;

pub use error::PersistError;
pub use gateway::PersistenceGateway;
pub use jsonl::JsonlGateway;
pub use sqlite::SqliteGateway;

use crate::config::{BackendType, CacheConfig};
use std::sync::Arc;

/// Create the gateway selected by `config.backend`.
pub fn open_gateway(config: &CacheConfig) -> Result<Arc<dyn PersistenceGateway>, PersistError> {
    let gateway: Arc<dyn PersistenceGateway> = match config.backend {
        BackendType::Sqlite => Arc::new(SqliteGateway::new(&config.db_path)?),
        BackendType::Jsonl => Arc::new(JsonlGateway::new(&config.db_path)?),
    };
    Ok(gateway)
}
