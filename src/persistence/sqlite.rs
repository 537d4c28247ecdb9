//! SQLite gateway for aggregate buckets
//!
//! One row per persisted bucket in `timer_aggregates`. Every batch runs inside a single
//! transaction: commit on success, rollback when any insert fails.

use super::error::PersistError;
use super::gateway::PersistenceGateway;
use super::pragma::apply_optimized_pragmas;
use crate::aggregation::AggregateBucket;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const INSERT_AGGREGATE: &str = "INSERT INTO timer_aggregates
     (entity_id, method_id, bucket_start, count, duration, min, max, average,
      cpu_duration, cpu_min, cpu_max, cpu_average,
      exclusive_count, exclusive_duration, exclusive_min, exclusive_max, exclusive_average,
      charting, persisted_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)";

/// SQLite integers are signed; refuse values that would wrap instead of storing them negative.
fn to_sql_int(value: u64, column: &str) -> Result<i64, PersistError> {
    i64::try_from(value)
        .map_err(|_| PersistError::Database(format!("{} {} exceeds SQLite INTEGER range", column, value)))
}

pub struct SqliteGateway {
    conn: Mutex<Connection>,
}

impl SqliteGateway {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, PersistError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PersistError::Io(std::io::Error::new(
                        e.kind(),
                        format!("Failed to create database directory {}: {}", parent.display(), e),
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;
        Self::create_schema(&conn)?;

        log::info!("✅ SQLite gateway initialized with WAL mode");

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn create_schema(conn: &Connection) -> Result<(), PersistError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS timer_aggregates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id INTEGER NOT NULL,
                method_id INTEGER NOT NULL,
                bucket_start INTEGER NOT NULL,
                count INTEGER NOT NULL CHECK (count > 0),
                duration REAL NOT NULL,
                min REAL,
                max REAL,
                average REAL,
                cpu_duration REAL NOT NULL,
                cpu_min REAL,
                cpu_max REAL,
                cpu_average REAL,
                exclusive_count INTEGER NOT NULL,
                exclusive_duration REAL NOT NULL,
                exclusive_min REAL,
                exclusive_max REAL,
                exclusive_average REAL,
                charting INTEGER NOT NULL,
                persisted_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_method_bucket ON timer_aggregates(method_id, bucket_start DESC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_entity_bucket ON timer_aggregates(entity_id, bucket_start DESC)",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn run_in_transaction(&self, batch: &[AggregateBucket]) -> Result<(), PersistError> {
        if batch.is_empty() {
            return Ok(());
        }

        let persisted_at = chrono::Utc::now().timestamp_millis();
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        // Dropping `tx` without commit rolls the batch back.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_AGGREGATE)?;
            for bucket in batch {
                let stats = &bucket.stats;
                stmt.execute(params![
                    to_sql_int(bucket.entity_id, "entity_id")?,
                    to_sql_int(bucket.method_id, "method_id")?,
                    bucket.bucket_start_ms,
                    to_sql_int(stats.count, "count")?,
                    stats.duration,
                    stats.min,
                    stats.max,
                    stats.average,
                    stats.cpu_duration,
                    stats.cpu_min,
                    stats.cpu_max,
                    stats.cpu_average,
                    to_sql_int(stats.exclusive_count, "exclusive_count")?,
                    stats.exclusive_duration,
                    stats.exclusive_min,
                    stats.exclusive_max,
                    stats.exclusive_average,
                    stats.charting,
                    persisted_at,
                ])?;
            }
        }
        tx.commit()?;

        log::debug!("✅ Persisted {} aggregates to SQLite", batch.len());
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
