//! Cache configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Storage backend behind the persistence gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Sqlite,
    Jsonl,
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(BackendType::Sqlite),
            "jsonl" => Ok(BackendType::Jsonl),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Configuration for the aggregation cache and its drainer
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Width of each time bucket in milliseconds
    pub aggregation_period_ms: u64,

    /// Hard cap on resident buckets before eviction triggers
    pub max_elements: usize,

    /// Drainer wake interval in milliseconds
    pub cache_clean_sleeping_period_ms: u64,

    /// Path to the storage file (SQLite database or JSONL file)
    pub db_path: String,

    /// Persistence backend
    pub backend: BackendType,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            aggregation_period_ms: 5_000,
            max_elements: 100_000,
            cache_clean_sleeping_period_ms: 30_000,
            db_path: "timerflow.db".to_string(),
            backend: BackendType::Sqlite,
        }
    }
}

impl CacheConfig {
    /// Build a configuration programmatically; zero values are replaced by defaults.
    pub fn new(aggregation_period_ms: u64, max_elements: usize, cache_clean_sleeping_period_ms: u64) -> Self {
        let defaults = Self::default();
        Self {
            aggregation_period_ms: positive_or(aggregation_period_ms, defaults.aggregation_period_ms),
            max_elements: positive_or(max_elements, defaults.max_elements),
            cache_clean_sleeping_period_ms: positive_or(
                cache_clean_sleeping_period_ms,
                defaults.cache_clean_sleeping_period_ms,
            ),
            ..defaults
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `TIMERFLOW_AGGREGATION_PERIOD_MS` (default: 5000)
    /// - `TIMERFLOW_MAX_ELEMENTS` (default: 100000)
    /// - `TIMERFLOW_CACHE_CLEAN_SLEEPING_PERIOD_MS` (default: 30000)
    /// - `TIMERFLOW_DB_PATH` (default: timerflow.db)
    /// - `TIMERFLOW_BACKEND` (default: sqlite)
    ///
    /// Unparsable or non-positive values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            aggregation_period_ms: positive_var("TIMERFLOW_AGGREGATION_PERIOD_MS")
                .unwrap_or(defaults.aggregation_period_ms),

            max_elements: positive_var("TIMERFLOW_MAX_ELEMENTS").unwrap_or(defaults.max_elements),

            cache_clean_sleeping_period_ms: positive_var("TIMERFLOW_CACHE_CLEAN_SLEEPING_PERIOD_MS")
                .unwrap_or(defaults.cache_clean_sleeping_period_ms),

            db_path: env::var("TIMERFLOW_DB_PATH").unwrap_or(defaults.db_path),

            backend: env::var("TIMERFLOW_BACKEND")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(backend) => Some(backend),
                    Err(e) => {
                        log::warn!("Ignoring TIMERFLOW_BACKEND: {}", e);
                        None
                    }
                })
                .unwrap_or(defaults.backend),
        }
    }

    pub fn aggregation_period(&self) -> Duration {
        Duration::from_millis(self.aggregation_period_ms)
    }

    pub fn cache_clean_sleeping_period(&self) -> Duration {
        Duration::from_millis(self.cache_clean_sleeping_period_ms)
    }
}

fn positive_var<T>(name: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let value: T = env::var(name).ok()?.trim().parse().ok()?;
    if value > T::default() {
        Some(value)
    } else {
        log::warn!("Ignoring non-positive {}", name);
        None
    }
}

fn positive_or<T: PartialOrd + Default>(value: T, fallback: T) -> T {
    if value > T::default() {
        value
    } else {
        fallback
    }
}
