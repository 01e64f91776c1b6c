//! SQLite implementations of the assembly stores

pub mod decisions;
pub mod imports;
pub mod matcher;
pub mod sectors;
pub mod usages;

use catalogue_common::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;

pub use matcher::SqliteMatcher;

/// Tree, sector, decision and import store on a single pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json<T: Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", field, e)))
}

fn from_json<T: DeserializeOwned>(text: &str, field: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", field, e)))
}

/// Parse an optional upper-case code column
fn parse_opt<T>(value: Option<String>) -> Result<Option<T>>
where
    T: std::str::FromStr<Err = Error>,
{
    value.map(|v| v.parse()).transpose()
}
