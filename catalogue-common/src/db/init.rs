//! Database initialization
//!
//! Creates the SQLite schema shared by the catalogue services. All statements
//! are idempotent so initialization is safe on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets readers (state queries, matching) proceed while a sync writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema.
///
/// Uses a single connection that is never recycled, because every SQLite
/// in-memory connection is a separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and index (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_name_usage_table(pool).await?;
    create_sector_table(pool).await?;
    create_decision_table(pool).await?;
    create_sector_import_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Name usages of every dataset: source trees and the managed catalogue.
///
/// `sector_key`, `source_id`, `sync_attempt` and `synced_at` are only set on
/// catalogue nodes copied by a sector sync.
async fn create_name_usage_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS name_usage (
            dataset_key INTEGER NOT NULL,
            id TEXT NOT NULL,
            parent_id TEXT,
            ordinal INTEGER NOT NULL DEFAULT 0,
            scientific_name TEXT NOT NULL,
            authorship TEXT,
            rank TEXT NOT NULL,
            name_type TEXT NOT NULL DEFAULT 'SCIENTIFIC',
            status TEXT NOT NULL,
            extinct INTEGER,
            reference_citations TEXT NOT NULL DEFAULT '[]',
            vernacular_names TEXT NOT NULL DEFAULT '[]',
            distributions TEXT NOT NULL DEFAULT '[]',
            sector_key INTEGER,
            source_id TEXT,
            sync_attempt INTEGER,
            synced_at INTEGER,
            modified_by INTEGER,
            PRIMARY KEY (dataset_key, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_name_usage_parent ON name_usage (dataset_key, parent_id, ordinal)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_name_usage_sector ON name_usage (dataset_key, sector_key, synced_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_name_usage_name ON name_usage (dataset_key, scientific_name)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sector_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sector (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_key INTEGER NOT NULL,
            subject_id TEXT,
            subject_name TEXT NOT NULL,
            subject_authorship TEXT,
            subject_rank TEXT,
            target_id TEXT,
            target_name TEXT NOT NULL,
            target_authorship TEXT,
            target_rank TEXT,
            mode TEXT NOT NULL DEFAULT 'ATTACH',
            sync_attempt INTEGER,
            created_by INTEGER NOT NULL DEFAULT 0,
            modified INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sector_dataset ON sector (dataset_key)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_decision_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS decision (
            key INTEGER PRIMARY KEY AUTOINCREMENT,
            dataset_key INTEGER NOT NULL,
            subject_id TEXT,
            subject_name TEXT NOT NULL,
            subject_authorship TEXT,
            subject_rank TEXT,
            mode TEXT NOT NULL,
            status TEXT,
            rank TEXT,
            authorship TEXT,
            name_type TEXT,
            extinct INTEGER,
            created_by INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_decision_dataset ON decision (dataset_key)")
        .execute(pool)
        .await?;

    Ok(())
}

/// One row per sector job attempt
async fn create_sector_import_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sector_import (
            sector_key INTEGER NOT NULL,
            attempt INTEGER NOT NULL,
            dataset_key INTEGER NOT NULL,
            job TEXT NOT NULL,
            state TEXT NOT NULL,
            started INTEGER,
            finished INTEGER,
            created INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            ignored INTEGER NOT NULL DEFAULT 0,
            blocked INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_by INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (sector_key, attempt)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a setting only if it does not exist yet or holds NULL
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        Some(Some(_)) => Ok(()),
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            info!("Reset NULL setting '{}' to default value: {}", key, default_value);
            Ok(())
        }
        None => {
            // INSERT OR IGNORE tolerates a concurrent initializer winning the race
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
            Ok(())
        }
    }
}
