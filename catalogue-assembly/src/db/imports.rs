//! Sector import record persistence

use async_trait::async_trait;
use catalogue_common::time::{from_micros, now, to_micros};
use catalogue_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::SqliteStore;
use crate::models::SectorImport;
use crate::store::ImportStore;
use crate::utils::retry_on_lock;

const IMPORT_COLUMNS: &str = "sector_key, attempt, dataset_key, job, state, started, finished, \
     created, updated, deleted, ignored, blocked, error, created_by";

fn import_from_row(row: &SqliteRow) -> Result<SectorImport> {
    let job: String = row.try_get("job")?;
    let state: String = row.try_get("state")?;
    let started: Option<i64> = row.try_get("started")?;
    let finished: Option<i64> = row.try_get("finished")?;

    Ok(SectorImport {
        sector_key: row.try_get("sector_key")?,
        attempt: row.try_get("attempt")?,
        dataset_key: row.try_get("dataset_key")?,
        job: job.parse()?,
        state: state.parse()?,
        started: started.and_then(from_micros),
        finished: finished.and_then(from_micros),
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
        deleted: row.try_get("deleted")?,
        ignored: row.try_get("ignored")?,
        blocked: row.try_get("blocked")?,
        error: row.try_get("error")?,
        created_by: row.try_get("created_by")?,
    })
}

#[async_trait]
impl ImportStore for SqliteStore {
    async fn next_attempt(&self, sector_key: i32) -> Result<i32> {
        let max: Option<i32> = sqlx::query_scalar("SELECT MAX(attempt) FROM sector_import WHERE sector_key = ?")
            .bind(sector_key)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) + 1)
    }

    async fn save_import(&self, import: &SectorImport) -> Result<()> {
        let job = import.job.as_str();
        let state = import.state.as_str();
        let started = import.started.map(to_micros);
        let finished = import.finished.map(to_micros);

        retry_on_lock("save_import", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO sector_import (
                    sector_key, attempt, dataset_key, job, state, started, finished,
                    created, updated, deleted, ignored, blocked, error, created_by
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(sector_key, attempt) DO UPDATE SET
                    state = excluded.state,
                    started = excluded.started,
                    finished = excluded.finished,
                    created = excluded.created,
                    updated = excluded.updated,
                    deleted = excluded.deleted,
                    ignored = excluded.ignored,
                    blocked = excluded.blocked,
                    error = excluded.error
                "#,
            )
            .bind(import.sector_key)
            .bind(import.attempt)
            .bind(import.dataset_key)
            .bind(job)
            .bind(state)
            .bind(started)
            .bind(finished)
            .bind(import.created)
            .bind(import.updated)
            .bind(import.deleted)
            .bind(import.ignored)
            .bind(import.blocked)
            .bind(&import.error)
            .bind(import.created_by)
            .execute(&self.pool)
            .await?;
            Ok::<(), catalogue_common::Error>(())
        })
        .await
    }

    async fn list_imports(&self, sector_key: i32, limit: u32) -> Result<Vec<SectorImport>> {
        let sql = format!(
            "SELECT {} FROM sector_import WHERE sector_key = ? ORDER BY attempt DESC LIMIT ?",
            IMPORT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(sector_key)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(import_from_row).collect()
    }

    async fn latest_import(&self, sector_key: i32) -> Result<Option<SectorImport>> {
        Ok(self.list_imports(sector_key, 1).await?.into_iter().next())
    }

    async fn cancel_unfinished(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sector_import
            SET state = 'CANCELED', finished = ?, error = COALESCE(error, 'canceled')
            WHERE state NOT IN ('FINISHED', 'CANCELED', 'FAILED')
            "#,
        )
        .bind(to_micros(now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
