//! Sector persistence

use async_trait::async_trait;
use catalogue_common::time::{now, to_micros};
use catalogue_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{parse_opt, SqliteStore};
use crate::models::{Sector, SimpleName};
use crate::store::SectorStore;

const SECTOR_COLUMNS: &str = "key, dataset_key, subject_id, subject_name, subject_authorship, subject_rank, \
     target_id, target_name, target_authorship, target_rank, mode, sync_attempt, created_by";

fn sector_from_row(row: &SqliteRow) -> Result<Sector> {
    let mode: String = row.try_get("mode")?;
    Ok(Sector {
        key: row.try_get("key")?,
        dataset_key: row.try_get("dataset_key")?,
        subject: SimpleName {
            id: row.try_get("subject_id")?,
            name: row.try_get("subject_name")?,
            authorship: row.try_get("subject_authorship")?,
            rank: parse_opt(row.try_get("subject_rank")?)?,
        },
        target: SimpleName {
            id: row.try_get("target_id")?,
            name: row.try_get("target_name")?,
            authorship: row.try_get("target_authorship")?,
            rank: parse_opt(row.try_get("target_rank")?)?,
        },
        mode: mode.parse()?,
        sync_attempt: row.try_get("sync_attempt")?,
        created_by: row.try_get("created_by")?,
    })
}

#[async_trait]
impl SectorStore for SqliteStore {
    async fn get_sector(&self, key: i32) -> Result<Option<Sector>> {
        let sql = format!("SELECT {} FROM sector WHERE key = ?", SECTOR_COLUMNS);
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(sector_from_row).transpose()
    }

    async fn list_sectors(&self, dataset_key: Option<i32>) -> Result<Vec<Sector>> {
        let sql = format!(
            "SELECT {} FROM sector WHERE (?1 IS NULL OR dataset_key = ?1) ORDER BY key",
            SECTOR_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(dataset_key).fetch_all(&self.pool).await?;
        rows.iter().map(sector_from_row).collect()
    }

    async fn child_sectors(&self, catalogue_key: i32, sector_key: i32) -> Result<Vec<Sector>> {
        let rows = sqlx::query(
            r#"
            SELECT s.* FROM sector s
            JOIN name_usage u ON u.id = s.target_id
            WHERE u.dataset_key = ?1 AND u.sector_key = ?2 AND s.key != ?2
            ORDER BY s.key
            "#,
        )
        .bind(catalogue_key)
        .bind(sector_key)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sector_from_row).collect()
    }

    async fn create_sector(&self, sector: &Sector) -> Result<i32> {
        let result = sqlx::query(
            r#"
            INSERT INTO sector (
                dataset_key, subject_id, subject_name, subject_authorship, subject_rank,
                target_id, target_name, target_authorship, target_rank,
                mode, sync_attempt, created_by, modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sector.dataset_key)
        .bind(&sector.subject.id)
        .bind(&sector.subject.name)
        .bind(&sector.subject.authorship)
        .bind(sector.subject.rank.map(|r| r.as_str()))
        .bind(&sector.target.id)
        .bind(&sector.target.name)
        .bind(&sector.target.authorship)
        .bind(sector.target.rank.map(|r| r.as_str()))
        .bind(sector.mode.as_str())
        .bind(sector.sync_attempt)
        .bind(sector.created_by)
        .bind(to_micros(now()))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid() as i32)
    }

    async fn update_sector(&self, sector: &Sector) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sector SET
                dataset_key = ?, subject_id = ?, subject_name = ?, subject_authorship = ?, subject_rank = ?,
                target_id = ?, target_name = ?, target_authorship = ?, target_rank = ?,
                mode = ?, sync_attempt = ?, modified = ?
            WHERE key = ?
            "#,
        )
        .bind(sector.dataset_key)
        .bind(&sector.subject.id)
        .bind(&sector.subject.name)
        .bind(&sector.subject.authorship)
        .bind(sector.subject.rank.map(|r| r.as_str()))
        .bind(&sector.target.id)
        .bind(&sector.target.name)
        .bind(&sector.target.authorship)
        .bind(sector.target.rank.map(|r| r.as_str()))
        .bind(sector.mode.as_str())
        .bind(sector.sync_attempt)
        .bind(to_micros(now()))
        .bind(sector.key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_sector(&self, key: i32) -> Result<()> {
        sqlx::query("DELETE FROM sector WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
