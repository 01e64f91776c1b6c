//! Name usage persistence

use async_trait::async_trait;
use catalogue_common::time::{from_micros, to_micros};
use catalogue_common::Result;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};
use std::collections::HashMap;

use super::{from_json, to_json, SqliteStore};
use crate::models::{Name, NameUsage};
use crate::store::{TreeStore, WriteBatch, WriteOp};
use crate::utils::retry_on_lock;

const USAGE_COLUMNS: &str = "dataset_key, id, parent_id, ordinal, scientific_name, authorship, \
     rank, name_type, status, extinct, reference_citations, vernacular_names, distributions, \
     sector_key, source_id, sync_attempt, synced_at, modified_by";

const INSERT_USAGE: &str = r#"
    INSERT INTO name_usage (
        dataset_key, id, parent_id, ordinal, scientific_name, authorship,
        rank, name_type, status, extinct, reference_citations, vernacular_names, distributions,
        sector_key, source_id, sync_attempt, synced_at, modified_by
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
"#;

const UPDATE_USAGE: &str = r#"
    UPDATE name_usage SET
        parent_id = ?3, ordinal = ?4, scientific_name = ?5, authorship = ?6,
        rank = ?7, name_type = ?8, status = ?9, extinct = ?10,
        reference_citations = ?11, vernacular_names = ?12, distributions = ?13,
        sector_key = ?14, source_id = ?15, sync_attempt = ?16, synced_at = ?17, modified_by = ?18
    WHERE dataset_key = ?1 AND id = ?2
"#;

/// Synonyms sort before accepted children
const CHILD_ORDER: &str = "CASE WHEN status IN ('SYNONYM', 'AMBIGUOUS_SYNONYM', 'MISAPPLIED') \
     THEN 0 ELSE 1 END, ordinal, id";

pub(crate) fn usage_from_row(row: &SqliteRow) -> Result<NameUsage> {
    let rank: String = row.try_get("rank")?;
    let name_type: String = row.try_get("name_type")?;
    let status: String = row.try_get("status")?;
    let references: String = row.try_get("reference_citations")?;
    let vernaculars: String = row.try_get("vernacular_names")?;
    let distributions: String = row.try_get("distributions")?;
    let synced_at: Option<i64> = row.try_get("synced_at")?;

    Ok(NameUsage {
        id: row.try_get("id")?,
        dataset_key: row.try_get("dataset_key")?,
        parent_id: row.try_get("parent_id")?,
        ordinal: row.try_get("ordinal")?,
        name: Name {
            scientific_name: row.try_get("scientific_name")?,
            authorship: row.try_get("authorship")?,
            rank: rank.parse()?,
            name_type: name_type.parse()?,
        },
        status: status.parse()?,
        extinct: row.try_get("extinct")?,
        reference_citations: from_json(&references, "reference_citations")?,
        vernacular_names: from_json(&vernaculars, "vernacular_names")?,
        distributions: from_json(&distributions, "distributions")?,
        sector_key: row.try_get("sector_key")?,
        source_id: row.try_get("source_id")?,
        sync_attempt: row.try_get("sync_attempt")?,
        synced_at: synced_at.and_then(from_micros),
        modified_by: row.try_get("modified_by")?,
    })
}

/// Bind every usage column in `USAGE_COLUMNS` order as `?1..?18`
fn bind_usage(sql: &'static str, u: &NameUsage) -> Result<Query<'static, Sqlite, SqliteArguments<'static>>> {
    Ok(sqlx::query(sql)
        .bind(u.dataset_key)
        .bind(u.id.clone())
        .bind(u.parent_id.clone())
        .bind(u.ordinal)
        .bind(u.name.scientific_name.clone())
        .bind(u.name.authorship.clone())
        .bind(u.name.rank.as_str())
        .bind(u.name.name_type.as_str())
        .bind(u.status.as_str())
        .bind(u.extinct)
        .bind(to_json(&u.reference_citations, "reference_citations")?)
        .bind(to_json(&u.vernacular_names, "vernacular_names")?)
        .bind(to_json(&u.distributions, "distributions")?)
        .bind(u.sector_key)
        .bind(u.source_id.clone())
        .bind(u.sync_attempt)
        .bind(u.synced_at.map(to_micros))
        .bind(u.modified_by))
}

impl SqliteStore {
    /// Insert usages outside of any sync, e.g. to load a source dataset
    pub async fn insert_usages(&self, usages: &[NameUsage]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for usage in usages {
            bind_usage(INSERT_USAGE, usage)?.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// All usages of a dataset, ordered by id
    pub async fn list_usages(&self, dataset_key: i32) -> Result<Vec<NameUsage>> {
        let sql = format!("SELECT {} FROM name_usage WHERE dataset_key = ? ORDER BY id", USAGE_COLUMNS);
        let rows = sqlx::query(&sql).bind(dataset_key).fetch_all(&self.pool).await?;
        rows.iter().map(usage_from_row).collect()
    }

    async fn write_ops(&self, ops: &[WriteOp]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                WriteOp::Create(usage) => {
                    bind_usage(INSERT_USAGE, usage)?.execute(&mut *tx).await?;
                }
                WriteOp::Update(usage) => {
                    bind_usage(UPDATE_USAGE, usage)?.execute(&mut *tx).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TreeStore for SqliteStore {
    async fn get_usage(&self, dataset_key: i32, id: &str) -> Result<Option<NameUsage>> {
        let sql = format!("SELECT {} FROM name_usage WHERE dataset_key = ? AND id = ?", USAGE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(dataset_key)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(usage_from_row).transpose()
    }

    async fn children(&self, dataset_key: i32, parent_id: &str) -> Result<Vec<NameUsage>> {
        let sql = format!(
            "SELECT {} FROM name_usage WHERE dataset_key = ? AND parent_id = ? ORDER BY {}",
            USAGE_COLUMNS, CHILD_ORDER
        );
        let rows = sqlx::query(&sql)
            .bind(dataset_key)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(usage_from_row).collect()
    }

    async fn has_data(&self, dataset_key: i32) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM name_usage WHERE dataset_key = ?)")
                .bind(dataset_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn copies(&self, catalogue_key: i32, sector_key: i32) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT source_id, id FROM name_usage WHERE dataset_key = ? AND sector_key = ? AND source_id IS NOT NULL",
        )
        .bind(catalogue_key)
        .bind(sector_key)
        .fetch_all(&self.pool)
        .await?;

        let mut copies = HashMap::with_capacity(rows.len());
        for row in rows {
            copies.insert(row.try_get("source_id")?, row.try_get("id")?);
        }
        Ok(copies)
    }

    async fn foreign_children(&self, catalogue_key: i32, sector_key: i32) -> Result<Vec<NameUsage>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM name_usage c
            JOIN name_usage p ON p.dataset_key = c.dataset_key AND p.id = c.parent_id
            WHERE c.dataset_key = ?1
              AND p.sector_key = ?2
              AND (c.sector_key IS NULL OR c.sector_key != ?2)
            ORDER BY c.id
            "#,
        )
        .bind(catalogue_key)
        .bind(sector_key)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(usage_from_row).collect()
    }

    async fn list_attributed_to(
        &self,
        catalogue_key: i32,
        sector_key: i32,
        attempt: i32,
    ) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM name_usage
            WHERE dataset_key = ? AND sector_key = ? AND (sync_attempt IS NULL OR sync_attempt < ?)
            ORDER BY id
            "#,
        )
        .bind(catalogue_key)
        .bind(sector_key)
        .bind(attempt)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn commit_batch(&self, _catalogue_key: i32, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.into_ops();
        let ops = &ops;
        retry_on_lock("commit_batch", self.max_lock_wait_ms, || self.write_ops(ops)).await
    }

    async fn delete_usage(&self, catalogue_key: i32, id: &str) -> Result<u64> {
        let sector_key: Option<Option<i32>> =
            sqlx::query_scalar("SELECT sector_key FROM name_usage WHERE dataset_key = ? AND id = ?")
                .bind(catalogue_key)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        // Already removed by an earlier cascade
        let Some(sector_key) = sector_key else {
            return Ok(0);
        };

        let result = sqlx::query(
            r#"
            WITH RECURSIVE doomed(id) AS (
                SELECT id FROM name_usage WHERE dataset_key = ?1 AND id = ?2
                UNION
                SELECT u.id FROM name_usage u
                JOIN doomed d ON u.parent_id = d.id
                WHERE u.dataset_key = ?1
                  AND (u.sector_key IS ?3 OR u.status IN ('SYNONYM', 'AMBIGUOUS_SYNONYM', 'MISAPPLIED'))
            )
            DELETE FROM name_usage WHERE dataset_key = ?1 AND id IN (SELECT id FROM doomed)
            "#,
        )
        .bind(catalogue_key)
        .bind(id)
        .bind(sector_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_by_sector(&self, catalogue_key: i32, sector_key: i32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM name_usage WHERE dataset_key = ? AND sector_key = ?")
            .bind(catalogue_key)
            .bind(sector_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_parent(&self, catalogue_key: i32, id: &str, parent_id: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE name_usage SET parent_id = ? WHERE dataset_key = ? AND id = ?")
            .bind(parent_id)
            .bind(catalogue_key)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
