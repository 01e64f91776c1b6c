//! Editorial decision persistence

use async_trait::async_trait;
use catalogue_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{parse_opt, SqliteStore};
use crate::models::{EditorialDecision, SimpleName};
use crate::store::DecisionStore;

const DECISION_COLUMNS: &str = "key, dataset_key, subject_id, subject_name, subject_authorship, subject_rank, \
     mode, status, rank, authorship, name_type, extinct, created_by";

fn decision_from_row(row: &SqliteRow) -> Result<EditorialDecision> {
    let mode: String = row.try_get("mode")?;
    Ok(EditorialDecision {
        key: row.try_get("key")?,
        dataset_key: row.try_get("dataset_key")?,
        subject: SimpleName {
            id: row.try_get("subject_id")?,
            name: row.try_get("subject_name")?,
            authorship: row.try_get("subject_authorship")?,
            rank: parse_opt(row.try_get("subject_rank")?)?,
        },
        mode: mode.parse()?,
        status: parse_opt(row.try_get("status")?)?,
        rank: parse_opt(row.try_get("rank")?)?,
        authorship: row.try_get("authorship")?,
        name_type: parse_opt(row.try_get("name_type")?)?,
        extinct: row.try_get("extinct")?,
        created_by: row.try_get("created_by")?,
    })
}

#[async_trait]
impl DecisionStore for SqliteStore {
    async fn get_decision(&self, key: i32) -> Result<Option<EditorialDecision>> {
        let sql = format!("SELECT {} FROM decision WHERE key = ?", DECISION_COLUMNS);
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        row.as_ref().map(decision_from_row).transpose()
    }

    async fn list_decisions(&self, dataset_key: Option<i32>) -> Result<Vec<EditorialDecision>> {
        let sql = format!(
            "SELECT {} FROM decision WHERE (?1 IS NULL OR dataset_key = ?1) ORDER BY key",
            DECISION_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(dataset_key).fetch_all(&self.pool).await?;
        rows.iter().map(decision_from_row).collect()
    }

    async fn create_decision(&self, decision: &EditorialDecision) -> Result<i32> {
        let result = sqlx::query(
            r#"
            INSERT INTO decision (
                dataset_key, subject_id, subject_name, subject_authorship, subject_rank,
                mode, status, rank, authorship, name_type, extinct, created_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(decision.dataset_key)
        .bind(&decision.subject.id)
        .bind(&decision.subject.name)
        .bind(&decision.subject.authorship)
        .bind(decision.subject.rank.map(|r| r.as_str()))
        .bind(decision.mode.as_str())
        .bind(decision.status.map(|s| s.as_str()))
        .bind(decision.rank.map(|r| r.as_str()))
        .bind(&decision.authorship)
        .bind(decision.name_type.map(|t| t.as_str()))
        .bind(decision.extinct)
        .bind(decision.created_by)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid() as i32)
    }

    async fn update_decision(&self, decision: &EditorialDecision) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE decision SET
                dataset_key = ?, subject_id = ?, subject_name = ?, subject_authorship = ?, subject_rank = ?,
                mode = ?, status = ?, rank = ?, authorship = ?, name_type = ?, extinct = ?
            WHERE key = ?
            "#,
        )
        .bind(decision.dataset_key)
        .bind(&decision.subject.id)
        .bind(&decision.subject.name)
        .bind(&decision.subject.authorship)
        .bind(decision.subject.rank.map(|r| r.as_str()))
        .bind(decision.mode.as_str())
        .bind(decision.status.map(|s| s.as_str()))
        .bind(decision.rank.map(|r| r.as_str()))
        .bind(&decision.authorship)
        .bind(decision.name_type.map(|t| t.as_str()))
        .bind(decision.extinct)
        .bind(decision.key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_decision(&self, key: i32) -> Result<()> {
        sqlx::query("DELETE FROM decision WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
