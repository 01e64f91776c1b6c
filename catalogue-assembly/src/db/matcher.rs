//! Fingerprint matching against stored name usages
//!
//! Names match case-insensitively. A rank on the fingerprint must match
//! exactly. Authorship is compared after dropping case, spacing and
//! punctuation; a candidate without authorship is accepted unless another
//! candidate matches the authorship exactly.

use async_trait::async_trait;
use catalogue_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{Rank, SimpleName};
use crate::store::Matcher;

pub struct SqliteMatcher {
    pool: SqlitePool,
}

impl SqliteMatcher {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn candidates(&self, name: &SimpleName, dataset_key: i32, sector_key: Option<i32>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT id, authorship, rank FROM name_usage
            WHERE dataset_key = ?1
              AND lower(scientific_name) = lower(?2)
              AND (?3 IS NULL OR sector_key = ?3)
            ORDER BY id
            "#,
        )
        .bind(dataset_key)
        .bind(name.name.trim())
        .bind(sector_key)
        .fetch_all(&self.pool)
        .await?;

        let wanted_authorship = name.authorship.as_deref().map(normalize_authorship).filter(|a| !a.is_empty());

        let mut exact = Vec::new();
        let mut lenient = Vec::new();
        for row in rows {
            let id: String = row.try_get("id")?;
            let rank: String = row.try_get("rank")?;
            let authorship: Option<String> = row.try_get("authorship")?;

            if let Some(wanted) = name.rank {
                if rank.parse::<Rank>().ok() != Some(wanted) {
                    continue;
                }
            }

            match (&wanted_authorship, authorship.as_deref().map(normalize_authorship)) {
                (None, _) => exact.push(id),
                (Some(wanted), Some(found)) if found == *wanted => exact.push(id),
                (Some(_), Some(found)) if found.is_empty() => lenient.push(id),
                (Some(_), None) => lenient.push(id),
                (Some(_), Some(_)) => {}
            }
        }

        Ok(if exact.is_empty() { lenient } else { exact })
    }
}

fn normalize_authorship(authorship: &str) -> String {
    authorship
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[async_trait]
impl Matcher for SqliteMatcher {
    async fn find(&self, name: &SimpleName, dataset_key: i32) -> Result<Vec<String>> {
        self.candidates(name, dataset_key, None).await
    }

    async fn find_in_sector(&self, name: &SimpleName, dataset_key: i32, sector_key: i32) -> Result<Vec<String>> {
        self.candidates(name, dataset_key, Some(sector_key)).await
    }
}
