//! Storage and collaborator seams used by sector jobs
//!
//! The assembly engine reads source trees and writes the catalogue only
//! through these traits. [`crate::db::SqliteStore`] implements the store
//! traits on one SQLite pool; tests substitute the index and metrics sinks.

use async_trait::async_trait;
use catalogue_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{SqliteMatcher, SqliteStore};
use crate::models::{EditorialDecision, ImportState, JobKind, NameUsage, Sector, SectorImport, SimpleName};

/// Read access to name usage trees and write access to the catalogue
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn get_usage(&self, dataset_key: i32, id: &str) -> Result<Option<NameUsage>>;

    /// Direct children of a usage, synonyms first, then by ordinal
    async fn children(&self, dataset_key: i32, parent_id: &str) -> Result<Vec<NameUsage>>;

    /// Whether the dataset holds any usage
    async fn has_data(&self, dataset_key: i32) -> Result<bool>;

    /// Copies attributed to a sector, keyed by source id, valued by copy id
    async fn copies(&self, catalogue_key: i32, sector_key: i32) -> Result<HashMap<String, String>>;

    /// Catalogue usages outside the sector whose parent is attributed to it
    async fn foreign_children(&self, catalogue_key: i32, sector_key: i32) -> Result<Vec<NameUsage>>;

    /// Ids of the sector's copies stamped by an attempt before `attempt`
    async fn list_attributed_to(&self, catalogue_key: i32, sector_key: i32, attempt: i32) -> Result<Vec<String>>;

    /// Apply all operations of a batch in one transaction
    async fn commit_batch(&self, catalogue_key: i32, batch: WriteBatch) -> Result<()>;

    /// Delete a usage together with its synonyms and the same-sector
    /// descendants below it. Returns the number of rows removed.
    async fn delete_usage(&self, catalogue_key: i32, id: &str) -> Result<u64>;

    /// Delete every usage attributed to a sector
    async fn delete_by_sector(&self, catalogue_key: i32, sector_key: i32) -> Result<u64>;

    async fn set_parent(&self, catalogue_key: i32, id: &str, parent_id: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait SectorStore: Send + Sync {
    async fn get_sector(&self, key: i32) -> Result<Option<Sector>>;

    /// Sectors of one source dataset, or all sectors
    async fn list_sectors(&self, dataset_key: Option<i32>) -> Result<Vec<Sector>>;

    /// Other sectors whose target node is attributed to `sector_key`
    async fn child_sectors(&self, catalogue_key: i32, sector_key: i32) -> Result<Vec<Sector>>;

    async fn create_sector(&self, sector: &Sector) -> Result<i32>;

    async fn update_sector(&self, sector: &Sector) -> Result<()>;

    async fn delete_sector(&self, key: i32) -> Result<()>;
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn get_decision(&self, key: i32) -> Result<Option<EditorialDecision>>;

    async fn list_decisions(&self, dataset_key: Option<i32>) -> Result<Vec<EditorialDecision>>;

    async fn create_decision(&self, decision: &EditorialDecision) -> Result<i32>;

    async fn update_decision(&self, decision: &EditorialDecision) -> Result<()>;

    async fn delete_decision(&self, key: i32) -> Result<()>;
}

#[async_trait]
pub trait ImportStore: Send + Sync {
    /// One above the highest attempt recorded for the sector
    async fn next_attempt(&self, sector_key: i32) -> Result<i32>;

    /// Insert or replace the record for `(sector_key, attempt)`
    async fn save_import(&self, import: &SectorImport) -> Result<()>;

    /// Most recent attempts first
    async fn list_imports(&self, sector_key: i32, limit: u32) -> Result<Vec<SectorImport>>;

    async fn latest_import(&self, sector_key: i32) -> Result<Option<SectorImport>>;

    /// Mark records left in a non-terminal state as CANCELED
    async fn cancel_unfinished(&self) -> Result<u64>;
}

/// Name matching against a dataset's tree
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Ids of all usages in the dataset matching the fingerprint
    async fn find(&self, name: &SimpleName, dataset_key: i32) -> Result<Vec<String>>;

    /// As [`Matcher::find`], restricted to copies attributed to one sector
    async fn find_in_sector(&self, name: &SimpleName, dataset_key: i32, sector_key: i32) -> Result<Vec<String>>;
}

/// External search index over the catalogue
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Re-index the subtree below `root_id`, or only drop the sector's
    /// documents when no root remains
    async fn refresh(&self, sector_key: i32, root_id: Option<&str>) -> Result<()>;
}

/// Receives job timings
pub trait MetricsSink: Send + Sync {
    fn job_queued(&self, _kind: JobKind) {}

    fn job_finished(&self, _kind: JobKind, _state: ImportState, _queued: Duration, _run: Duration) {}
}

pub struct NoopSearchIndex;

#[async_trait]
impl SearchIndex for NoopSearchIndex {
    async fn refresh(&self, _sector_key: i32, _root_id: Option<&str>) -> Result<()> {
        Ok(())
    }
}

pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// One pending catalogue write
#[derive(Debug, Clone)]
pub enum WriteOp {
    Create(NameUsage),
    Update(NameUsage),
}

/// Catalogue writes committed together
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, usage: NameUsage) {
        self.ops.push(WriteOp::Create(usage));
    }

    pub fn update(&mut self, usage: NameUsage) {
        self.ops.push(WriteOp::Update(usage));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Everything a sector job talks to
#[derive(Clone)]
pub struct Backend {
    pub tree: Arc<dyn TreeStore>,
    pub sectors: Arc<dyn SectorStore>,
    pub decisions: Arc<dyn DecisionStore>,
    pub imports: Arc<dyn ImportStore>,
    pub matcher: Arc<dyn Matcher>,
    pub index: Arc<dyn SearchIndex>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Backend {
    /// All stores on one SQLite pool, with no search index and no metrics
    pub fn sqlite(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone(), max_lock_wait_ms));
        Self {
            tree: store.clone(),
            sectors: store.clone(),
            decisions: store.clone(),
            imports: store,
            matcher: Arc::new(SqliteMatcher::new(pool)),
            index: Arc::new(NoopSearchIndex),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}
