//! Shared fixtures for catalogue-assembly integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use catalogue_assembly::config::{AssemblySettings, CopyPolicy};
use catalogue_assembly::db::SqliteStore;
use catalogue_assembly::models::{
    ImportState, JobKind, Name, NameUsage, Rank, Sector, SectorImport, SectorMode, SimpleName, User,
};
use catalogue_assembly::store::{Backend, ImportStore, MetricsSink, SearchIndex, SectorStore, TreeStore, WriteBatch};
use catalogue_assembly::AssemblyCoordinator;
use catalogue_common::db::init_memory_database;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub const SOURCE: i32 = 100;
pub const OTHER_SOURCE: i32 = 101;
pub const CATALOGUE: i32 = 3;

/// Catalogue node receiving the Felis sector
pub const TARGET_ID: &str = "t-felidae";

pub struct TestEnv {
    pub pool: SqlitePool,
    pub store: SqliteStore,
    pub backend: Backend,
}

pub async fn setup() -> TestEnv {
    let pool = init_memory_database().await.unwrap();
    let store = SqliteStore::new(pool.clone(), 1000);
    let backend = Backend::sqlite(pool.clone(), 1000);
    TestEnv { pool, store, backend }
}

pub fn settings() -> AssemblySettings {
    AssemblySettings {
        catalogue_key: CATALOGUE,
        batch_size: 2,
        worker_count: 1,
        shutdown_grace: Duration::from_secs(5),
        copy_policy: CopyPolicy::all(),
        max_lock_wait_ms: 1000,
    }
}

pub fn user() -> User {
    User::new(7, "editor")
}

pub fn usage(dataset_key: i32, id: &str, name: &str, rank: Rank, parent: Option<&str>) -> NameUsage {
    let usage = NameUsage::new(dataset_key, id, Name::new(name, rank));
    match parent {
        Some(parent) => usage.with_parent(parent),
        None => usage,
    }
}

/// Catalogue skeleton: Animalia > Felidae
pub async fn load_catalogue(env: &TestEnv) {
    env.store
        .insert_usages(&[
            usage(CATALOGUE, "root", "Animalia", Rank::Kingdom, None),
            usage(CATALOGUE, TARGET_ID, "Felidae", Rank::Family, Some("root")),
        ])
        .await
        .unwrap();
}

/// Source tree: Felidae > Felis > {catus, silvestris}
pub async fn load_felis(env: &TestEnv) {
    env.store
        .insert_usages(&[
            usage(SOURCE, "fam", "Felidae", Rank::Family, None),
            usage(SOURCE, "g", "Felis", Rank::Genus, Some("fam")),
            usage(SOURCE, "catus", "Felis catus", Rank::Species, Some("g")).with_ordinal(1),
            usage(SOURCE, "silv", "Felis silvestris", Rank::Species, Some("g")).with_ordinal(2),
        ])
        .await
        .unwrap();
}

pub fn felis() -> SimpleName {
    SimpleName::new("Felis", None, Some(Rank::Genus)).with_id("g")
}

pub fn felidae_target() -> SimpleName {
    SimpleName::new("Felidae", None, Some(Rank::Family)).with_id(TARGET_ID)
}

pub async fn create_sector(env: &TestEnv, subject: SimpleName, target: SimpleName, mode: SectorMode) -> Sector {
    let mut sector = Sector::new(SOURCE, subject, target).with_mode(mode);
    sector.key = env.backend.sectors.create_sector(&sector).await.unwrap();
    sector
}

/// Catalogue env with the Felis source and one sector on it
pub async fn felis_env(mode: SectorMode) -> (TestEnv, Sector) {
    let env = setup().await;
    load_catalogue(&env).await;
    load_felis(&env).await;
    let sector = create_sector(&env, felis(), felidae_target(), mode).await;
    (env, sector)
}

/// Wait until no job is in flight
pub async fn wait_idle(coordinator: &AssemblyCoordinator) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !coordinator.get_state().is_idle() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("coordinator did not become idle");
}

/// Queue a sync, wait for it and return its import record
pub async fn sync_and_wait(coordinator: &AssemblyCoordinator, env: &TestEnv, sector_key: i32) -> SectorImport {
    assert!(coordinator.sync_sector(sector_key, &user()).await.unwrap());
    wait_idle(coordinator).await;
    env.backend.imports.latest_import(sector_key).await.unwrap().unwrap()
}

/// Catalogue copies of one sector, sorted by source id
pub async fn copies_of(env: &TestEnv, sector_key: i32) -> Vec<NameUsage> {
    let mut copies: Vec<NameUsage> = env
        .store
        .list_usages(CATALOGUE)
        .await
        .unwrap()
        .into_iter()
        .filter(|u| u.sector_key == Some(sector_key))
        .collect();
    copies.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    copies
}

pub fn copy_of<'a>(copies: &'a [NameUsage], source_id: &str) -> Option<&'a NameUsage> {
    copies.iter().find(|u| u.source_id.as_deref() == Some(source_id))
}

/// Blocks callers until permits are released
pub struct Gate {
    entered: Notify,
    permits: Semaphore,
}

impl Gate {
    pub fn closed() -> Self {
        Self {
            entered: Notify::new(),
            permits: Semaphore::new(0),
        }
    }

    /// Wait for a permit, signalling that a caller arrived
    pub async fn pass(&self) -> catalogue_common::Result<()> {
        self.entered.notify_one();
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| catalogue_common::Error::Internal(e.to_string()))?;
        permit.forget();
        Ok(())
    }

    /// Wait until a caller is blocked on the gate
    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.entered.notified())
            .await
            .expect("nobody reached the gate");
    }

    pub fn release_one(&self) {
        self.permits.add_permits(1);
    }

    pub fn release_all(&self) {
        self.permits.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

/// Search index that blocks every refresh until released
pub struct GatedIndex {
    gate: Gate,
    pub refreshed: Mutex<Vec<(i32, Option<String>)>>,
}

impl GatedIndex {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Gate::closed(),
            refreshed: Mutex::new(Vec::new()),
        })
    }

    pub fn open() -> Arc<Self> {
        let index = Self::closed();
        index.release_all();
        index
    }

    pub async fn wait_entered(&self) {
        self.gate.wait_entered().await
    }

    pub fn release_one(&self) {
        self.gate.release_one();
    }

    pub fn release_all(&self) {
        self.gate.release_all();
    }
}

#[async_trait]
impl SearchIndex for GatedIndex {
    async fn refresh(&self, sector_key: i32, root_id: Option<&str>) -> catalogue_common::Result<()> {
        self.refreshed
            .lock()
            .unwrap()
            .push((sector_key, root_id.map(str::to_string)));
        self.gate.pass().await
    }
}

/// Tree store holding `children` lookups of one parent at a gate
pub struct GatedTree {
    inner: Arc<dyn TreeStore>,
    parent_id: String,
    pub gate: Gate,
}

impl GatedTree {
    pub fn wrap(backend: &Backend, parent_id: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: backend.tree.clone(),
            parent_id: parent_id.to_string(),
            gate: Gate::closed(),
        })
    }
}

#[async_trait]
impl TreeStore for GatedTree {
    async fn get_usage(&self, dataset_key: i32, id: &str) -> catalogue_common::Result<Option<NameUsage>> {
        self.inner.get_usage(dataset_key, id).await
    }

    async fn children(&self, dataset_key: i32, parent_id: &str) -> catalogue_common::Result<Vec<NameUsage>> {
        if parent_id == self.parent_id {
            self.gate.pass().await?;
        }
        self.inner.children(dataset_key, parent_id).await
    }

    async fn has_data(&self, dataset_key: i32) -> catalogue_common::Result<bool> {
        self.inner.has_data(dataset_key).await
    }

    async fn copies(&self, catalogue_key: i32, sector_key: i32) -> catalogue_common::Result<HashMap<String, String>> {
        self.inner.copies(catalogue_key, sector_key).await
    }

    async fn foreign_children(&self, catalogue_key: i32, sector_key: i32) -> catalogue_common::Result<Vec<NameUsage>> {
        self.inner.foreign_children(catalogue_key, sector_key).await
    }

    async fn list_attributed_to(
        &self,
        catalogue_key: i32,
        sector_key: i32,
        attempt: i32,
    ) -> catalogue_common::Result<Vec<String>> {
        self.inner.list_attributed_to(catalogue_key, sector_key, attempt).await
    }

    async fn commit_batch(&self, catalogue_key: i32, batch: WriteBatch) -> catalogue_common::Result<()> {
        self.inner.commit_batch(catalogue_key, batch).await
    }

    async fn delete_usage(&self, catalogue_key: i32, id: &str) -> catalogue_common::Result<u64> {
        self.inner.delete_usage(catalogue_key, id).await
    }

    async fn delete_by_sector(&self, catalogue_key: i32, sector_key: i32) -> catalogue_common::Result<u64> {
        self.inner.delete_by_sector(catalogue_key, sector_key).await
    }

    async fn set_parent(&self, catalogue_key: i32, id: &str, parent_id: Option<&str>) -> catalogue_common::Result<()> {
        self.inner.set_parent(catalogue_key, id, parent_id).await
    }
}

/// Metrics sink remembering every finished job
#[derive(Default)]
pub struct RecordingMetrics {
    pub queued: Mutex<Vec<JobKind>>,
    pub finished: Mutex<Vec<(JobKind, ImportState)>>,
}

impl MetricsSink for RecordingMetrics {
    fn job_queued(&self, kind: JobKind) {
        self.queued.lock().unwrap().push(kind);
    }

    fn job_finished(&self, kind: JobKind, state: ImportState, _queued: Duration, _run: Duration) {
        self.finished.lock().unwrap().push((kind, state));
    }
}
