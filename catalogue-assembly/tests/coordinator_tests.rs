//! Coordinator scheduling, cancellation and shutdown behavior

mod helpers;

use async_trait::async_trait;
use catalogue_assembly::models::{ImportState, JobKind, Rank, Sector, SectorImport, SectorMode, SimpleName};
use catalogue_assembly::store::{ImportStore, SectorStore};
use catalogue_assembly::{AssemblyCoordinator, AssemblyError};
use helpers::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Second sector on its own source: Panthera > leo
async fn add_panthera_sector(env: &TestEnv) -> Sector {
    env.store
        .insert_usages(&[
            usage(OTHER_SOURCE, "pan", "Panthera", Rank::Genus, None),
            usage(OTHER_SOURCE, "leo", "Panthera leo", Rank::Species, Some("pan")),
        ])
        .await
        .unwrap();
    let mut sector = Sector::new(
        OTHER_SOURCE,
        SimpleName::new("Panthera", None, Some(Rank::Genus)).with_id("pan"),
        felidae_target(),
    );
    sector.key = env.backend.sectors.create_sector(&sector).await.unwrap();
    sector
}

async fn start_gated(env: &TestEnv, index: &Arc<GatedIndex>) -> AssemblyCoordinator {
    let backend = env.backend.clone().with_index(index.clone());
    AssemblyCoordinator::start(backend, settings()).await.unwrap()
}

#[tokio::test]
async fn test_one_job_per_sector_in_flight() {
    let (env, sector) = felis_env(SectorMode::Attach).await;
    let index = GatedIndex::closed();
    let coordinator = start_gated(&env, &index).await;

    assert!(coordinator.sync_sector(sector.key, &user()).await.unwrap());
    index.wait_entered().await;

    assert!(coordinator.is_busy(sector.key));
    assert!(!coordinator.sync_sector(sector.key, &user()).await.unwrap());
    assert!(!coordinator.delete_sector(sector.key, &user()).await.unwrap());

    let state = coordinator.get_state();
    assert_eq!(state.running.len(), 1);
    assert_eq!(state.running[0].sector_key, sector.key);
    assert_eq!(state.running[0].state, ImportState::Indexing);
    assert_eq!(state.running[0].job, JobKind::Sync);
    assert_eq!(state.running[0].username, "editor");

    // Refused requests leave no import record behind
    let imports = env.backend.imports.list_imports(sector.key, 10).await.unwrap();
    assert_eq!(imports.len(), 1);

    index.release_all();
    wait_idle(&coordinator).await;
    assert!(!coordinator.is_busy(sector.key));
    assert_eq!(coordinator.get_state().completed, 1);

    // Accepted again once settled
    assert!(coordinator.sync_sector(sector.key, &user()).await.unwrap());
    wait_idle(&coordinator).await;
    let latest = env.backend.imports.latest_import(sector.key).await.unwrap().unwrap();
    assert_eq!(latest.attempt, 2);

    coordinator.stop().await;
}

/// Import store holding the first attempt lookup at a gate after reading it
struct SlowAttempts {
    inner: Arc<dyn ImportStore>,
    gate: Gate,
    held: AtomicBool,
}

#[async_trait]
impl ImportStore for SlowAttempts {
    async fn next_attempt(&self, sector_key: i32) -> catalogue_common::Result<i32> {
        let attempt = self.inner.next_attempt(sector_key).await?;
        if !self.held.swap(true, Ordering::SeqCst) {
            self.gate.pass().await?;
        }
        Ok(attempt)
    }

    async fn save_import(&self, import: &SectorImport) -> catalogue_common::Result<()> {
        self.inner.save_import(import).await
    }

    async fn list_imports(&self, sector_key: i32, limit: u32) -> catalogue_common::Result<Vec<SectorImport>> {
        self.inner.list_imports(sector_key, limit).await
    }

    async fn latest_import(&self, sector_key: i32) -> catalogue_common::Result<Option<SectorImport>> {
        self.inner.latest_import(sector_key).await
    }

    async fn cancel_unfinished(&self) -> catalogue_common::Result<u64> {
        self.inner.cancel_unfinished().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_preparing_an_attempt_holds_the_sector() {
    let (env, sector) = felis_env(SectorMode::Attach).await;
    let imports = Arc::new(SlowAttempts {
        inner: env.backend.imports.clone(),
        gate: Gate::closed(),
        held: AtomicBool::new(false),
    });
    let mut backend = env.backend.clone();
    backend.imports = imports.clone();
    let coordinator = AssemblyCoordinator::start(backend, settings()).await.unwrap();

    let slow = {
        let coordinator = coordinator.clone();
        let sector_key = sector.key;
        tokio::spawn(async move { coordinator.sync_sector(sector_key, &user()).await })
    };
    imports.gate.wait_entered().await;

    // Attempt 1 is taken but not yet registered
    assert!(coordinator.is_busy(sector.key));
    assert!(!coordinator.sync_sector(sector.key, &user()).await.unwrap());

    imports.gate.release_all();
    assert!(slow.await.unwrap().unwrap());
    wait_idle(&coordinator).await;

    assert!(coordinator.sync_sector(sector.key, &user()).await.unwrap());
    wait_idle(&coordinator).await;

    let records: Vec<(i32, ImportState)> = env
        .backend
        .imports
        .list_imports(sector.key, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|i| (i.attempt, i.state))
        .collect();
    assert_eq!(records, vec![(2, ImportState::Finished), (1, ImportState::Finished)]);
    assert_eq!(coordinator.get_state().completed, 2);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_cancel_during_copy_keeps_whole_nodes() {
    let (env, sector) = felis_env(SectorMode::Attach).await;
    let tree = GatedTree::wrap(&env.backend, "g");
    let mut backend = env.backend.clone();
    backend.tree = tree.clone();
    let coordinator = AssemblyCoordinator::start(backend, settings()).await.unwrap();

    assert!(coordinator.sync_sector(sector.key, &user()).await.unwrap());
    // Felis is copied and pending in the batch, its children not yet listed
    tree.gate.wait_entered().await;
    assert_eq!(coordinator.get_state().running[0].state, ImportState::Copying);
    assert!(coordinator.cancel(sector.key, &user()));
    tree.gate.release_all();
    wait_idle(&coordinator).await;

    let canceled = env.backend.imports.latest_import(sector.key).await.unwrap().unwrap();
    assert_eq!(canceled.state, ImportState::Canceled);
    assert_eq!(canceled.error.as_deref(), Some("canceled"));
    let state = coordinator.get_state();
    assert_eq!(state.failed, 0);
    assert_eq!(state.completed, 0);

    // The pending batch was committed before unwinding
    let partial = copies_of(&env, sector.key).await;
    assert_eq!(partial.len(), 1);
    let genus = copy_of(&partial, "g").unwrap();
    assert_eq!(genus.name.scientific_name, "Felis");
    assert_eq!(genus.parent_id.as_deref(), Some(TARGET_ID));
    assert_eq!(genus.sync_attempt, Some(1));

    let resync = sync_and_wait(&coordinator, &env, sector.key).await;
    assert_eq!(resync.state, ImportState::Finished);
    assert_eq!(resync.attempt, 2);
    assert_eq!(resync.created, 2);
    assert_eq!(resync.updated, 1);
    assert_eq!(resync.deleted, 0);

    let copies = copies_of(&env, sector.key).await;
    let source_ids: HashSet<_> = copies.iter().filter_map(|u| u.source_id.clone()).collect();
    assert_eq!(copies.len(), 3);
    assert_eq!(source_ids.len(), 3);
    assert_eq!(copy_of(&copies, "g").unwrap().id, genus.id);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_cancel_queued_job_is_not_a_failure() {
    let (env, felis) = felis_env(SectorMode::Attach).await;
    let panthera = add_panthera_sector(&env).await;
    let index = GatedIndex::closed();
    let coordinator = start_gated(&env, &index).await;

    assert!(coordinator.sync_sector(felis.key, &user()).await.unwrap());
    index.wait_entered().await;
    assert!(coordinator.sync_sector(panthera.key, &user()).await.unwrap());

    let waiting = env.backend.imports.latest_import(panthera.key).await.unwrap().unwrap();
    assert_eq!(waiting.state, ImportState::Waiting);

    assert!(coordinator.cancel(panthera.key, &user()));
    assert!(!coordinator.cancel(9999, &user()));

    index.release_all();
    wait_idle(&coordinator).await;

    let canceled = env.backend.imports.latest_import(panthera.key).await.unwrap().unwrap();
    assert_eq!(canceled.state, ImportState::Canceled);
    assert_eq!(canceled.error.as_deref(), Some("canceled"));
    assert!(canceled.started.is_none());
    assert!(canceled.finished.is_some());
    assert!(copies_of(&env, panthera.key).await.is_empty());

    let state = coordinator.get_state();
    assert_eq!(state.failed, 0);
    assert_eq!(state.completed, 1);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_workers_run_sectors_in_parallel() {
    let (env, felis) = felis_env(SectorMode::Attach).await;
    let panthera = add_panthera_sector(&env).await;
    let index = GatedIndex::closed();
    let backend = env.backend.clone().with_index(index.clone());
    let mut settings = settings();
    settings.worker_count = 2;
    let coordinator = AssemblyCoordinator::start(backend, settings).await.unwrap();

    assert!(coordinator.sync_sector(felis.key, &user()).await.unwrap());
    assert!(coordinator.sync_sector(panthera.key, &user()).await.unwrap());

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let state = coordinator.get_state();
            if state.running.len() == 2 && state.running.iter().all(|j| j.state == ImportState::Indexing) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both sectors should reach indexing together");

    index.release_all();
    wait_idle(&coordinator).await;
    assert_eq!(coordinator.get_state().completed, 2);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_dataset_state_and_metrics() {
    let (env, felis) = felis_env(SectorMode::Attach).await;
    let index = GatedIndex::closed();
    let metrics = Arc::new(RecordingMetrics::default());
    let backend = env
        .backend
        .clone()
        .with_index(index.clone())
        .with_metrics(metrics.clone());
    let coordinator = AssemblyCoordinator::start(backend, settings()).await.unwrap();

    assert!(coordinator.sync_sector(felis.key, &user()).await.unwrap());
    index.wait_entered().await;

    assert!(coordinator.has_syncing_sector(SOURCE));
    assert!(!coordinator.has_syncing_sector(OTHER_SOURCE));
    assert_eq!(coordinator.get_dataset_state(SOURCE).running.len(), 1);
    assert!(coordinator.get_dataset_state(OTHER_SOURCE).is_idle());

    index.release_all();
    wait_idle(&coordinator).await;

    assert_eq!(coordinator.get_dataset_state(SOURCE).completed, 1);
    assert_eq!(coordinator.get_dataset_state(OTHER_SOURCE).completed, 0);
    assert_eq!(*metrics.queued.lock().unwrap(), vec![JobKind::Sync]);
    assert_eq!(
        *metrics.finished.lock().unwrap(),
        vec![(JobKind::Sync, ImportState::Finished)]
    );

    coordinator.stop().await;
}

#[tokio::test]
async fn test_requests_refused_after_stop() {
    let (env, sector) = felis_env(SectorMode::Attach).await;
    let coordinator = AssemblyCoordinator::start(env.backend.clone(), settings()).await.unwrap();

    coordinator.stop().await;

    let result = coordinator.sync_sector(sector.key, &user()).await;
    assert!(matches!(result, Err(AssemblyError::ShuttingDown)));
    let result = coordinator.sync_all(&user()).await;
    assert!(matches!(result, Err(AssemblyError::ShuttingDown)));
    assert!(env.backend.imports.latest_import(sector.key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stop_cancels_queued_jobs() {
    let (env, felis) = felis_env(SectorMode::Attach).await;
    let panthera = add_panthera_sector(&env).await;
    let index = GatedIndex::closed();
    let coordinator = start_gated(&env, &index).await;

    assert!(coordinator.sync_sector(felis.key, &user()).await.unwrap());
    index.wait_entered().await;
    assert!(coordinator.sync_sector(panthera.key, &user()).await.unwrap());

    let stopping = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.stop().await })
    };

    // Shutdown is visible once new requests are refused
    tokio::time::timeout(Duration::from_secs(10), async {
        while !matches!(
            coordinator.sync_sector(felis.key, &user()).await,
            Err(AssemblyError::ShuttingDown)
        ) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    index.release_all();
    stopping.await.unwrap();

    assert!(coordinator.get_state().is_idle());
    let queued = env.backend.imports.latest_import(panthera.key).await.unwrap().unwrap();
    assert_eq!(queued.state, ImportState::Canceled);
    let running = env.backend.imports.latest_import(felis.key).await.unwrap().unwrap();
    assert!(running.state.is_terminal());
}

#[tokio::test]
async fn test_stop_abandons_jobs_after_grace_period() {
    let (env, sector) = felis_env(SectorMode::Attach).await;
    let index = GatedIndex::closed();
    let backend = env.backend.clone().with_index(index.clone());
    let mut settings = settings();
    settings.shutdown_grace = Duration::from_millis(100);
    let coordinator = AssemblyCoordinator::start(backend, settings).await.unwrap();

    assert!(coordinator.sync_sector(sector.key, &user()).await.unwrap());
    index.wait_entered().await;

    tokio::time::timeout(Duration::from_secs(5), coordinator.stop())
        .await
        .expect("stop must return after the grace period");
    assert_eq!(coordinator.get_state().running.len(), 1);
}

#[tokio::test]
async fn test_unfinished_imports_canceled_on_start() {
    let (env, sector) = felis_env(SectorMode::Attach).await;
    let mut stale = SectorImport::new(sector.key, 1, SOURCE, JobKind::Sync, 0);
    stale.transition_to(ImportState::Preparing);
    stale.transition_to(ImportState::Copying);
    env.backend.imports.save_import(&stale).await.unwrap();

    let coordinator = AssemblyCoordinator::start(env.backend.clone(), settings()).await.unwrap();

    let record = env.backend.imports.latest_import(sector.key).await.unwrap().unwrap();
    assert_eq!(record.state, ImportState::Canceled);
    assert_eq!(record.error.as_deref(), Some("canceled"));
    assert!(record.finished.is_some());

    let next = sync_and_wait(&coordinator, &env, sector.key).await;
    assert_eq!(next.attempt, 2);
    assert_eq!(next.state, ImportState::Finished);

    coordinator.stop().await;
}

#[tokio::test]
async fn test_empty_dataset_and_unknown_sector_rejected() {
    let env = setup().await;
    load_catalogue(&env).await;
    let empty = create_sector(&env, felis(), felidae_target(), SectorMode::Attach).await;
    let coordinator = AssemblyCoordinator::start(env.backend.clone(), settings()).await.unwrap();

    let result = coordinator.sync_sector(empty.key, &user()).await;
    assert!(matches!(result, Err(AssemblyError::Configuration(_))));
    assert!(!coordinator.is_busy(empty.key));
    assert!(env.backend.imports.latest_import(empty.key).await.unwrap().is_none());

    let result = coordinator.sync_sector(4242, &user()).await;
    assert!(matches!(result, Err(AssemblyError::SectorNotFound(4242))));

    coordinator.stop().await;
}

#[tokio::test]
async fn test_sync_all_skips_unresolved_sectors() {
    let (env, felis) = felis_env(SectorMode::Attach).await;
    let unresolved = create_sector(
        &env,
        SimpleName::new("Lynx", None, Some(Rank::Genus)),
        felidae_target(),
        SectorMode::Attach,
    )
    .await;
    let coordinator = AssemblyCoordinator::start(env.backend.clone(), settings()).await.unwrap();

    let summary = coordinator.sync_all(&user()).await.unwrap();
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.busy, 0);
    assert_eq!(summary.failed, 0);

    wait_idle(&coordinator).await;
    assert_eq!(
        env.backend.imports.latest_import(felis.key).await.unwrap().unwrap().state,
        ImportState::Finished
    );
    assert!(env.backend.imports.latest_import(unresolved.key).await.unwrap().is_none());

    let summary = coordinator.sync_dataset(SOURCE, &user()).await.unwrap();
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.unresolved, 1);
    wait_idle(&coordinator).await;

    coordinator.stop().await;
}
