//! One sync or delete run for a single sector
//!
//! A job owns its [`SectorImport`] record and publishes every state change
//! on a watch channel. Cancellation is cooperative: the token is checked
//! between phases and between copied nodes.

use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::AssemblySettings;
use crate::error::{AssemblyError, Result};
use crate::models::{ImportState, JobKind, Sector, SectorImport, User};
use crate::services::relink::{collect_foreign_children, detach_sector, relink_child_sectors, relink_foreign_children};
use crate::services::tree_merge::{MergeRules, TreeMerge};
use crate::store::Backend;

/// Result of a finished job, successful or not
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub import: SectorImport,
    /// Time spent in the queue
    pub queued: Duration,
    /// Time spent executing
    pub run: Duration,
}

pub struct SectorJob {
    kind: JobKind,
    sector_key: i32,
    user: User,
    record: SectorImport,
    backend: Backend,
    settings: AssemblySettings,
    cancel: CancellationToken,
    state: watch::Sender<ImportState>,
    queued_at: Instant,
}

impl SectorJob {
    /// Create a job in WAITING state, returning it with a state receiver
    pub fn new(
        kind: JobKind,
        sector: &Sector,
        attempt: i32,
        user: User,
        backend: Backend,
        settings: AssemblySettings,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<ImportState>) {
        let record = SectorImport::new(sector.key, attempt, sector.dataset_key, kind, user.key);
        let (state, state_rx) = watch::channel(ImportState::Waiting);
        let job = Self {
            kind,
            sector_key: sector.key,
            user,
            record,
            backend,
            settings,
            cancel,
            state,
            queued_at: Instant::now(),
        };
        (job, state_rx)
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn sector_key(&self) -> i32 {
        self.sector_key
    }

    pub fn record(&self) -> &SectorImport {
        &self.record
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the job to a terminal state and persist the record
    pub async fn run(mut self) -> JobOutcome {
        let span = info_span!(
            "sector_job",
            sector_key = self.sector_key,
            attempt = self.record.attempt,
            job = %self.kind
        );

        async move {
            let queued = self.queued_at.elapsed();
            let started = Instant::now();
            info!(user = %self.user.username, queued_ms = queued.as_millis() as u64, "Starting sector job");

            match self.execute().await {
                Ok(()) => {
                    self.transition(ImportState::Finished);
                    info!(
                        created = self.record.created,
                        updated = self.record.updated,
                        deleted = self.record.deleted,
                        ignored = self.record.ignored,
                        blocked = self.record.blocked,
                        "Sector job finished"
                    );
                }
                Err(AssemblyError::Canceled) => {
                    self.record.error = Some(AssemblyError::Canceled.to_string());
                    self.transition(ImportState::Canceled);
                    warn!("Sector job canceled");
                }
                Err(e) => {
                    self.record.error = Some(e.to_string());
                    self.transition(ImportState::Failed);
                    error!(error = %e, "Sector job failed");
                }
            }

            if let Err(e) = self.backend.imports.save_import(&self.record).await {
                error!(error = %e, state = %self.record.state, "Failed to persist sector import");
            }

            JobOutcome {
                import: self.record,
                queued,
                run: started.elapsed(),
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(&mut self) -> Result<()> {
        self.checkpoint()?;
        self.enter(ImportState::Preparing).await;

        let sector = self
            .backend
            .sectors
            .get_sector(self.sector_key)
            .await?
            .ok_or(AssemblyError::SectorNotFound(self.sector_key))?;

        match self.kind {
            JobKind::Sync => self.sync(sector).await,
            JobKind::Delete => self.delete(sector).await,
        }
    }

    async fn sync(&mut self, mut sector: Sector) -> Result<()> {
        let catalogue_key = self.settings.catalogue_key;

        let target_id = sector.target.id.clone().ok_or_else(|| {
            AssemblyError::Configuration(format!("Sector {} target {} is unresolved", sector.key, sector.target))
        })?;
        if self.backend.tree.get_usage(catalogue_key, &target_id).await?.is_none() {
            return Err(AssemblyError::Configuration(format!(
                "Sector {} target {} missing in catalogue {}",
                sector.key, target_id, catalogue_key
            )));
        }

        let rules = self.load_rules(&sector).await?;
        let foreign = collect_foreign_children(&self.backend, catalogue_key, sector.key).await?;
        let child_sectors = self.backend.sectors.child_sectors(catalogue_key, sector.key).await?;
        debug!(
            decisions = rules.decisions.len(),
            nested = rules.nested_subjects.len(),
            foreign_children = foreign.len(),
            child_sectors = child_sectors.len(),
            "Prepared sector sync"
        );

        self.checkpoint()?;
        self.enter(ImportState::Copying).await;

        let stats = TreeMerge::new(
            self.backend.tree.as_ref(),
            &sector,
            &rules,
            &self.cancel,
            catalogue_key,
            self.record.attempt,
            self.user.key,
            self.settings.batch_size,
        )
        .run()
        .await?;

        self.record.created = stats.created;
        self.record.updated = stats.updated;
        self.record.deleted = stats.deleted;
        self.record.ignored = stats.ignored;
        self.record.blocked = stats.blocked;

        relink_foreign_children(&self.backend, catalogue_key, &sector, &foreign).await?;
        relink_child_sectors(&self.backend, catalogue_key, &sector, child_sectors).await?;

        self.checkpoint()?;
        self.enter(ImportState::Indexing).await;
        self.refresh_index(Some(&target_id)).await;

        sector.sync_attempt = Some(self.record.attempt);
        self.backend.sectors.update_sector(&sector).await?;
        Ok(())
    }

    async fn delete(&mut self, sector: Sector) -> Result<()> {
        let catalogue_key = self.settings.catalogue_key;

        self.checkpoint()?;
        self.enter(ImportState::Deleting).await;

        detach_sector(&self.backend, catalogue_key, &sector).await?;
        let deleted = self.backend.tree.delete_by_sector(catalogue_key, sector.key).await?;
        self.record.deleted = deleted as u32;
        self.backend.sectors.delete_sector(sector.key).await?;
        info!(deleted, "Removed sector content");

        self.enter(ImportState::Indexing).await;
        self.refresh_index(None).await;
        Ok(())
    }

    async fn load_rules(&self, sector: &Sector) -> Result<MergeRules> {
        let mut rules = MergeRules {
            copy_policy: self.settings.copy_policy.clone(),
            ..Default::default()
        };

        for decision in self.backend.decisions.list_decisions(Some(sector.dataset_key)).await? {
            let Some(id) = decision.subject.id.clone() else {
                debug!(decision = decision.key, "Ignoring decision with unresolved subject");
                continue;
            };
            // Oldest decision wins
            match rules.decisions.entry(id) {
                Entry::Occupied(kept) => warn!(
                    decision = decision.key,
                    mode = %decision.mode,
                    kept = kept.get().key,
                    kept_mode = %kept.get().mode,
                    subject = %decision.subject,
                    "Subject already has a decision, ignoring"
                ),
                Entry::Vacant(slot) => {
                    slot.insert(decision);
                }
            }
        }

        for other in self.backend.sectors.list_sectors(Some(sector.dataset_key)).await? {
            if other.key == sector.key {
                continue;
            }
            if let Some(id) = other.subject.id {
                rules.nested_subjects.insert(id);
            }
        }

        Ok(rules)
    }

    async fn refresh_index(&self, root_id: Option<&str>) {
        if let Err(e) = self.backend.index.refresh(self.sector_key, root_id).await {
            warn!(error = %e, "Search index refresh failed");
        }
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AssemblyError::Canceled)
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, state: ImportState) {
        let t = self.record.transition_to(state);
        debug!(from = %t.old_state, to = %t.new_state, "Sector job state");
        self.state.send_replace(state);
    }

    /// Transition to a running state and persist the record
    async fn enter(&mut self, state: ImportState) {
        self.transition(state);
        if let Err(e) = self.backend.imports.save_import(&self.record).await {
            warn!(error = %e, state = %state, "Failed to persist sector import state");
        }
    }
}
