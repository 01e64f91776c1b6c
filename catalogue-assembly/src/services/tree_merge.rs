//! Copies a sector's source subtree into the catalogue
//!
//! The traversal is depth first with an explicit stack, so arbitrarily deep
//! trees never grow the call stack. Every copy of one run is stamped with
//! the run's attempt; copies left with an earlier attempt afterwards are
//! stale and get deleted. Attempts only grow per sector, so the sweep does
//! not depend on the wall clock.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CopyPolicy;
use crate::error::{AssemblyError, Result};
use crate::models::{DecisionMode, EditorialDecision, NameUsage, Sector, SectorMode};
use crate::store::{TreeStore, WriteBatch};

/// Node counts of one merge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub ignored: u32,
    pub blocked: u32,
}

/// Decisions and exclusions in effect for one sector run
#[derive(Debug, Default)]
pub struct MergeRules {
    /// Decisions by source usage id
    pub decisions: HashMap<String, EditorialDecision>,
    /// Subject ids of other sectors in the same source dataset
    pub nested_subjects: HashSet<String>,
    pub copy_policy: CopyPolicy,
}

impl MergeRules {
    pub fn is_blocked(&self, id: &str) -> bool {
        self.decisions
            .get(id)
            .map(|d| d.mode == DecisionMode::Block)
            .unwrap_or(false)
    }
}

/// Position in the traversal: a source usage and where its copy goes
struct Frame {
    usage: NameUsage,
    parent_copy: String,
    /// Whether `parent_copy` is a copy of the source parent
    parent_copied: bool,
}

pub struct TreeMerge<'a> {
    tree: &'a dyn TreeStore,
    sector: &'a Sector,
    rules: &'a MergeRules,
    cancel: &'a CancellationToken,
    catalogue_key: i32,
    attempt: i32,
    user_key: i32,
    batch_size: usize,
    existing: HashMap<String, String>,
    batch: WriteBatch,
    stats: MergeStats,
}

impl<'a> TreeMerge<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: &'a dyn TreeStore,
        sector: &'a Sector,
        rules: &'a MergeRules,
        cancel: &'a CancellationToken,
        catalogue_key: i32,
        attempt: i32,
        user_key: i32,
        batch_size: usize,
    ) -> Self {
        Self {
            tree,
            sector,
            rules,
            cancel,
            catalogue_key,
            attempt,
            user_key,
            batch_size: batch_size.max(1),
            existing: HashMap::new(),
            batch: WriteBatch::new(),
            stats: MergeStats::default(),
        }
    }

    /// Copy the subtree, then delete stale copies.
    ///
    /// On cancellation the pending batch is committed before returning
    /// [`AssemblyError::Canceled`].
    pub async fn run(mut self) -> Result<MergeStats> {
        let subject_id = self.sector.subject.id.clone().ok_or_else(|| {
            AssemblyError::Configuration(format!("Sector {} subject {} is unresolved", self.sector.key, self.sector.subject))
        })?;
        let target_id = self.sector.target.id.clone().ok_or_else(|| {
            AssemblyError::Configuration(format!("Sector {} target {} is unresolved", self.sector.key, self.sector.target))
        })?;
        let root = self
            .tree
            .get_usage(self.sector.dataset_key, &subject_id)
            .await?
            .ok_or_else(|| {
                AssemblyError::Configuration(format!(
                    "Sector {} subject {} missing in dataset {}",
                    self.sector.key, subject_id, self.sector.dataset_key
                ))
            })?;

        self.existing = self.tree.copies(self.catalogue_key, self.sector.key).await?;
        debug!(
            existing = self.existing.len(),
            mode = %self.sector.mode,
            "Copying sector subtree"
        );

        let mut stack = vec![Frame {
            usage: root,
            parent_copy: target_id.clone(),
            parent_copied: true,
        }];

        while let Some(frame) = stack.pop() {
            if self.cancel.is_cancelled() {
                self.flush().await?;
                return Err(AssemblyError::Canceled);
            }

            let Frame {
                usage,
                parent_copy,
                parent_copied,
            } = frame;

            if self.rules.is_blocked(&usage.id) {
                debug!(id = %usage.id, name = %usage.name.scientific_name, "Blocked subtree");
                self.stats.blocked += 1;
                continue;
            }

            let is_root = usage.id == subject_id;
            if !is_root && self.rules.nested_subjects.contains(&usage.id) {
                debug!(id = %usage.id, "Skipping subtree covered by another sector");
                continue;
            }

            if usage.is_synonym() {
                if parent_copied && !is_root {
                    self.copy(usage, &parent_copy).await?;
                } else {
                    self.stats.ignored += 1;
                }
                continue;
            }

            let source_id = usage.id.clone();
            let (children_parent, children_parent_copied) = if is_root && self.sector.mode == SectorMode::Merge {
                (target_id.clone(), false)
            } else if !usage.name.name_type.is_copyable() {
                debug!(id = %usage.id, name_type = %usage.name.name_type, "Ignoring non copyable name");
                self.stats.ignored += 1;
                (parent_copy, false)
            } else {
                (self.copy(usage, &parent_copy).await?, true)
            };

            let children = self.tree.children(self.sector.dataset_key, &source_id).await?;
            for child in children.into_iter().rev() {
                stack.push(Frame {
                    usage: child,
                    parent_copy: children_parent.clone(),
                    parent_copied: children_parent_copied,
                });
            }
        }

        self.flush().await?;
        self.delete_stale().await?;

        info!(
            created = self.stats.created,
            updated = self.stats.updated,
            deleted = self.stats.deleted,
            ignored = self.stats.ignored,
            blocked = self.stats.blocked,
            "Sector subtree copied"
        );
        Ok(self.stats)
    }

    /// Queue the copy of a usage below `parent_copy`, returning the copy id
    async fn copy(&mut self, usage: NameUsage, parent_copy: &str) -> Result<String> {
        let source_id = usage.id.clone();
        let mut copy = usage;

        if let Some(decision) = self.rules.decisions.get(&source_id) {
            apply_decision(&mut copy, decision);
        }
        self.rules.copy_policy.apply(&mut copy);

        let existing = self.existing.get(&source_id).cloned();
        let is_update = existing.is_some();
        copy.id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
        copy.dataset_key = self.catalogue_key;
        copy.parent_id = Some(parent_copy.to_string());
        copy.sector_key = Some(self.sector.key);
        copy.source_id = Some(source_id);
        copy.sync_attempt = Some(self.attempt);
        copy.synced_at = Some(Utc::now());
        copy.modified_by = Some(self.user_key);

        let copy_id = copy.id.clone();
        if is_update {
            self.batch.update(copy);
            self.stats.updated += 1;
        } else {
            self.batch.create(copy);
            self.stats.created += 1;
        }

        if self.batch.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(copy_id)
    }

    async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        debug!(writes = batch.len(), "Committing batch");
        self.tree.commit_batch(self.catalogue_key, batch).await?;
        Ok(())
    }

    async fn delete_stale(&mut self) -> Result<()> {
        let stale = self
            .tree
            .list_attributed_to(self.catalogue_key, self.sector.key, self.attempt)
            .await?;
        if stale.is_empty() {
            return Ok(());
        }

        // Runs to completion once started so relinking sees a consistent tree
        debug!(count = stale.len(), "Deleting stale copies");
        for id in stale {
            let removed = self.tree.delete_usage(self.catalogue_key, &id).await?;
            self.stats.deleted += removed as u32;
        }
        Ok(())
    }
}

/// Apply an UPDATE decision's overrides to a copy
pub fn apply_decision(usage: &mut NameUsage, decision: &EditorialDecision) {
    if decision.mode != DecisionMode::Update {
        return;
    }

    if let Some(rank) = decision.rank {
        usage.name.rank = rank;
    }
    if let Some(authorship) = &decision.authorship {
        usage.name.authorship = Some(authorship.clone()).filter(|a| !a.is_empty());
    }
    if let Some(name_type) = decision.name_type {
        usage.name.name_type = name_type;
    }
    if let Some(extinct) = decision.extinct {
        usage.extinct = Some(extinct);
    }
    if let Some(status) = decision.status {
        if status.is_synonym() == usage.status.is_synonym() {
            usage.status = status;
        } else {
            warn!(
                decision = decision.key,
                id = %usage.id,
                from = %usage.status,
                to = %status,
                "Decision cannot change between accepted and synonym status, ignoring status"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Name, NameType, Rank, SimpleName, TaxonomicStatus};

    fn decision(mode: DecisionMode) -> EditorialDecision {
        EditorialDecision::new(1, SimpleName::new("Felis", None, None).with_id("g"), mode)
    }

    #[test]
    fn test_update_decision_overrides() {
        let mut usage = NameUsage::new(1, "g", Name::new("Felis", Rank::Genus).with_authorship("L."));
        let mut d = decision(DecisionMode::Update);
        d.rank = Some(Rank::Subgenus);
        d.authorship = Some("Linnaeus, 1758".to_string());
        d.extinct = Some(true);
        d.status = Some(TaxonomicStatus::ProvisionallyAccepted);

        apply_decision(&mut usage, &d);
        assert_eq!(usage.name.rank, Rank::Subgenus);
        assert_eq!(usage.name.authorship.as_deref(), Some("Linnaeus, 1758"));
        assert_eq!(usage.extinct, Some(true));
        assert_eq!(usage.status, TaxonomicStatus::ProvisionallyAccepted);
        assert_eq!(usage.name.name_type, NameType::Scientific);
    }

    #[test]
    fn test_update_decision_refuses_synonym_flip() {
        let mut usage = NameUsage::new(1, "g", Name::new("Felis", Rank::Genus));
        let mut d = decision(DecisionMode::Update);
        d.status = Some(TaxonomicStatus::Synonym);

        apply_decision(&mut usage, &d);
        assert_eq!(usage.status, TaxonomicStatus::Accepted);
    }

    #[test]
    fn test_reviewed_decision_changes_nothing() {
        let original = NameUsage::new(1, "g", Name::new("Felis", Rank::Genus));
        let mut usage = original.clone();
        let mut d = decision(DecisionMode::Reviewed);
        d.rank = Some(Rank::Family);

        apply_decision(&mut usage, &d);
        assert_eq!(usage, original);
    }

    #[test]
    fn test_blocked_lookup() {
        let mut rules = MergeRules::default();
        rules.decisions.insert("g".to_string(), decision(DecisionMode::Block));
        rules.decisions.insert("s".to_string(), decision(DecisionMode::Update));
        assert!(rules.is_blocked("g"));
        assert!(!rules.is_blocked("s"));
        assert!(!rules.is_blocked("x"));
    }
}
