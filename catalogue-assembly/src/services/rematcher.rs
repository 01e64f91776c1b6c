//! Re-resolves sector and decision anchors after a tree was rebuilt
//!
//! Each anchor fingerprint is matched against the current tree: exactly one
//! candidate updates the id, zero or several clear it and raise a warning.
//! Failures are counted per entity and never stop the pass.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use crate::error::{AssemblyError, Result};
use crate::models::{EditorialDecision, Sector, SimpleName};
use crate::store::Backend;

/// Per entity kind outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchCounter {
    /// Anchors now pointing to a different node
    pub updated: u32,
    /// Anchors that resolved to the same node again
    pub unchanged: u32,
    /// Entities left with at least one unresolved anchor
    pub broken: u32,
    /// Entities whose rematch raised an error
    pub failed: u32,
}

impl MatchCounter {
    pub fn total(&self) -> u32 {
        self.updated + self.unchanged + self.broken + self.failed
    }

    fn add(&mut self, other: &MatchCounter) {
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.broken += other.broken;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Anchor {
    Subject,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Entity {
    Sector(i32),
    Decision(i32),
}

/// An anchor that could not be resolved to a single node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RematchWarning {
    pub entity: Entity,
    pub anchor: Anchor,
    pub name: SimpleName,
    /// Matching node ids; empty for no match
    pub candidates: Vec<String>,
    /// Set when the unique candidate is already the subject of another
    /// entity of the same kind
    pub duplicate_of: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RematchReport {
    pub sectors: MatchCounter,
    pub decisions: MatchCounter,
    /// Source datasets covered by the pass
    pub datasets: Vec<i32>,
    pub warnings: Vec<RematchWarning>,
}

impl RematchReport {
    fn merge(&mut self, other: RematchReport) {
        self.sectors.add(&other.sectors);
        self.decisions.add(&other.decisions);
        self.warnings.extend(other.warnings);
    }
}

/// What to rematch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RematchRequest {
    /// Source dataset to rematch; `None` covers every dataset with sectors
    pub dataset_key: Option<i32>,
    /// Also rematch sector targets against the catalogue
    pub targets: bool,
}

impl RematchRequest {
    pub fn dataset(dataset_key: i32) -> Self {
        Self {
            dataset_key: Some(dataset_key),
            targets: false,
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_targets(mut self) -> Self {
        self.targets = true;
        self
    }
}

enum MatchOutcome {
    Unique(String),
    Unresolved(Vec<String>),
}

pub struct Rematcher {
    backend: Backend,
    catalogue_key: i32,
}

impl Rematcher {
    pub fn new(backend: Backend, catalogue_key: i32) -> Self {
        Self {
            backend,
            catalogue_key,
        }
    }

    /// Rematch every sector and decision of one dataset, or of all datasets
    pub async fn rematch(&self, request: RematchRequest) -> Result<RematchReport> {
        let sectors = self.backend.sectors.list_sectors(request.dataset_key).await?;
        let decisions = self.backend.decisions.list_decisions(request.dataset_key).await?;

        let datasets: BTreeSet<i32> = sectors
            .iter()
            .map(|s| s.dataset_key)
            .chain(decisions.iter().map(|d| d.dataset_key))
            .chain(request.dataset_key)
            .collect();
        info!(
            datasets = datasets.len(),
            sectors = sectors.len(),
            decisions = decisions.len(),
            "Rematching anchors"
        );

        let mut report = RematchReport::default();
        for sector in sectors {
            let key = sector.key;
            if let Err(e) = self.rematch_sector_entity(sector, request.targets, &mut report).await {
                error!(sector_key = key, error = %e, "Sector rematch failed");
                report.sectors.failed += 1;
            }
        }

        for decision in decisions {
            let key = decision.key;
            if let Err(e) = self.rematch_decision_entity(decision, &mut report).await {
                error!(decision = key, error = %e, "Decision rematch failed");
                report.decisions.failed += 1;
            }
        }

        report.datasets = datasets.into_iter().collect();
        info!(
            datasets = report.datasets.len(),
            sectors_updated = report.sectors.updated,
            sectors_unchanged = report.sectors.unchanged,
            sectors_broken = report.sectors.broken,
            sectors_failed = report.sectors.failed,
            decisions_updated = report.decisions.updated,
            decisions_unchanged = report.decisions.unchanged,
            decisions_broken = report.decisions.broken,
            decisions_failed = report.decisions.failed,
            "Rematch finished"
        );
        Ok(report)
    }

    /// Rematch a single sector
    pub async fn rematch_sector(&self, sector_key: i32, targets: bool) -> Result<RematchReport> {
        let sector = self
            .backend
            .sectors
            .get_sector(sector_key)
            .await?
            .ok_or(AssemblyError::SectorNotFound(sector_key))?;

        let mut report = RematchReport {
            datasets: vec![sector.dataset_key],
            ..Default::default()
        };
        let mut entity = RematchReport::default();
        if let Err(e) = self.rematch_sector_entity(sector, targets, &mut entity).await {
            error!(sector_key, error = %e, "Sector rematch failed");
            entity.sectors.failed += 1;
        }
        report.merge(entity);
        Ok(report)
    }

    /// Rematch a single decision
    pub async fn rematch_decision(&self, decision_key: i32) -> Result<RematchReport> {
        let decision = self
            .backend
            .decisions
            .get_decision(decision_key)
            .await?
            .ok_or(AssemblyError::DecisionNotFound(decision_key))?;

        let mut report = RematchReport {
            datasets: vec![decision.dataset_key],
            ..Default::default()
        };
        let mut entity = RematchReport::default();
        if let Err(e) = self.rematch_decision_entity(decision, &mut entity).await {
            error!(decision = decision_key, error = %e, "Decision rematch failed");
            entity.decisions.failed += 1;
        }
        report.merge(entity);
        Ok(report)
    }

    async fn rematch_sector_entity(&self, mut sector: Sector, targets: bool, report: &mut RematchReport) -> Result<()> {
        let old = sector.clone();

        let subject_id = match self.match_uniquely(&sector.subject, sector.dataset_key).await? {
            MatchOutcome::Unique(id) => match self.duplicate_subject(&sector, &id).await? {
                Some(other) => {
                    warn!(
                        sector_key = sector.key,
                        subject = %sector.subject,
                        other_sector = other,
                        "Rematched subject already used by another sector"
                    );
                    report.warnings.push(RematchWarning {
                        entity: Entity::Sector(sector.key),
                        anchor: Anchor::Subject,
                        name: sector.subject.clone(),
                        candidates: vec![id],
                        duplicate_of: Some(other),
                    });
                    None
                }
                None => Some(id),
            },
            MatchOutcome::Unresolved(candidates) => {
                self.warn_unresolved(Entity::Sector(sector.key), Anchor::Subject, &sector.subject, candidates, report);
                None
            }
        };
        sector.subject.id = subject_id;

        if targets {
            sector.target.id = match self.match_uniquely(&sector.target, self.catalogue_key).await? {
                MatchOutcome::Unique(id) => Some(id),
                MatchOutcome::Unresolved(candidates) => {
                    self.warn_unresolved(Entity::Sector(sector.key), Anchor::Target, &sector.target, candidates, report);
                    None
                }
            };
        }

        if sector != old {
            debug!(
                sector_key = sector.key,
                subject = ?sector.subject.id,
                target = ?sector.target.id,
                "Updating sector anchors"
            );
            self.backend.sectors.update_sector(&sector).await?;
        }

        if sector.subject.id.is_none() || sector.target.id.is_none() {
            report.sectors.broken += 1;
        } else if sector.subject.id != old.subject.id || sector.target.id != old.target.id {
            report.sectors.updated += 1;
        } else {
            report.sectors.unchanged += 1;
        }
        Ok(())
    }

    async fn rematch_decision_entity(&self, mut decision: EditorialDecision, report: &mut RematchReport) -> Result<()> {
        let old_id = decision.subject.id.clone();

        decision.subject.id = match self.match_uniquely(&decision.subject, decision.dataset_key).await? {
            MatchOutcome::Unique(id) => match self.duplicate_decision(&decision, &id).await? {
                Some(other) => {
                    warn!(
                        decision = decision.key,
                        subject = %decision.subject,
                        other_decision = other,
                        "Rematched subject already used by another decision"
                    );
                    report.warnings.push(RematchWarning {
                        entity: Entity::Decision(decision.key),
                        anchor: Anchor::Subject,
                        name: decision.subject.clone(),
                        candidates: vec![id],
                        duplicate_of: Some(other),
                    });
                    None
                }
                None => Some(id),
            },
            MatchOutcome::Unresolved(candidates) => {
                self.warn_unresolved(Entity::Decision(decision.key), Anchor::Subject, &decision.subject, candidates, report);
                None
            }
        };

        if decision.subject.id != old_id {
            self.backend.decisions.update_decision(&decision).await?;
        }

        match &decision.subject.id {
            None => report.decisions.broken += 1,
            Some(_) if decision.subject.id != old_id => report.decisions.updated += 1,
            Some(_) => report.decisions.unchanged += 1,
        }
        Ok(())
    }

    async fn match_uniquely(&self, name: &SimpleName, dataset_key: i32) -> Result<MatchOutcome> {
        let mut candidates = self.backend.matcher.find(name, dataset_key).await?;
        if candidates.len() == 1 {
            if let Some(id) = candidates.pop() {
                return Ok(MatchOutcome::Unique(id));
            }
        }
        Ok(MatchOutcome::Unresolved(candidates))
    }

    /// Key of another sector of the same dataset already anchored on `subject_id`
    async fn duplicate_subject(&self, sector: &Sector, subject_id: &str) -> Result<Option<i32>> {
        let others = self.backend.sectors.list_sectors(Some(sector.dataset_key)).await?;
        Ok(others
            .into_iter()
            .find(|s| s.key != sector.key && s.subject.id.as_deref() == Some(subject_id))
            .map(|s| s.key))
    }

    /// Key of another decision of the same dataset already anchored on `subject_id`
    async fn duplicate_decision(&self, decision: &EditorialDecision, subject_id: &str) -> Result<Option<i32>> {
        let others = self.backend.decisions.list_decisions(Some(decision.dataset_key)).await?;
        Ok(others
            .into_iter()
            .find(|d| d.key != decision.key && d.subject.id.as_deref() == Some(subject_id))
            .map(|d| d.key))
    }

    fn warn_unresolved(
        &self,
        entity: Entity,
        anchor: Anchor,
        name: &SimpleName,
        candidates: Vec<String>,
        report: &mut RematchReport,
    ) {
        if candidates.is_empty() {
            warn!(?entity, ?anchor, name = %name, "No match found, anchor cleared");
        } else {
            warn!(
                ?entity,
                ?anchor,
                name = %name,
                candidates = ?candidates,
                "Ambiguous match, anchor cleared"
            );
        }
        report.warnings.push(RematchWarning {
            entity,
            anchor,
            name: name.clone(),
            candidates,
            duplicate_of: None,
        });
    }
}
