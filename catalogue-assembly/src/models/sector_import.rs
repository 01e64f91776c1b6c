//! Sector job state machine and per-attempt import record
//!
//! A job moves WAITING → PREPARING → COPYING|DELETING → INDEXING → FINISHED,
//! or ends early in CANCELED or FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

db_enum! {
    /// Sector job state
    pub enum ImportState {
        /// Queued, not yet picked up by a worker
        Waiting => "WAITING",
        /// Loading sector, decisions and existing attachments
        Preparing => "PREPARING",
        /// Copying the source subtree
        Copying => "COPYING",
        /// Removing the sector's catalogue content
        Deleting => "DELETING",
        /// Refreshing the search index
        Indexing => "INDEXING",
        /// Job completed successfully
        Finished => "FINISHED",
        /// Job interrupted by cancel or shutdown
        Canceled => "CANCELED",
        /// Job failed with an error
        Failed => "FAILED",
    }
}

impl ImportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportState::Finished | ImportState::Canceled | ImportState::Failed
        )
    }
}

db_enum! {
    /// What a sector job does
    pub enum JobKind {
        Sync => "SYNC",
        Delete => "DELETE",
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub sector_key: i32,
    pub attempt: i32,
    pub old_state: ImportState,
    pub new_state: ImportState,
    pub transitioned_at: DateTime<Utc>,
}

/// Record of one job attempt on a sector.
///
/// `(sector_key, attempt)` is unique; attempts grow by one per queued job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorImport {
    pub sector_key: i32,
    pub attempt: i32,
    pub dataset_key: i32,
    pub job: JobKind,
    pub state: ImportState,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
    pub ignored: u32,
    pub blocked: u32,
    pub error: Option<String>,
    pub created_by: i32,
}

impl SectorImport {
    /// New record in WAITING state
    pub fn new(sector_key: i32, attempt: i32, dataset_key: i32, job: JobKind, created_by: i32) -> Self {
        Self {
            sector_key,
            attempt,
            dataset_key,
            job,
            state: ImportState::Waiting,
            started: None,
            finished: None,
            created: 0,
            updated: 0,
            deleted: 0,
            ignored: 0,
            blocked: 0,
            error: None,
            created_by,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: ImportState) -> StateTransition {
        let now = Utc::now();
        let transition = StateTransition {
            sector_key: self.sector_key,
            attempt: self.attempt,
            old_state: self.state,
            new_state,
            transitioned_at: now,
        };
        self.state = new_state;

        if new_state == ImportState::Preparing && self.started.is_none() {
            self.started = Some(now);
        }
        if new_state.is_terminal() {
            self.finished = Some(now);
        }

        transition
    }
}
