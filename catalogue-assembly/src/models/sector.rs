//! Sectors: subtrees of a source dataset mapped onto a catalogue node

use serde::{Deserialize, Serialize};

use super::SimpleName;

db_enum! {
    /// How the sector subject is grafted onto the target
    pub enum SectorMode {
        /// Subject is copied as a child of the target
        Attach => "ATTACH",
        /// Subject's children are copied directly under the target
        Merge => "MERGE",
    }
}

impl Default for SectorMode {
    fn default() -> Self {
        SectorMode::Attach
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    /// Database key, zero until created
    pub key: i32,
    /// Source dataset the subject lives in
    pub dataset_key: i32,
    /// Root of the source subtree
    pub subject: SimpleName,
    /// Catalogue node receiving the copy
    pub target: SimpleName,
    pub mode: SectorMode,
    /// Attempt number of the last successful sync
    pub sync_attempt: Option<i32>,
    pub created_by: i32,
}

impl Sector {
    pub fn new(dataset_key: i32, subject: SimpleName, target: SimpleName) -> Self {
        Self {
            key: 0,
            dataset_key,
            subject,
            target,
            mode: SectorMode::Attach,
            sync_attempt: None,
            created_by: 0,
        }
    }

    pub fn with_mode(mut self, mode: SectorMode) -> Self {
        self.mode = mode;
        self
    }

    /// Both subject and target carry a resolved id
    pub fn is_resolved(&self) -> bool {
        self.subject.is_resolved() && self.target.is_resolved()
    }
}
