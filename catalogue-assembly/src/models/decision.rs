//! Editorial decisions applied to individual source usages during sync

use serde::{Deserialize, Serialize};

use super::{NameType, Rank, SimpleName, TaxonomicStatus};

db_enum! {
    pub enum DecisionMode {
        /// Exclude the subject and its whole subtree
        Block => "BLOCK",
        /// Override selected attributes on the copy
        Update => "UPDATE",
        /// Marks the subject as reviewed, no effect on sync
        Reviewed => "REVIEWED",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorialDecision {
    pub key: i32,
    pub dataset_key: i32,
    pub subject: SimpleName,
    pub mode: DecisionMode,
    pub status: Option<TaxonomicStatus>,
    pub rank: Option<Rank>,
    pub authorship: Option<String>,
    pub name_type: Option<NameType>,
    pub extinct: Option<bool>,
    pub created_by: i32,
}

impl EditorialDecision {
    pub fn new(dataset_key: i32, subject: SimpleName, mode: DecisionMode) -> Self {
        Self {
            key: 0,
            dataset_key,
            subject,
            mode,
            status: None,
            rank: None,
            authorship: None,
            name_type: None,
            extinct: None,
            created_by: 0,
        }
    }

    pub fn block(dataset_key: i32, subject: SimpleName) -> Self {
        Self::new(dataset_key, subject, DecisionMode::Block)
    }
}
