//! Assembly services

pub mod coordinator;
pub mod relink;
pub mod rematcher;
pub mod sector_job;
pub mod tree_merge;

pub use coordinator::{AssemblyCoordinator, AssemblyState, RunningJob, SyncSummary};
pub use rematcher::{MatchCounter, RematchReport, RematchRequest, RematchWarning, Rematcher};
pub use sector_job::{JobOutcome, SectorJob};
pub use tree_merge::{MergeRules, MergeStats, TreeMerge};
