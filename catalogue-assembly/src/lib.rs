//! catalogue-assembly library interface
//!
//! Copies sectors of source datasets into the managed catalogue, keeps at
//! most one job in flight per sector and rematches sector and decision
//! anchors after source trees are rebuilt.

#[macro_use]
pub mod models;

pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod store;
pub mod utils;

pub use crate::config::{AssemblySettings, CopyPolicy};
pub use crate::error::{AssemblyError, Result};
pub use crate::services::{
    AssemblyCoordinator, AssemblyState, MatchCounter, RematchReport, RematchRequest, Rematcher, RunningJob,
    SyncSummary,
};
pub use crate::store::Backend;
