//! # Catalogue Common Library
//!
//! Shared code for the catalogue assembly services:
//! - Error type shared by all crates
//! - Bootstrap configuration (TOML) and root folder resolution
//! - Database initialization and schema
//! - Time utilities

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
