//! Runtime settings for catalogue assembly
//!
//! All values live in the `settings` table. Missing or NULL values are
//! initialized with the built-in defaults and written back to the database.

use catalogue_common::db::ensure_setting;
use catalogue_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::NameUsage;

pub const CATALOGUE_KEY: &str = "assembly_catalogue_key";
pub const BATCH_SIZE: &str = "assembly_batch_size";
pub const WORKER_COUNT: &str = "assembly_worker_count";
pub const SHUTDOWN_GRACE_MS: &str = "assembly_shutdown_grace_ms";
pub const COPY_DATA: &str = "assembly_copy_data";
pub const MAX_LOCK_WAIT_MS: &str = "assembly_max_lock_wait_ms";

const DEFAULT_CATALOGUE_KEY: i32 = 3;
const DEFAULT_BATCH_SIZE: usize = 1000;
const DEFAULT_WORKER_COUNT: usize = 1;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;
const DEFAULT_COPY_DATA: &str = "reference,vernacular,distribution";
const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

db_enum! {
    /// Associated data carried along with a copied usage
    pub enum EntityType {
        Reference => "REFERENCE",
        Vernacular => "VERNACULAR",
        Distribution => "DISTRIBUTION",
    }
}

/// Which associated entities are transferred onto catalogue copies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPolicy {
    entities: HashSet<EntityType>,
}

impl CopyPolicy {
    pub fn all() -> Self {
        Self {
            entities: [EntityType::Reference, EntityType::Vernacular, EntityType::Distribution]
                .into_iter()
                .collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            entities: HashSet::new(),
        }
    }

    /// Parse a comma separated list such as `reference,vernacular`
    pub fn parse(value: &str) -> Result<Self> {
        let mut entities = HashSet::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            entities.insert(part.parse::<EntityType>()?);
        }
        Ok(Self { entities })
    }

    pub fn copies(&self, entity: EntityType) -> bool {
        self.entities.contains(&entity)
    }

    /// Drop associated data the policy does not transfer
    pub fn apply(&self, usage: &mut NameUsage) {
        if !self.copies(EntityType::Reference) {
            usage.reference_citations.clear();
        }
        if !self.copies(EntityType::Vernacular) {
            usage.vernacular_names.clear();
        }
        if !self.copies(EntityType::Distribution) {
            usage.distributions.clear();
        }
    }
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self::all()
    }
}

/// Runtime settings loaded from database
#[derive(Debug, Clone)]
pub struct AssemblySettings {
    /// Dataset key of the managed catalogue
    pub catalogue_key: i32,
    /// Catalogue writes per committed batch
    pub batch_size: usize,
    /// Number of sector jobs executed concurrently
    pub worker_count: usize,
    /// How long shutdown waits for running jobs
    pub shutdown_grace: Duration,
    pub copy_policy: CopyPolicy,
    /// Upper bound for retrying locked database writes
    pub max_lock_wait_ms: u64,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            catalogue_key: DEFAULT_CATALOGUE_KEY,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            copy_policy: CopyPolicy::all(),
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

impl AssemblySettings {
    /// Load settings, writing defaults for any missing key
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        async fn get_setting(pool: &SqlitePool, key: &str, default: &str) -> Result<String> {
            ensure_setting(pool, key, default).await?;
            let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_one(pool)
                .await?;
            Ok(value.unwrap_or_else(|| default.to_string()))
        }

        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Invalid value '{}' for {}: {}", value, key, e)))
        }

        let catalogue_key = parse(
            CATALOGUE_KEY,
            &get_setting(pool, CATALOGUE_KEY, &DEFAULT_CATALOGUE_KEY.to_string()).await?,
        )?;
        let batch_size: usize = parse(
            BATCH_SIZE,
            &get_setting(pool, BATCH_SIZE, &DEFAULT_BATCH_SIZE.to_string()).await?,
        )?;
        let worker_count: usize = parse(
            WORKER_COUNT,
            &get_setting(pool, WORKER_COUNT, &DEFAULT_WORKER_COUNT.to_string()).await?,
        )?;
        let shutdown_grace_ms: u64 = parse(
            SHUTDOWN_GRACE_MS,
            &get_setting(pool, SHUTDOWN_GRACE_MS, &DEFAULT_SHUTDOWN_GRACE_MS.to_string()).await?,
        )?;
        let copy_policy = CopyPolicy::parse(&get_setting(pool, COPY_DATA, DEFAULT_COPY_DATA).await?)?;
        let max_lock_wait_ms = parse(
            MAX_LOCK_WAIT_MS,
            &get_setting(pool, MAX_LOCK_WAIT_MS, &DEFAULT_MAX_LOCK_WAIT_MS.to_string()).await?,
        )?;

        let settings = Self {
            catalogue_key,
            batch_size: if batch_size == 0 {
                warn!("{} must be positive, using {}", BATCH_SIZE, DEFAULT_BATCH_SIZE);
                DEFAULT_BATCH_SIZE
            } else {
                batch_size
            },
            worker_count: if worker_count == 0 {
                warn!("{} must be positive, using {}", WORKER_COUNT, DEFAULT_WORKER_COUNT);
                DEFAULT_WORKER_COUNT
            } else {
                worker_count
            },
            shutdown_grace: Duration::from_millis(shutdown_grace_ms),
            copy_policy,
            max_lock_wait_ms,
        };

        info!(
            catalogue_key = settings.catalogue_key,
            batch_size = settings.batch_size,
            workers = settings.worker_count,
            "Loaded assembly settings"
        );
        Ok(settings)
    }
}
