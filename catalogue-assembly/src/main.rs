//! catalogue-assembly - sector sync service
//!
//! Opens the catalogue database, starts the assembly workers and runs until
//! interrupted. Optionally rematches all anchors and queues a full sync at
//! startup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use catalogue_assembly::models::User;
use catalogue_assembly::{AssemblyCoordinator, AssemblySettings, Backend, RematchRequest, Rematcher};
use catalogue_common::config::{default_config_file, load_toml_config, RootFolderInitializer, RootFolderResolver};
use catalogue_common::db::init_database;

/// Command-line arguments for catalogue-assembly
#[derive(Parser, Debug)]
#[command(name = "catalogue-assembly")]
#[command(about = "Assembles the managed catalogue from source dataset sectors")]
#[command(version)]
struct Args {
    /// Root folder holding the catalogue database
    #[arg(short, long, env = "CATALOGUE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Bootstrap TOML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rematch all sector and decision anchors before starting
    #[arg(long)]
    rematch: bool,

    /// Queue a sync of every resolved sector at startup
    #[arg(long)]
    sync_all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match args.config.clone().or_else(default_config_file) {
        Some(path) => load_toml_config(&path).unwrap_or_else(|e| {
            eprintln!("Ignoring config file {}: {}", path.display(), e);
            Default::default()
        }),
        None => Default::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("catalogue_assembly={0},catalogue_common={0}", toml_config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting catalogue-assembly {}", env!("CARGO_PKG_VERSION"));

    let root_folder = RootFolderResolver::new()
        .with_cli_arg(args.root_folder.clone())
        .with_config_file(args.config.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = toml_config
        .database_path
        .clone()
        .unwrap_or_else(|| initializer.database_path());
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path).await.context("Failed to open database")?;
    let settings = AssemblySettings::load(&pool).await.context("Failed to load settings")?;
    info!(
        catalogue_key = settings.catalogue_key,
        workers = settings.worker_count,
        batch_size = settings.batch_size,
        "Assembly settings loaded"
    );

    let backend = Backend::sqlite(pool, settings.max_lock_wait_ms);
    let user = User::system();

    if args.rematch {
        let report = Rematcher::new(backend.clone(), settings.catalogue_key)
            .rematch(RematchRequest::all())
            .await
            .context("Rematch failed")?;
        if !report.warnings.is_empty() {
            warn!(warnings = report.warnings.len(), "Rematch left unresolved anchors");
        }
    }

    let coordinator = AssemblyCoordinator::start(backend, settings)
        .await
        .context("Failed to start assembly coordinator")?;

    if args.sync_all {
        let summary = coordinator.sync_all(&user).await.context("Failed to queue sync")?;
        info!(
            queued = summary.queued,
            busy = summary.busy,
            unresolved = summary.unresolved,
            failed = summary.failed,
            "Queued sector syncs"
        );
    }

    signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    coordinator.stop().await;
    let state = coordinator.get_state();
    info!(completed = state.completed, failed = state.failed, "catalogue-assembly stopped");

    Ok(())
}
