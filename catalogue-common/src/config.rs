//! Bootstrap configuration loading and root folder resolution
//!
//! Configuration is split in two tiers:
//! 1. **TOML bootstrap**: root folder, database path, logging. Read once at startup.
//! 2. **Database runtime**: everything else, stored in the `settings` table and
//!    loaded by the service crates with built-in defaults.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`CATALOGUE_ROOT_FOLDER`)
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable consulted for the root folder
pub const ROOT_FOLDER_ENV: &str = "CATALOGUE_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "catalogue.db";

/// Bootstrap configuration loaded from TOML file
///
/// These settings cannot change during runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Explicit database path, defaults to `<root_folder>/catalogue.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Read and parse a TOML bootstrap file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Write a TOML bootstrap file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Locate the default configuration file for the platform, if one exists
pub fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("catalogue").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/catalogue/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("catalogue"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/catalogue"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("catalogue"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/catalogue"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("catalogue"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\catalogue"))
    } else {
        PathBuf::from("./catalogue_data")
    }
}

/// Resolves the root folder following the documented priority order
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    config_file: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root folder given on the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Explicit TOML file, instead of the platform default location
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Resolve the root folder. Never fails: a missing or broken TOML file
    /// logs a warning and falls through to the compiled default.
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        let config_file = self.config_file.clone().or_else(default_config_file);
        if let Some(config_path) = config_file {
            match load_toml_config(&config_path) {
                Ok(TomlConfig {
                    root_folder: Some(root),
                    ..
                }) => return root,
                Ok(_) => {}
                Err(e) => warn!("Ignoring config file: {}", e),
            }
        }

        default_root_folder()
    }
}

/// Prepares the resolved root folder for use
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
