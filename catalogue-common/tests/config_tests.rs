//! Tests for bootstrap configuration and root folder resolution
//!
//! Tests that manipulate CATALOGUE_ROOT_FOLDER are marked with #[serial]
//! so they never race on the process environment.

use catalogue_common::config::{
    default_root_folder, load_toml_config, write_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver, TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/catalogue-from-env");

    let root = RootFolderResolver::new()
        .with_cli_arg(Some(PathBuf::from("/tmp/catalogue-from-cli")))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/catalogue-from-cli"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_env_var_beats_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/catalogue-from-toml")),
        ..Default::default()
    };
    write_toml_config(&config, &config_path).unwrap();

    env::set_var(ROOT_FOLDER_ENV, "/tmp/catalogue-from-env");
    let root = RootFolderResolver::new()
        .with_config_file(Some(config_path))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/catalogue-from-env"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_config_file_used_without_env() {
    env::remove_var(ROOT_FOLDER_ENV);

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/catalogue-from-toml")),
        ..Default::default()
    };
    write_toml_config(&config, &config_path).unwrap();

    let root = RootFolderResolver::new()
        .with_config_file(Some(config_path))
        .resolve();
    assert_eq!(root, PathBuf::from("/tmp/catalogue-from-toml"));
}

#[test]
#[serial]
fn test_broken_config_file_falls_back_to_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    std::fs::write(&config_path, "root_folder = [not toml").unwrap();

    let root = RootFolderResolver::new()
        .with_config_file(Some(config_path))
        .resolve();
    assert_eq!(root, default_root_folder());
}

#[test]
fn test_toml_roundtrip_preserves_logging() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("catalogue.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/data/catalogue")),
        database_path: Some(PathBuf::from("/data/catalogue/other.db")),
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
    };
    write_toml_config(&config, &path).unwrap();

    assert!(!path.with_extension("toml.tmp").exists());
    assert_eq!(load_toml_config(&path).unwrap(), config);
}

#[test]
fn test_missing_logging_section_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("catalogue.toml");
    std::fs::write(&path, "root_folder = \"/srv/catalogue\"\n").unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.logging.level, "info");
    assert!(config.database_path.is_none());
}

#[test]
fn test_initializer_paths_and_directory_creation() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("root");
    let initializer = RootFolderInitializer::new(root.clone());

    assert_eq!(initializer.database_path(), root.join("catalogue.db"));
    assert!(!initializer.database_exists());

    initializer.ensure_directory_exists().unwrap();
    initializer.ensure_directory_exists().unwrap();
    assert!(root.is_dir());
}
