//! Tests for configuration loading and graceful degradation
//!
//! Uses serial_test to prevent environment variable races: tests that
//! manipulate STRIPEY_ROOT_FOLDER or STRIPEY_CONFIG are marked #[serial].

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use stripey_common::config::{
    load_config, write_starter_config, write_toml_config, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
    TomlConfig, CONFIG_FILE_ENV, ROOT_FOLDER_ENV,
};
use tempfile::TempDir;

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);

    let resolver = RootFolderResolver::new("test-module");
    let root_folder = resolver.resolve();

    assert_eq!(root_folder, CompiledDefaults::for_current_platform().root_folder);
}

#[test]
#[serial]
fn test_resolver_env_var_beats_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/tmp/stripey-env-folder");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/stripey-toml-folder")),
        ..Default::default()
    };
    let root_folder = RootFolderResolver::new("test-module").with_toml(&config).resolve();

    assert_eq!(root_folder, PathBuf::from("/tmp/stripey-env-folder"));

    env::remove_var(ROOT_FOLDER_ENV);
}

#[test]
#[serial]
fn test_resolver_toml_used_without_env() {
    env::remove_var(ROOT_FOLDER_ENV);

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/tmp/stripey-toml-folder")),
        ..Default::default()
    };
    let root_folder = RootFolderResolver::new("test-module").with_toml(&config).resolve();

    assert_eq!(root_folder, PathBuf::from("/tmp/stripey-toml-folder"));
}

#[test]
fn test_initializer_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("a").join("b");

    let initializer = RootFolderInitializer::new(root.clone());
    initializer.ensure_directory_exists().unwrap();

    assert!(root.is_dir());
    assert_eq!(initializer.database_path(), root.join("stripey.db"));
}

#[test]
#[serial]
fn test_missing_config_file_falls_back_to_defaults() {
    env::remove_var(CONFIG_FILE_ENV);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    let config = load_config(Some(&missing)).unwrap();

    assert_eq!(config.oracle.port, 7369);
    assert_eq!(config.collate.workers, 3);
}

#[test]
#[serial]
fn test_config_file_from_env_var() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stripey.toml");
    std::fs::write(&path, "[oracle]\nport = 9000\n[export]\nalphabet = \"digits\"\n").unwrap();
    env::set_var(CONFIG_FILE_ENV, &path);

    let config = load_config(None).unwrap();

    assert_eq!(config.oracle.port, 9000);
    assert_eq!(config.export.alphabet, "digits");

    env::remove_var(CONFIG_FILE_ENV);
}

#[test]
#[serial]
fn test_malformed_config_is_an_error() {
    env::remove_var(CONFIG_FILE_ENV);
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stripey.toml");
    std::fs::write(&path, "[oracle\nport = ").unwrap();

    assert!(load_config(Some(&path)).is_err());
}

#[test]
fn test_written_config_reads_back() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("conf").join("stripey.toml");

    let mut config = TomlConfig::default();
    config.collate.workers = 6;
    config.export.exclude = vec!["^lect".to_string()];
    write_toml_config(&config, &path).unwrap();

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.collate.workers, 6);
    assert_eq!(loaded.export.exclude, vec!["^lect".to_string()]);
}

#[test]
fn test_starter_config_written_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stripey").join("stripey.toml");

    assert!(write_starter_config(&path, false).unwrap());
    let defaults = TomlConfig::default();
    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded.collate.workers, defaults.collate.workers);
    assert_eq!(loaded.oracle.port, defaults.oracle.port);

    // An edited file survives a second run
    let mut edited = defaults.clone();
    edited.collate.workers = 5;
    write_toml_config(&edited, &path).unwrap();
    assert!(!write_starter_config(&path, false).unwrap());
    assert_eq!(load_config(Some(&path)).unwrap().collate.workers, 5);

    assert!(write_starter_config(&path, true).unwrap());
    assert_eq!(load_config(Some(&path)).unwrap().collate.workers, defaults.collate.workers);
}
