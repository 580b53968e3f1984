//! Configuration loading and root folder resolution
//!
//! Every setting follows the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error: a warning is logged and the
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "STRIPEY_ROOT_FOLDER";

/// Environment variable overriding the TOML config file location
pub const CONFIG_FILE_ENV: &str = "STRIPEY_CONFIG";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "stripey.db";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Alignment oracle process and client settings
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Collation run settings
    #[serde(default)]
    pub collate: CollateConfig,

    /// Character matrix export settings
    #[serde(default)]
    pub export: ExportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// Alignment oracle (CollateX HTTP service) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Local port the service listens on
    #[serde(default = "default_oracle_port")]
    pub port: u16,

    /// Path to the CollateX tools jar
    #[serde(default = "default_jar_path")]
    pub jar_path: PathBuf,

    /// Java launcher
    #[serde(default = "default_java")]
    pub java: String,

    /// Hard timeout for a single alignment request
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,

    /// Time allowed for the JVM to come up before it is checked
    #[serde(default = "default_startup_grace_secs")]
    pub startup_grace_secs: u64,

    /// Parallel collations the service accepts (defaults to twice the worker count)
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Levenshtein token comparator distance, 0 for exact token matching
    #[serde(default = "default_fuzzy_edit_distance")]
    pub fuzzy_edit_distance: u32,

    /// Consecutive query failures tolerated before the service is restarted
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            port: default_oracle_port(),
            jar_path: default_jar_path(),
            java: default_java(),
            timeout_secs: default_oracle_timeout_secs(),
            startup_grace_secs: default_startup_grace_secs(),
            max_parallel: None,
            fuzzy_edit_distance: default_fuzzy_edit_distance(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

/// Collation run settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateConfig {
    /// Parallel verse workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on retrying a locked database write
    #[serde(default = "default_db_max_lock_wait_ms")]
    pub db_max_lock_wait_ms: u64,
}

impl Default for CollateConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            db_max_lock_wait_ms: default_db_max_lock_wait_ms(),
        }
    }
}

/// Character matrix export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Symbol alphabet: "letters" or "digits"
    #[serde(default = "default_alphabet")]
    pub alphabet: String,

    /// Drop witnesses attested in less than this fraction of the best witness's units
    #[serde(default)]
    pub fragmentary_threshold: f64,

    /// Regex patterns on witness reference; matching witnesses are excluded
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            alphabet: default_alphabet(),
            fragmentary_threshold: 0.0,
            exclude: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_oracle_port() -> u16 {
    7369
}

fn default_jar_path() -> PathBuf {
    PathBuf::from("collatex-tools-1.7.1.jar")
}

fn default_java() -> String {
    "java".to_string()
}

fn default_oracle_timeout_secs() -> u64 {
    900
}

fn default_startup_grace_secs() -> u64 {
    5
}

fn default_fuzzy_edit_distance() -> u32 {
    3
}

fn default_max_consecutive_errors() -> u32 {
    20
}

fn default_workers() -> usize {
    3
}

fn default_db_max_lock_wait_ms() -> u64 {
    5000
}

fn default_alphabet() -> String {
    "letters".to_string()
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/stripey (or /var/lib/stripey for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("stripey"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/stripey"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("stripey"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/stripey"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("stripey"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\stripey"))
        } else {
            PathBuf::from("./stripey_data")
        };

        Self {
            root_folder,
            log_level: default_log_level(),
        }
    }
}

/// Root folder resolution (CLI → ENV → TOML → compiled default)
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Command-line override
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Root folder from a loaded TOML config
    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(module = %self.module_name, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            debug!(module = %self.module_name, "Root folder from TOML config");
            return path.clone();
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and derives paths inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Find the TOML config file (CLI → ENV → user config dir → /etc)
pub fn locate_config_file(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if let Some(path) = user_config_path() {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/stripey/stripey.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Per-user config file location, whether or not it exists
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("stripey").join("stripey.toml"))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Load configuration with graceful degradation
///
/// An explicitly requested file that cannot be parsed is an error. A file
/// that does not exist falls back to defaults with a warning.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match locate_config_file(cli_arg) {
        Some(path) if path.exists() => {
            let config = load_toml_config(&path)?;
            info!("Loaded config: {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!("Config file {} not found, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Write a config file atomically, creating its folder
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write the default configuration to `path`
///
/// An existing file is left alone unless `overwrite` is set; returns whether
/// anything was written.
pub fn write_starter_config(path: &Path, overwrite: bool) -> Result<bool> {
    if path.exists() && !overwrite {
        warn!("Config file {} already exists, not overwriting", path.display());
        return Ok(false);
    }
    write_toml_config(&TomlConfig::default(), path)?;
    info!("Wrote starter config: {}", path.display());
    Ok(true)
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", logging.level, e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Tracing already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert!(config.root_folder.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.oracle.port, 7369);
        assert_eq!(config.oracle.timeout_secs, 900);
        assert_eq!(config.oracle.fuzzy_edit_distance, 3);
        assert_eq!(config.oracle.max_consecutive_errors, 20);
        assert_eq!(config.collate.workers, 3);
        assert_eq!(config.export.alphabet, "letters");
        assert!(config.export.exclude.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [oracle]
            port = 8000

            [collate]
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.oracle.port, 8000);
        assert_eq!(config.oracle.jar_path, PathBuf::from("collatex-tools-1.7.1.jar"));
        assert_eq!(config.collate.workers, 8);
        assert_eq!(config.collate.db_max_lock_wait_ms, 5000);
    }

    #[test]
    fn test_database_path_inside_root() {
        let init = RootFolderInitializer::new(PathBuf::from("/tmp/stripey-root"));
        assert_eq!(init.database_path(), PathBuf::from("/tmp/stripey-root/stripey.db"));
    }

    #[test]
    fn test_cli_arg_wins_over_toml() {
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolver = RootFolderResolver::new("test")
            .with_toml(&config)
            .with_cli_arg(Some(PathBuf::from("/from/cli")));
        assert_eq!(resolver.resolve(), PathBuf::from("/from/cli"));
    }
}
