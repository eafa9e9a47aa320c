//! Configuration loading and root folder resolution
//!
//! Resolution priority for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup; it is logged and
//! the compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ENV_ROOT_FOLDER: &str = "MUXBOT_ROOT_FOLDER";
/// Legacy short alias for [`ENV_ROOT_FOLDER`]
pub const ENV_ROOT: &str = "MUXBOT_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "muxbot.db";

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Remote spreadsheet relay section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SheetConfig {
    /// Webhook URL fronting the spreadsheet
    pub webhook_url: Option<String>,
    /// Bearer token the relay attaches as Authorization header
    pub relay_token: Option<String>,
}

/// Record store (CRM table) section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordsConfig {
    /// API root, e.g. `https://api.airtable.com`
    pub api_url: Option<String>,
    pub base_id: Option<String>,
    pub table_id: Option<String>,
    pub token: Option<String>,
    /// Field holding the event identifiers
    pub id_field: Option<String>,
}

/// Per-module TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    /// HTTP status port
    pub port: Option<u16>,
    /// Sampling interval in milliseconds
    pub poll_interval_ms: Option<u64>,
    pub sheet: SheetConfig,
    pub records: RecordsConfig,
}

/// Compiled-in defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub records_api_url: String,
    pub records_id_field: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            port: 5741,
            poll_interval_ms: 1000,
            records_api_url: "https://api.airtable.com".to_string(),
            records_id_field: "Live | Edit ID/Stream ID".to_string(),
        }
    }
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/muxbot
        dirs::data_local_dir()
            .map(|d| d.join("muxbot"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/muxbot"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("muxbot"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/muxbot"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("muxbot"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\muxbot"))
    } else {
        PathBuf::from("./muxbot_data")
    }
}

/// Tracing filter directive from the `[logging]` section
///
/// A blank level falls back to the compiled default.
pub fn log_filter(config: &TomlConfig) -> String {
    let level = config.logging.level.trim();
    if level.is_empty() {
        CompiledDefaults::for_current_platform().log_level
    } else {
        level.to_string()
    }
}

/// Default TOML path for a module: `<config_dir>/muxbot/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("muxbot").join(format!("{}.toml", module_name)))
}

/// Read and parse a TOML config file
pub fn load_toml_config_from(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Load module TOML config with graceful degradation
///
/// An explicit path that fails to load is still only a warning; the caller
/// continues with defaults.
pub fn load_toml_config(module_name: &str, explicit: Option<&Path>) -> TomlConfig {
    let path = match explicit.map(Path::to_path_buf).or_else(|| default_config_path(module_name)) {
        Some(path) => path,
        None => {
            warn!("Could not determine config directory; using compiled defaults");
            return TomlConfig::default();
        }
    };

    if !path.exists() {
        info!("No config file at {}; using defaults", path.display());
        return TomlConfig::default();
    }

    match load_toml_config_from(&path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("{}; using defaults", e);
            TomlConfig::default()
        }
    }
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Resolves the root folder following the priority order above
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Set the command-line override
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Set the value read from the TOML file
    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        for var in [ENV_ROOT_FOLDER, ENV_ROOT] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            return path.clone();
        }

        let default = CompiledDefaults::for_current_platform().root_folder;
        info!(
            module = %self.module_name,
            "Using default root folder {}",
            default.display()
        );
        default
    }
}

/// Creates the root folder on first run and locates files inside it
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

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Resolve an optional string setting: CLI → ENV → TOML
///
/// Empty or whitespace-only values at any tier are ignored.
pub fn resolve_setting(
    cli: Option<&str>,
    env_var_name: &str,
    toml_value: Option<&str>,
) -> Option<String> {
    let valid = |s: &str| !s.trim().is_empty();

    if let Some(v) = cli.filter(|v| valid(v)) {
        return Some(v.to_string());
    }
    if let Ok(v) = std::env::var(env_var_name) {
        if valid(&v) {
            return Some(v);
        }
    }
    toml_value.filter(|v| valid(v)).map(str::to_string)
}
