//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging section of a service TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing directive (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[orchestrator]` section: every key is optional, unset keys fall through
/// to environment variables or compiled defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorToml {
    pub phase2_concurrency: Option<usize>,
    pub unit_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub unit_max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub worker_poll_interval_ms: Option<u64>,
    pub collaborator_url: Option<String>,
    pub collaborator_api_key: Option<String>,
    pub collaborator_requests_per_minute: Option<u32>,
    pub submissions_per_minute: Option<u32>,
    pub event_bus_capacity: Option<usize>,
    pub db_max_lock_wait_ms: Option<u64>,
    pub listen_port: Option<u16>,
}

/// Service TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the service database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorToml,
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_config: Option<&TomlConfig>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(root_folder) = toml_config.and_then(|c| c.root_folder.clone()) {
        return root_folder;
    }

    get_default_root_folder()
}

/// Default TOML path for a module: `<config_dir>/epa/<module>.toml`
pub fn default_config_path(module_name: &str) -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("epa").join(format!("{}.toml", module_name)))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/epa (or /var/lib/epa for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("epa"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/epa"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("epa"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/epa"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("epa"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\epa"))
    } else {
        PathBuf::from("./epa_data")
    }
}

/// Load a TOML config file; a missing file yields defaults
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    tracing::debug!("Wrote TOML config: {}", path.display());
    Ok(())
}
