//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides the root folder
pub const ROOT_FOLDER_ENV: &str = "MPS_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "mps.db";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Root folder resolution in priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file value
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/mps (or /var/lib/mps for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("mps"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/mps"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("mps"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mps"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("mps"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mps"))
    } else {
        PathBuf::from("./mps_data")
    }
}

/// Default TOML config path for a module: `~/.config/mps/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mps").join(format!("{}.toml", module_name)))
}

/// Load a TOML config file, falling back to `T::default()` when the file is absent
///
/// A present but unparsable file is an error.
pub fn load_toml_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        tracing::info!("Config file {} not found, using built-in defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Root folder layout helper
///
/// Creates the folder on demand and hands out the well-known paths inside it.
#[derive(Debug, Clone)]
pub struct RootFolder {
    root: PathBuf,
}

impl RootFolder {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the root folder if missing
    pub fn ensure_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// SQLite database location
    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    /// Subdirectory under the root, created on demand
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
