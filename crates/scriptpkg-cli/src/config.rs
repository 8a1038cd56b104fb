//! Configuration loading and types

use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use scriptpkg_core::ScriptPackage;
use scriptpkg_exec::EngineConfig;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SCRIPTPKG_CONFIG";

/// File looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "scriptpkg.toml";

/// Top-level configuration: engine settings plus one package definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    pub package: ScriptPackage,
}

/// `[engine]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(flatten)]
    pub settings: EngineConfig,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            settings: EngineConfig::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .wrap_err_with(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Path to load: explicit flag, then environment, then working directory
    #[must_use]
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}
