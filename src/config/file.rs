//! TOML configuration file loading
//!
//! Supports `~/.config/panelbus/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::panel::PanelConfig;
use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct PanelbusConfigFile {
    /// Bus and path layout settings
    #[serde(default)]
    pub bus: BusFileConfig,

    /// Panels the CLI publishes
    #[serde(default)]
    pub panels: Vec<PanelConfig>,
}

/// Bus and path layout configuration
#[derive(Debug, Default, Deserialize)]
pub struct BusFileConfig {
    /// Object path prefix (e.g. "/ControlPanel")
    pub prefix: Option<String>,

    /// Unit name, the segment right below the prefix
    pub unit: Option<String>,

    /// Published languages in language index order
    pub languages: Option<Vec<String>>,

    /// Timeout for each remote call, in milliseconds
    pub call_timeout_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PanelbusConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> PanelbusConfigFile {
    let Some(path) = config_file_path() else {
        return PanelbusConfigFile::default();
    };

    if !path.exists() {
        return PanelbusConfigFile::default();
    }

    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            PanelbusConfigFile::default()
        }
    }
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_from(path: &Path) -> Result<PanelbusConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/panelbus/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("panelbus").join("config.toml"))
}
