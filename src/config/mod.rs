//! Configuration management for panelbus

pub mod file;
pub mod panel;

use std::path::Path;
use std::time::Duration;

pub use panel::{ChoiceConfig, PanelConfig, WidgetConfig, WidgetKind};

use crate::path::DEFAULT_PREFIX;
use crate::{Error, Result};

/// Default timeout for one remote call
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// panelbus configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Object path prefix every panel lives under
    pub prefix: String,

    /// Unit name, the segment right below the prefix
    pub unit: String,

    /// Published languages in language index order
    pub languages: Vec<String>,

    /// Timeout for each remote call and introspection
    pub call_timeout: Duration,

    /// Panels declared in the config file
    pub panels: Vec<PanelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            unit: "Device".to_string(),
            languages: vec!["en".to_string()],
            call_timeout: DEFAULT_CALL_TIMEOUT,
            panels: Vec::new(),
        }
    }
}

/// Split a comma-separated list, dropping empty entries
fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from the standard file and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit file and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or the resulting
    /// configuration is invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let fc = file::load_config_from(path)?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with environment overrides (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns `Config` if no language remains or the timeout is zero
    pub fn resolve(
        fc: file::PanelbusConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let default = Self::default();

        let prefix = env("PANELBUS_PREFIX")
            .or(fc.bus.prefix)
            .unwrap_or(default.prefix);

        let unit = env("PANELBUS_UNIT")
            .or(fc.bus.unit)
            .unwrap_or(default.unit);

        let languages = env("PANELBUS_LANGUAGES")
            .map(|s| split_list(&s))
            .or(fc.bus.languages)
            .unwrap_or(default.languages);
        if languages.is_empty() {
            return Err(Error::Config("at least one language is required".to_string()));
        }

        let call_timeout = fc
            .bus
            .call_timeout_ms
            .map_or(default.call_timeout, Duration::from_millis);
        if call_timeout.is_zero() {
            return Err(Error::Config("call_timeout_ms must be positive".to_string()));
        }

        tracing::debug!(%prefix, %unit, ?languages, panels = fc.panels.len(), "configuration resolved");

        Ok(Self {
            prefix,
            unit,
            languages,
            call_timeout,
            panels: fc.panels,
        })
    }
}
