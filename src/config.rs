// YAML configuration for the task list

use crate::storage::Backend;
use crate::store::{DEFAULT_REMOVAL_DELAY, StoreOptions};
use crate::theme::Theme;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_DIR: &str = "tasklist";
const CONFIG_FILE: &str = "tasklist.yaml";

/// Settings read from `tasklist.yaml`; every field is optional
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage backend for tasks and theme
    pub backend: Backend,
    /// Directory holding the `.tasklist` store (default: user data dir)
    pub store_path: Option<PathBuf>,
    /// Remember the filter between runs
    pub persist_filter: bool,
    /// Theme used when none has been stored yet
    pub default_theme: Theme,
    /// Delay before a deferred removal is committed
    pub removal_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            store_path: None,
            persist_filter: false,
            default_theme: Theme::default(),
            removal_delay_ms: DEFAULT_REMOVAL_DELAY.as_millis() as u64,
        }
    }
}

impl Config {
    /// Load from `path`; a missing file means defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = ?path, "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// `<config dir>/tasklist/tasklist.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Where the store lives: configured path, else `<data dir>/tasklist`, else `.`
    pub fn resolved_store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            persist_filter: self.persist_filter,
            removal_delay: Duration::from_millis(self.removal_delay_ms),
        }
    }
}
