//! Application configuration (`inquest.json`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inquest_pipeline::LoaderSettings;
use inquest_storage::StorageConfig;

pub const DEFAULT_CONFIG_FILE: &str = "inquest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory the game writes combat logs into (watch root)
    pub arcdps_path: PathBuf,
    pub upload_to_dps_report: bool,
    pub analyze_automatically: bool,
    /// Show raw folder names instead of encounter names
    pub show_folder_names: bool,
    /// dps.report user token; empty until the service issues one
    pub user_token: String,
    /// Local state root (partitions, analyzer output and settings)
    pub storage_dir: PathBuf,
    /// External analysis executable
    pub analyzer_executable: Option<PathBuf>,
    pub anonymous: bool,
    pub settle_delay_ms: u64,
    pub worker_threads: usize,
    pub queue_capacity: usize,
    /// True when no config file existed at load time
    #[serde(skip)]
    pub first_start: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let arcdps_path = dirs::document_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Guild Wars 2")
            .join("addons")
            .join("arcdps")
            .join("arcdps.cbtlogs");
        Self {
            arcdps_path,
            upload_to_dps_report: true,
            analyze_automatically: false,
            show_folder_names: false,
            user_token: String::new(),
            storage_dir: StorageConfig::default().root,
            analyzer_executable: None,
            anonymous: false,
            settle_delay_ms: 1000,
            worker_threads: 4,
            queue_capacity: 64,
            first_start: false,
        }
    }
}

impl AppConfig {
    /// Loads `path`; a missing file yields defaults with `first_start` set.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                first_start: true,
                ..Self::default()
            });
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Writes the config as pretty JSON, replacing the file atomically.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig::new(&self.storage_dir)
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            upload: self.upload_to_dps_report,
            analyze: self.analyze_automatically && self.analyzer_executable.is_some(),
            anonymous: self.anonymous,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn user_token(&self) -> Option<String> {
        Some(self.user_token.clone()).filter(|t| !t.is_empty())
    }
}
