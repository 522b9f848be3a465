//! Inquest storage layer
//!
//! Durable, typed persistence for upload responses, analysis output and the
//! per-log processing state:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         INQUEST STORAGE                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌───────────┐     ┌───────────────┐     ┌──────────────────┐       │
//! │  │  Loader   │────►│               │────►│  inquest.pers/   │       │
//! │  │ (upload)  │     │  Persistence  │     │  (sled, general) │       │
//! │  └───────────┘     │               │     └──────────────────┘       │
//! │                    │  Cache<DpsLog>│                                │
//! │  ┌───────────┐     │  Cache<Json>  │     ┌──────────────────┐       │
//! │  │ Analyzer  │────►│               │────►│  gw2ei.pers/     │       │
//! │  │ (parse)   │     │               │     │  (sled, analysis)│       │
//! │  └───────────┘     └───────────────┘     └──────────────────┘       │
//! │                            │                                        │
//! │                            ▼                                        │
//! │                     ┌─────────────┐                                 │
//! │                     │   Session   │                                 │
//! │                     └─────────────┘                                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **Typed**: every stored shape is bound to a codec at compile time
//! - **Exclusive**: a partition directory can be opened by one handle only
//! - **Cached**: read-through document caches with one load per key
//! - **Monotonic**: log states only ever gain knowledge

pub mod cache;
pub mod codec;
pub mod error;
pub mod persistence;
pub mod store;


use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use cache::Cache;
pub use codec::{Bincode, Codec, Json, Raw, Storable, StoreKey, Utf8};
pub use error::{StoreError, StoreResult};
pub use persistence::{Persistence, BOSS_TO_NAME_KEY, FOLDER_TO_BOSS_KEY, STORED_LOGS_KEY};
pub use store::{KeyValueStore, Partition, TypedStore};

// ============================================================================
// Configuration
// ============================================================================

pub const GENERAL_PARTITION: &str = "inquest.pers";
pub const ANALYSIS_PARTITION: &str = "gw2ei.pers";
pub const ANALYZER_CACHE_DIR: &str = "analyzer_cache";
pub const ANALYZER_SETTINGS_DIR: &str = "gw2ei/Settings";

/// Where the uploader keeps its state. Everything lives under one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root, `~/.inquest` by default
    pub root: PathBuf,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn general_dir(&self) -> PathBuf {
        self.root.join(GENERAL_PARTITION)
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.root.join(ANALYSIS_PARTITION)
    }

    /// Directory the analyzer writes its JSON output into.
    pub fn analyzer_output_dir(&self) -> PathBuf {
        self.root.join(ANALYZER_CACHE_DIR)
    }

    /// Directory holding the per-encounter analyzer settings files.
    pub fn analyzer_settings_dir(&self) -> PathBuf {
        self.root.join(ANALYZER_SETTINGS_DIR)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".inquest");
        Self { root }
    }
}
