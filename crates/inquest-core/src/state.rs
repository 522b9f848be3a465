//! Log lifecycle state and the aggregate maps persisted alongside it.

use crate::identity::LogIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Encounter trigger id as reported by arcdps / Elite Insights. `-1` marks an
/// encounter whose trigger is unknown.
pub type TriggerId = i64;

// ============================================================================
// LogState
// ============================================================================

/// Lifecycle of one logical log. Information only ever accumulates:
/// `Idle` → `Uploaded` | `Analyzed` → `UploadedAndAnalyzed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogState {
    #[default]
    Idle,
    Uploaded,
    Analyzed,
    UploadedAndAnalyzed,
}

impl LogState {
    pub const ALL: [LogState; 4] = [
        LogState::Idle,
        LogState::Uploaded,
        LogState::Analyzed,
        LogState::UploadedAndAnalyzed,
    ];

    /// Merges an observed `event` into the current state.
    ///
    /// `Idle` adopts the event, two distinct non-idle states combine into
    /// `UploadedAndAnalyzed`, and everything else is a no-op. An `Idle` event
    /// never downgrades.
    pub fn update_with(self, event: LogState) -> LogState {
        if self == LogState::Idle {
            event
        } else if event != LogState::Idle && event != self {
            LogState::UploadedAndAnalyzed
        } else {
            self
        }
    }

    pub fn is_uploaded(self) -> bool {
        matches!(self, LogState::Uploaded | LogState::UploadedAndAnalyzed)
    }

    pub fn is_analyzed(self) -> bool {
        matches!(self, LogState::Analyzed | LogState::UploadedAndAnalyzed)
    }
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogState::Idle => "idle",
            LogState::Uploaded => "uploaded",
            LogState::Analyzed => "analyzed",
            LogState::UploadedAndAnalyzed => "uploaded+analyzed",
        };
        f.write_str(label)
    }
}

// ============================================================================
// StoredLogs
// ============================================================================

/// Durable lifecycle state of every log the application has touched.
///
/// Loaded and saved as one unit; callers serialize read-modify-write cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLogs {
    logs: BTreeMap<LogIdentity, LogState>,
}

impl StoredLogs {
    /// State of `identity`, `Idle` when it was never recorded.
    pub fn state(&self, identity: &LogIdentity) -> LogState {
        self.logs.get(identity).copied().unwrap_or_default()
    }

    pub fn contains(&self, identity: &LogIdentity) -> bool {
        self.logs.contains_key(identity)
    }

    /// Applies `event` to the recorded state and returns the merged result.
    pub fn record(&mut self, identity: LogIdentity, event: LogState) -> LogState {
        let entry = self.logs.entry(identity).or_insert(LogState::Idle);
        *entry = entry.update_with(event);
        *entry
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogIdentity, LogState)> {
        self.logs.iter().map(|(id, state)| (id, *state))
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

// ============================================================================
// Encounter metadata
// ============================================================================

/// Raw encounter folder name → trigger id. First writer wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderToBoss {
    folders: BTreeMap<String, TriggerId>,
}

impl FolderToBoss {
    pub fn get(&self, folder: &str) -> Option<TriggerId> {
        self.folders.get(folder).copied()
    }

    pub fn contains(&self, folder: &str) -> bool {
        self.folders.contains_key(folder)
    }

    /// Records `folder` unless it is already known. Returns whether it was added.
    pub fn insert_if_absent(&mut self, folder: impl Into<String>, trigger: TriggerId) -> bool {
        let folder = folder.into();
        if self.folders.contains_key(&folder) {
            return false;
        }
        self.folders.insert(folder, trigger);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TriggerId)> {
        self.folders.iter().map(|(folder, id)| (folder.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

/// Trigger id → human readable encounter name. First writer wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossToName {
    names: BTreeMap<TriggerId, String>,
}

impl BossToName {
    pub fn get(&self, trigger: TriggerId) -> Option<&str> {
        self.names.get(&trigger).map(String::as_str)
    }

    pub fn contains(&self, trigger: TriggerId) -> bool {
        self.names.contains_key(&trigger)
    }

    pub fn insert_if_absent(&mut self, trigger: TriggerId, name: impl Into<String>) -> bool {
        if self.names.contains_key(&trigger) {
            return false;
        }
        self.names.insert(trigger, name.into());
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (TriggerId, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Display name for an encounter folder: the known encounter name without a
/// trailing " CM", or the folder name itself.
pub fn encounter_name(
    folder: &str,
    folder_to_boss: &FolderToBoss,
    boss_to_name: &BossToName,
    show_folder_names: bool,
) -> String {
    if show_folder_names {
        return folder.to_string();
    }
    folder_to_boss
        .get(folder)
        .and_then(|trigger| boss_to_name.get(trigger))
        .map(|name| name.strip_suffix(" CM").unwrap_or(name).to_string())
        .unwrap_or_else(|| folder.to_string())
}
