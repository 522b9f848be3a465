//! Parsed log documents.
//!
//! [`DpsLog`] is the report returned by dps.report after an upload,
//! [`JsonLog`] the document written by the local Elite Insights analysis.
//! Both are immutable once created; a newer upload or analysis supersedes the
//! previous document instead of editing it. Only the fields the uploader reads
//! are modelled, unknown fields are ignored on decode.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::state::TriggerId;

// ============================================================================
// dps.report
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DpsLog {
    pub id: Option<String>,
    pub permalink: Option<String>,
    /// Seconds since the unix epoch.
    pub upload_time: Option<i64>,
    /// Seconds since the unix epoch.
    pub encounter_time: Option<i64>,
    pub generator: Option<String>,
    pub generator_id: Option<i32>,
    pub generator_version: Option<i32>,
    pub language: Option<String>,
    pub language_id: Option<i32>,
    pub user_token: Option<String>,
    pub error: Option<String>,
    pub encounter: Encounter,
    pub evtc: Evtc,
    pub players: BTreeMap<String, Player>,
    pub report: Report,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Encounter {
    pub unique_id: Option<String>,
    pub success: bool,
    pub duration: f64,
    pub comp_dps: i64,
    pub number_of_players: i32,
    pub number_of_groups: i32,
    pub boss_id: Option<TriggerId>,
    pub boss: Option<String>,
    pub is_cm: bool,
    pub gw2_build: Option<i64>,
    pub json_available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Evtc {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub version: Option<String>,
    pub boss_id: Option<TriggerId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Player {
    pub display_name: Option<String>,
    pub character_name: Option<String>,
    pub profession: Option<i32>,
    pub elite_spec: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    pub anonymous: bool,
    pub detailed: bool,
}

impl DpsLog {
    /// Trigger id and encounter name, when the report identified the boss.
    pub fn encounter_meta(&self) -> Option<(TriggerId, &str)> {
        Some((self.encounter.boss_id?, self.encounter.boss.as_deref()?))
    }
}

// ============================================================================
// Elite Insights
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonLog {
    pub elite_insights_version: Option<String>,
    #[serde(rename = "triggerID")]
    pub trigger_id: Option<TriggerId>,
    #[serde(rename = "eiEncounterID")]
    pub ei_encounter_id: Option<i64>,
    pub fight_name: Option<String>,
    pub fight_icon: Option<String>,
    pub arc_version: Option<String>,
    #[serde(rename = "gW2Build")]
    pub gw2_build: Option<i64>,
    pub language: Option<String>,
    pub fractal_scale: Option<i32>,
    pub recorded_by: Option<String>,
    pub recorded_account_by: Option<String>,
    pub time_start: Option<String>,
    pub time_end: Option<String>,
    pub time_start_std: Option<String>,
    pub time_end_std: Option<String>,
    pub duration: Option<String>,
    #[serde(rename = "durationMS")]
    pub duration_ms: Option<i64>,
    pub success: bool,
    #[serde(rename = "isCM")]
    pub is_cm: bool,
    pub anonymous: Option<bool>,
    pub targets: Vec<JsonNpc>,
    pub players: Vec<JsonPlayer>,
    pub upload_links: Vec<String>,
    pub log_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonNpc {
    pub name: Option<String>,
    pub id: Option<i64>,
    pub total_health: Option<i64>,
    pub final_health: Option<i64>,
    pub health_percent_burned: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JsonPlayer {
    pub name: Option<String>,
    pub account: Option<String>,
    pub profession: Option<String>,
    pub group: Option<i32>,
    pub has_commander_tag: bool,
}

impl JsonLog {
    /// Trigger id (`-1` when absent) and fight name.
    pub fn encounter_meta(&self) -> (TriggerId, Option<&str>) {
        (self.trigger_id.unwrap_or(-1), self.fight_name.as_deref())
    }
}

// ============================================================================
// Combined view
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Dps,
    Json,
    Both,
}

/// The most complete view of one logical log known to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LogDocument {
    Dps(Arc<DpsLog>),
    Json(Arc<JsonLog>),
    Both { dps: Arc<DpsLog>, json: Arc<JsonLog> },
}

impl LogDocument {
    pub fn kind(&self) -> DocumentKind {
        match self {
            LogDocument::Dps(_) => DocumentKind::Dps,
            LogDocument::Json(_) => DocumentKind::Json,
            LogDocument::Both { .. } => DocumentKind::Both,
        }
    }

    pub fn dps(&self) -> Option<&Arc<DpsLog>> {
        match self {
            LogDocument::Dps(dps) | LogDocument::Both { dps, .. } => Some(dps),
            LogDocument::Json(_) => None,
        }
    }

    pub fn json(&self) -> Option<&Arc<JsonLog>> {
        match self {
            LogDocument::Json(json) | LogDocument::Both { json, .. } => Some(json),
            LogDocument::Dps(_) => None,
        }
    }

    /// Folds a newly observed document into this one.
    ///
    /// Same kind: the newer document wins. Complementary kinds combine into
    /// `Both`. A half arriving for an existing `Both` replaces that half.
    pub fn merge(self, newer: LogDocument) -> LogDocument {
        match (self, newer) {
            (LogDocument::Dps(dps), LogDocument::Json(json))
            | (LogDocument::Json(json), LogDocument::Dps(dps)) => LogDocument::Both { dps, json },
            (LogDocument::Both { json, .. }, LogDocument::Dps(dps)) => {
                LogDocument::Both { dps, json }
            }
            (LogDocument::Both { dps, .. }, LogDocument::Json(json)) => {
                LogDocument::Both { dps, json }
            }
            (_, newer) => newer,
        }
    }
}

impl From<DpsLog> for LogDocument {
    fn from(log: DpsLog) -> Self {
        LogDocument::Dps(Arc::new(log))
    }
}

impl From<JsonLog> for LogDocument {
    fn from(log: JsonLog) -> Self {
        LogDocument::Json(Arc::new(log))
    }
}

impl From<Arc<DpsLog>> for LogDocument {
    fn from(log: Arc<DpsLog>) -> Self {
        LogDocument::Dps(log)
    }
}

impl From<Arc<JsonLog>> for LogDocument {
    fn from(log: Arc<JsonLog>) -> Self {
        LogDocument::Json(log)
    }
}
