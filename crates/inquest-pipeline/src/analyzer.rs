//! Consumes analysis output documents.
//!
//! The analyzer watches the output directory. Each new JSON document is read
//! once, stored under the identity of the log it was produced from, and then
//! deleted.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use inquest_core::{JsonLog, LogState};
use inquest_storage::Persistence;
use inquest_watch::{FileEvent, FileEventKind, FileHandler};

use crate::error::{AnalysisError, ProcessingError};
use crate::listener::{LogListener, NoopListener};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
const OUTPUT_EXTENSION: &str = "json";

pub struct LogAnalyzer {
    persistence: Arc<Persistence>,
    output_dir: PathBuf,
    settle_delay: Duration,
    visited: Mutex<HashSet<PathBuf>>,
    listener: Arc<dyn LogListener>,
}

impl LogAnalyzer {
    pub fn new(persistence: Arc<Persistence>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            persistence,
            output_dir: output_dir.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            visited: Mutex::new(HashSet::new()),
            listener: Arc::new(NoopListener),
        }
    }

    /// How long to wait after a document appears before reading it.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LogListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Reads, stores and deletes one output document. Returns `None` when the
    /// document was already consumed in this run.
    pub async fn analyse(&self, path: &Path) -> Result<Option<LogState>, ProcessingError> {
        if self.visited.lock().contains(path) {
            return Ok(None);
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| AnalysisError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let log: JsonLog = serde_json::from_slice(&bytes).map_err(|source| AnalysisError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

        if !self.visited.lock().insert(path.to_path_buf()) {
            return Ok(None);
        }

        let (trigger, name) = log.encounter_meta();
        let name = name.map(str::to_string);
        let identity = self.persistence.store_ei_log(path, log)?;
        if self
            .persistence
            .remember_meta(identity.encounter(), trigger, name.as_deref())?
        {
            self.listener.on_new_meta();
        }
        let state = self
            .persistence
            .record_identity_state(identity.clone(), LogState::Analyzed)?;
        tracing::info!(path = %path.display(), identity = %identity, state = %state, "analyzed");
        self.listener.on_new_log(&identity);

        if let Err(err) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %err, "could not delete consumed output");
        }
        Ok(Some(state))
    }

    /// Consumes every document currently in the output directory. Returns how
    /// many were newly analyzed.
    pub async fn trigger_analysis(&self) -> usize {
        tracing::info!(dir = %self.output_dir.display(), "analysis triggered");
        let documents: Vec<PathBuf> = WalkDir::new(&self.output_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && is_output_document(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        let mut analyzed = 0;
        for document in documents {
            match self.analyse(&document).await {
                Ok(Some(_)) => analyzed += 1,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(path = %document.display(), error = %err, "failed to analyze");
                }
            }
        }
        analyzed
    }
}

fn is_output_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(OUTPUT_EXTENSION))
}

#[async_trait]
impl FileHandler for LogAnalyzer {
    async fn on_file(&self, event: FileEvent) {
        if event.kind != FileEventKind::Created || !is_output_document(&event.path) {
            return;
        }
        tracing::info!(path = %event.path.display(), "found new analysis output");
        // The analyzer may still be writing.
        tokio::time::sleep(self.settle_delay).await;
        if let Err(err) = self.analyse(&event.path).await {
            tracing::error!(path = %event.path.display(), error = %err, "failed to analyze");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inquest_core::{DocumentKind, DpsLog, IdentityResolver, Session};
    use inquest_storage::StorageConfig;
    use std::fs;
    use tempfile::TempDir;

    const ROOT: &str = "/games/arcdps.cbtlogs";

    fn setup() -> (LogAnalyzer, Arc<Persistence>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new(dir.path());
        let persistence = Arc::new(
            Persistence::open(&config, IdentityResolver::new(ROOT), Arc::new(Session::new()))
                .unwrap(),
        );
        let analyzer = LogAnalyzer::new(Arc::clone(&persistence), config.analyzer_output_dir())
            .with_settle_delay(Duration::ZERO);
        (analyzer, persistence, dir)
    }

    fn write_output(analyzer: &LogAnalyzer, folder: &str, name: &str, body: &str) -> PathBuf {
        let dir = analyzer.output_dir().join(folder);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    const DOCUMENT: &str = r#"{"triggerID": 15438, "fightName": "Boss A CM", "success": true}"#;

    #[tokio::test]
    async fn output_is_stored_under_native_identity_and_deleted() {
        let (analyzer, persistence, _dir) = setup();
        let output = write_output(&analyzer, "BossA", "20240101-120000_boss_kill.json", DOCUMENT);

        let state = analyzer.analyse(&output).await.unwrap();
        assert_eq!(state, Some(LogState::Analyzed));
        assert!(!output.exists());

        let native = Path::new(ROOT).join("BossA/20240101-120000.zevtc");
        assert_eq!(persistence.log_state(&native).unwrap(), LogState::Analyzed);
        assert_eq!(
            persistence.ei_log(&native).unwrap().fight_name.as_deref(),
            Some("Boss A CM")
        );
        assert_eq!(persistence.folder_to_boss().unwrap().get("BossA"), Some(15438));
        assert_eq!(
            persistence.boss_to_name().unwrap().get(15438),
            Some("Boss A CM")
        );
    }

    #[tokio::test]
    async fn visited_documents_are_skipped() {
        let (analyzer, _persistence, _dir) = setup();
        let output = write_output(&analyzer, "BossA", "1_boss_kill.json", DOCUMENT);

        assert!(analyzer.analyse(&output).await.unwrap().is_some());
        // Same path shows up again (e.g. a rewritten file).
        fs::write(&output, DOCUMENT).unwrap();
        assert_eq!(analyzer.analyse(&output).await.unwrap(), None);
    }

    #[tokio::test]
    async fn undecodable_output_is_an_error_and_kept() {
        let (analyzer, persistence, _dir) = setup();
        let output = write_output(&analyzer, "BossA", "1_boss_kill.json", "{ not json");

        let err = analyzer.analyse(&output).await.unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::Analysis(AnalysisError::Decode { .. })
        ));
        assert!(output.exists());
        assert!(persistence.stored_logs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_trigger_defaults_to_unknown() {
        let (analyzer, persistence, _dir) = setup();
        let output = write_output(&analyzer, "BossB", "1_x.json", r#"{"fightName": "Boss B"}"#);

        analyzer.analyse(&output).await.unwrap();
        assert_eq!(persistence.folder_to_boss().unwrap().get("BossB"), Some(-1));
    }

    #[tokio::test]
    async fn trigger_analysis_consumes_whole_directory() {
        let (analyzer, persistence, _dir) = setup();
        write_output(&analyzer, "BossA", "1_a_kill.json", DOCUMENT);
        write_output(&analyzer, "BossA", "2_a_fail.json", DOCUMENT);
        write_output(&analyzer, "BossB", "3_b_kill.json", DOCUMENT);
        write_output(&analyzer, "BossB", "report.html", "<html/>");

        assert_eq!(analyzer.trigger_analysis().await, 3);
        assert_eq!(persistence.stored_logs().unwrap().len(), 3);
        assert_eq!(analyzer.trigger_analysis().await, 0);
    }

    #[tokio::test]
    async fn upload_and_analysis_merge_in_session() {
        let (analyzer, persistence, _dir) = setup();
        let native = Path::new(ROOT).join("BossA/20240101-120000.zevtc");
        persistence
            .store_dps_report_log(&native, DpsLog::default())
            .unwrap();
        persistence
            .record_state(&native, LogState::Uploaded)
            .unwrap();

        let output = write_output(&analyzer, "BossA", "20240101-120000_boss_kill.json", DOCUMENT);
        analyzer
            .on_file(FileEvent {
                path: output,
                kind: FileEventKind::Created,
            })
            .await;

        assert_eq!(
            persistence.log_state(&native).unwrap(),
            LogState::UploadedAndAnalyzed
        );
        let session = persistence.session().current_logs();
        assert_eq!(session.len(), 1);
        assert_eq!(session[0].kind(), DocumentKind::Both);
    }
}
