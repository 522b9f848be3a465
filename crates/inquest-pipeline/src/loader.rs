//! Reacts to new combat logs: upload, then analysis.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

use inquest_core::{is_log_file, LogIdentity, LogState};
use inquest_storage::Persistence;
use inquest_watch::{FileEvent, FileEventKind, FileHandler};

use crate::analysis::LogParser;
use crate::error::ProcessingError;
use crate::listener::{LogListener, NoopListener};
use crate::upload::{LogUploader, UploadOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    pub upload: bool,
    pub analyze: bool,
    pub anonymous: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            upload: true,
            analyze: false,
            anonymous: false,
        }
    }
}

pub struct LogLoader {
    persistence: Arc<Persistence>,
    uploader: Arc<dyn LogUploader>,
    parser: Arc<dyn LogParser>,
    settings: LoaderSettings,
    user_token: RwLock<Option<String>>,
    listener: Arc<dyn LogListener>,
}

impl LogLoader {
    pub fn new(
        persistence: Arc<Persistence>,
        uploader: Arc<dyn LogUploader>,
        parser: Arc<dyn LogParser>,
        settings: LoaderSettings,
    ) -> Self {
        Self {
            persistence,
            uploader,
            parser,
            settings,
            user_token: RwLock::new(None),
            listener: Arc::new(NoopListener),
        }
    }

    pub fn with_user_token(self, token: Option<String>) -> Self {
        *self.user_token.write() = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn LogListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn user_token(&self) -> Option<String> {
        self.user_token.read().clone()
    }

    /// Uploads and/or analyzes the log at `path`, as configured.
    ///
    /// Both steps are attempted even if the first fails; the first failure
    /// is returned. Nothing is retried.
    pub async fn process(&self, path: &Path) -> Result<(), ProcessingError> {
        tracing::info!(path = %path.display(), "found new log");

        let uploaded = if self.settings.upload {
            self.upload(path).await.map(|_| ())
        } else {
            Ok(())
        };
        if let Err(err) = &uploaded {
            tracing::error!(path = %path.display(), error = %err, "upload failed");
        }

        let analyzed = if self.settings.analyze {
            self.parser.parse(path).await.map_err(ProcessingError::from)
        } else {
            Ok(())
        };
        if let Err(err) = &analyzed {
            tracing::error!(path = %path.display(), error = %err, "analysis failed");
        }

        uploaded.and(analyzed)
    }

    /// Uploads one log and records the outcome. State is only touched once
    /// the upload succeeded.
    pub async fn upload(&self, path: &Path) -> Result<LogState, ProcessingError> {
        let options = UploadOptions {
            user_token: self.user_token(),
            anonymous: self.settings.anonymous,
        };
        tracing::info!(path = %path.display(), "uploading");
        let log = self.uploader.upload(path, &options).await?;

        let issued_token = log.user_token.clone().filter(|t| !t.is_empty());
        let meta = log
            .encounter_meta()
            .map(|(trigger, name)| (trigger, name.to_string()));

        let identity = self.persistence.store_dps_report_log(path, log)?;
        let state = self
            .persistence
            .record_identity_state(identity.clone(), LogState::Uploaded)?;

        if let Some((trigger, name)) = meta {
            if self
                .persistence
                .remember_meta(identity.encounter(), trigger, Some(&name))?
            {
                self.listener.on_new_meta();
            }
        }
        if let Some(token) = issued_token {
            self.learn_token(token);
        }

        tracing::info!(path = %path.display(), identity = %identity, state = %state, "uploaded");
        self.listener.on_new_log(&identity);
        Ok(state)
    }

    fn learn_token(&self, token: String) {
        let mut current = self.user_token.write();
        if current.is_none() {
            tracing::info!("learned user token from upload service");
            self.listener.on_user_token(&token);
            *current = Some(token);
        }
    }

    /// Identity the loader would store `path` under.
    pub fn identity(&self, path: &Path) -> Result<LogIdentity, ProcessingError> {
        Ok(self.persistence.resolver().resolve(path)?)
    }
}

#[async_trait]
impl FileHandler for LogLoader {
    async fn on_file(&self, event: FileEvent) {
        if event.kind != FileEventKind::Created || !is_log_file(&event.path) {
            return;
        }
        // Failures are already logged per step.
        let _ = self.process(&event.path).await;
    }
}
