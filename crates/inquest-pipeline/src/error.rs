use inquest_core::IdentityError;
use inquest_storage::StoreError;
use std::path::PathBuf;

/// Failure of the upload collaborator for a single log.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{} is not a combat log", .0.display())]
    NotALog(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload transport failed: {0}")]
    Transport(String),
    #[error("upload rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upload response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("upload service reported an error: {0}")]
    Remote(String),
}

#[cfg(feature = "dps-report")]
impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Failure of the analysis collaborator or of reading its output.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("failed to launch analyzer {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("analyzer exited unsuccessfully ({0})")]
    Exit(std::process::ExitStatus),
    #[error("analyzer could not parse the log: {0}")]
    ParsingFailure(String),
    #[error("failed to read analysis output {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("analysis output {} is not a valid document: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write analyzer settings {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid failure pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Why processing one log stopped. Orchestrators log it and move on.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}
