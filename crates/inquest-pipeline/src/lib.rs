//! Inquest pipeline
//!
//! Thin orchestrators between the watcher and the persistence layer:
//!
//! ```text
//!   arcdps root ──► DirectoryWatcher ──► LogLoader ──► LogUploader (dps.report)
//!                                            │
//!                                            └──► LogParser (analysis executable)
//!                                                       │ writes JSON
//!                                                       ▼
//!   analyzer_cache ──► DirectoryWatcher ──► LogAnalyzer ──► Persistence
//! ```
//!
//! Failures are per log: they are logged, state for that log is left as it
//! was, and the watcher keeps going. Retrying is up to the caller.

pub mod analysis;
pub mod analyzer;
pub mod error;
pub mod listener;
pub mod loader;
pub mod upload;

pub use analysis::{AnalyzerSettings, CommandParser, LogParser};
pub use analyzer::{LogAnalyzer, DEFAULT_SETTLE_DELAY};
pub use error::{AnalysisError, ProcessingError, UploadError};
pub use listener::{LogListener, NoopListener};
pub use loader::{LoaderSettings, LogLoader};
pub use upload::{LogUploader, UploadOptions};

#[cfg(feature = "dps-report")]
pub use upload::{DpsReportUploader, DPS_REPORT_ENDPOINT};
