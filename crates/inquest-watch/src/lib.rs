//! Inquest watch layer
//!
//! Observes a directory tree for new and changed files and hands each event
//! to an async [`FileHandler`] running on a bounded [`WorkerPool`]:
//!
//! ```text
//!   notify ──► DirectoryWatcher (dedicated thread) ──► WorkerPool ──► FileHandler
//! ```
//!
//! The watcher reports every file; deciding which files matter (log
//! extensions, analysis output) is left to the handlers.

pub mod error;
pub mod pool;
pub mod watcher;

pub use error::WatchError;
pub use pool::{SaturationPolicy, WorkerPool};
pub use watcher::{DirectoryWatcher, FileEvent, FileEventKind, FileHandler, WatchConfig};
