//! Inquest core model
//!
//! Everything the uploader needs to reason about a combat log without touching
//! the disk or the network:
//!
//! ```text
//!   physical path ──► IdentityResolver ──► LogIdentity
//!                                              │
//!        upload / analysis event ──► LogState::update_with ──► StoredLogs
//!                                              │
//!        DpsLog / JsonLog document ──► Session::add ──► LogDocument (Dps | Json | Both)
//! ```
//!
//! The storage, watcher and pipeline crates build on these types; this crate
//! stays free of I/O so identity derivation and state merging can be tested
//! as pure functions.

pub mod document;
pub mod identity;
pub mod session;
pub mod state;

pub use document::{DocumentKind, DpsLog, JsonLog, LogDocument};
pub use identity::{
    is_log_file, strip_log_extension, IdentityError, IdentityResolver, LogIdentity,
    LOG_FILE_EXTENSIONS,
};
pub use session::Session;
pub use state::{encounter_name, BossToName, FolderToBoss, LogState, StoredLogs, TriggerId};
