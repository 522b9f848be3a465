//! Logical log identity.
//!
//! arcdps writes one file per encounter attempt below
//! `<root>/<encounter folder>/[<character>/]<timestamp>.zevtc`. The analysis
//! tool writes its JSON output somewhere else entirely, as
//! `<output>/<encounter folder>/<timestamp>_<fight>_<result>.json`. Both must
//! map to the same [`LogIdentity`] so their lifecycle events merge.
//!
//! Resolution is a pure function of the path and the configured root: no
//! canonicalization, no file system access.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// File suffixes produced by arcdps. Multi-part suffixes come first so that
/// suffix matching prefers `evtc.zip` over a bare `zip`.
pub const LOG_FILE_EXTENSIONS: &[&str] = &["evtc.zip", "zevtc", "evtc"];

/// Canonical key of one encounter attempt, independent of sub-folders and
/// filename variants. Root-relative and always `/`-separated, e.g.
/// `Sabetha/20240101-120000`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogIdentity(String);

impl LogIdentity {
    /// Wraps an already canonical identity string (e.g. one read back from storage).
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Encounter folder part of the identity.
    pub fn encounter(&self) -> &str {
        self.0.split_once('/').map_or(self.0.as_str(), |(folder, _)| folder)
    }

    /// Attempt part of the identity (stripped filename or filename prefix).
    pub fn attempt(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, attempt)| attempt)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LogIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("path has no file name: {0}")]
    NoFileName(PathBuf),
    #[error("log lies directly in the watch root, outside any encounter folder: {0}")]
    NoEncounterFolder(PathBuf),
    #[error("path has no parent folder to derive an encounter from: {0}")]
    NoParentFolder(PathBuf),
}

/// Derives [`LogIdentity`] values relative to one watch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResolver {
    root: PathBuf,
}

impl IdentityResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` lies below the watch root (component-wise, not textual).
    pub fn is_under_root(&self, path: &Path) -> bool {
        path != self.root && path.starts_with(&self.root)
    }

    /// The direct child of the root containing `path`, if any.
    pub fn encounter_folder(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.root).ok()?;
        match relative.components().next()? {
            Component::Normal(folder) => Some(self.root.join(folder)),
            _ => None,
        }
    }

    /// Resolves the logical identity of `path`.
    ///
    /// Inside the root: `<encounter folder>/<file name without log extension>`.
    /// Outside the root: `<parent folder name>/<file name up to the first '_'>`.
    /// A name without `_` keeps its full file name, extension included.
    pub fn resolve(&self, path: &Path) -> Result<LogIdentity, IdentityError> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .ok_or_else(|| IdentityError::NoFileName(path.to_path_buf()))?;

        if self.is_under_root(path) {
            let relative = path
                .strip_prefix(&self.root)
                .map_err(|_| IdentityError::NoEncounterFolder(path.to_path_buf()))?;
            let mut components = relative.components();
            let folder = match components.next() {
                Some(Component::Normal(folder)) => folder.to_string_lossy(),
                _ => return Err(IdentityError::NoEncounterFolder(path.to_path_buf())),
            };
            if components.next().is_none() {
                return Err(IdentityError::NoEncounterFolder(path.to_path_buf()));
            }
            return Ok(LogIdentity(format!(
                "{folder}/{}",
                strip_log_extension(&file_name)
            )));
        }

        let parent = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy())
            .ok_or_else(|| IdentityError::NoParentFolder(path.to_path_buf()))?;
        let prefix = file_name
            .split_once('_')
            .map_or(file_name.as_ref(), |(prefix, _)| prefix);
        Ok(LogIdentity(format!("{parent}/{prefix}")))
    }
}

/// Whether the file name carries one of [`LOG_FILE_EXTENSIONS`].
pub fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| matching_log_extension(&name.to_string_lossy()).is_some())
        .unwrap_or(false)
}

/// Removes a recognized log suffix, or else the last extension.
pub fn strip_log_extension(file_name: &str) -> &str {
    if let Some(ext) = matching_log_extension(file_name) {
        return &file_name[..file_name.len() - ext.len() - 1];
    }
    match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(dot) => &file_name[..dot],
    }
}

fn matching_log_extension(file_name: &str) -> Option<&'static str> {
    LOG_FILE_EXTENSIONS.iter().copied().find(|ext| {
        file_name.len() > ext.len() + 1
            && file_name.ends_with(ext)
            && file_name.as_bytes()[file_name.len() - ext.len() - 1] == b'.'
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> IdentityResolver {
        IdentityResolver::new("/logs/arcdps.cbtlogs")
    }

    #[test]
    fn resolves_log_in_encounter_folder() {
        let id = resolver()
            .resolve(Path::new("/logs/arcdps.cbtlogs/BossA/20240101-120000.zevtc"))
            .unwrap();
        assert_eq!(id.as_str(), "BossA/20240101-120000");
        assert_eq!(id.encounter(), "BossA");
        assert_eq!(id.attempt(), "20240101-120000");
    }

    #[test]
    fn intermediate_folders_do_not_change_identity() {
        let r = resolver();
        let direct = r
            .resolve(Path::new("/logs/arcdps.cbtlogs/BossA/20240101-120000.zevtc"))
            .unwrap();
        let nested = r
            .resolve(Path::new(
                "/logs/arcdps.cbtlogs/BossA/Some Character/20240101-120000.evtc.zip",
            ))
            .unwrap();
        assert_eq!(direct, nested);
    }

    #[test]
    fn output_document_collides_with_native_log() {
        let r = resolver();
        let native = r
            .resolve(Path::new("/logs/arcdps.cbtlogs/BossA/20240101-120000.zevtc"))
            .unwrap();
        let analyzed = r
            .resolve(Path::new(
                "/home/u/.inquest/analyzer_cache/BossA/20240101-120000_sab_kill.json",
            ))
            .unwrap();
        assert_eq!(native, analyzed);
    }

    #[test]
    fn outside_root_without_underscore_keeps_full_name() {
        let id = resolver()
            .resolve(Path::new("/tmp/BossA/20240101-120000.zevtc"))
            .unwrap();
        assert_eq!(id.as_str(), "BossA/20240101-120000.zevtc");
    }

    #[test]
    fn different_encounters_never_collide() {
        let r = resolver();
        let a = r
            .resolve(Path::new("/logs/arcdps.cbtlogs/BossA/20240101-120000.zevtc"))
            .unwrap();
        let b = r
            .resolve(Path::new("/logs/arcdps.cbtlogs/BossB/20240101-120000.zevtc"))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_files_directly_in_root() {
        let err = resolver()
            .resolve(Path::new("/logs/arcdps.cbtlogs/20240101-120000.zevtc"))
            .unwrap_err();
        assert!(matches!(err, IdentityError::NoEncounterFolder(_)));
    }

    #[test]
    fn root_prefix_is_matched_per_component() {
        // `arcdps.cbtlogs2` merely shares a textual prefix with the root.
        let id = resolver()
            .resolve(Path::new("/logs/arcdps.cbtlogs2/BossA/20240101_x.zevtc"))
            .unwrap();
        assert_eq!(id.as_str(), "BossA/20240101");
    }

    #[test]
    fn encounter_folder_is_direct_child_of_root() {
        let folder = resolver()
            .encounter_folder(Path::new("/logs/arcdps.cbtlogs/BossA/Char/x.zevtc"))
            .unwrap();
        assert_eq!(folder, PathBuf::from("/logs/arcdps.cbtlogs/BossA"));
        assert!(resolver()
            .encounter_folder(Path::new("/elsewhere/BossA/x.zevtc"))
            .is_none());
    }

    #[test]
    fn log_extensions() {
        assert!(is_log_file(Path::new("a/20240101-120000.zevtc")));
        assert!(is_log_file(Path::new("a/20240101-120000.evtc.zip")));
        assert!(is_log_file(Path::new("a/20240101-120000.evtc")));
        assert!(!is_log_file(Path::new("a/20240101-120000.zip")));
        assert!(!is_log_file(Path::new("a/notes.txt")));
        assert!(!is_log_file(Path::new("a/.zevtc")));

        assert_eq!(strip_log_extension("x.evtc.zip"), "x");
        assert_eq!(strip_log_extension("x.json"), "x");
        assert_eq!(strip_log_extension("x"), "x");
        assert_eq!(strip_log_extension(".hidden"), ".hidden");
    }
}
