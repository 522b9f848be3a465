//! Analysis collaborator: the external analysis executable.
//!
//! The executable reads a per-encounter settings file and writes its JSON
//! document to `<output>/<encounter>/`, where the [`LogAnalyzer`] picks it up.
//!
//! [`LogAnalyzer`]: crate::analyzer::LogAnalyzer

use async_trait::async_trait;
use inquest_core::IdentityResolver;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::AnalysisError;

/// Runs the analysis of one log. Success means the output document was
/// written; it is consumed asynchronously from the output directory.
#[async_trait]
pub trait LogParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<(), AnalysisError>;
}

const PARSING_FAILURE: &str = r"Parsing Failure .*?: (.*)\r?\n";
const SETTINGS_EXTENSION: &str = "conf";

/// Keys every settings file shares; anything else is per encounter.
const SHARED_KEYS: [&str; 5] = [
    "Anonymous",
    "SaveOutJSON",
    "SaveOutHtml",
    "SaveOutTrace",
    "SaveAtOut",
];

/// Settings written for each encounter, in `key=value` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerSettings {
    pub anonymous: bool,
    pub out_location: Option<PathBuf>,
}

impl AnalyzerSettings {
    pub fn render(&self) -> String {
        let mut lines = vec![format!("Anonymous={}", self.anonymous)];
        if let Some(out) = &self.out_location {
            lines.push(format!("OutLocation={}", out.display()));
        }
        lines.push("SaveOutJSON=true".to_string());
        lines.push("SaveOutHtml=false".to_string());
        lines.push("SaveOutTrace=false".to_string());
        lines.push(format!("SaveAtOut={}", self.out_location.is_none()));
        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }

    /// Rewrites the shared keys of an existing settings file. Every other
    /// line, `OutLocation` included, is kept as it is.
    pub fn merge_into(&self, existing: &str) -> String {
        let rendered = self.render();
        let shared: Vec<&str> = rendered
            .lines()
            .filter(|line| SHARED_KEYS.contains(&settings_key(line)))
            .collect();

        let mut seen = Vec::new();
        let mut lines: Vec<&str> = Vec::new();
        for line in existing.lines() {
            let key = settings_key(line);
            match shared.iter().find(|fresh| settings_key(fresh) == key) {
                Some(fresh) => {
                    lines.push(fresh);
                    seen.push(key);
                }
                None => lines.push(line),
            }
        }
        lines.extend(
            shared
                .iter()
                .filter(|fresh| !seen.contains(&settings_key(fresh))),
        );

        let mut merged = lines.join("\n");
        merged.push('\n');
        merged
    }
}

fn settings_key(line: &str) -> &str {
    line.split_once('=').map_or("", |(key, _)| key.trim())
}

pub struct CommandParser {
    executable: PathBuf,
    settings_dir: PathBuf,
    output_dir: PathBuf,
    resolver: IdentityResolver,
    anonymous: bool,
    failure: Regex,
}

impl CommandParser {
    pub fn new(
        executable: impl Into<PathBuf>,
        settings_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        resolver: IdentityResolver,
    ) -> Result<Self, AnalysisError> {
        Ok(Self {
            executable: executable.into(),
            settings_dir: settings_dir.into(),
            output_dir: output_dir.into(),
            resolver,
            anonymous: false,
            failure: Regex::new(PARSING_FAILURE)?,
        })
    }

    pub fn anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn settings_path(&self, encounter: &str) -> PathBuf {
        self.settings_dir
            .join(format!("{}.conf", encounter.to_lowercase()))
    }

    fn settings_for(&self, encounter: &str) -> AnalyzerSettings {
        AnalyzerSettings {
            anonymous: self.anonymous,
            out_location: Some(self.output_dir.join(encounter)),
        }
    }

    /// Writes the settings for `encounter`. An existing file only has its
    /// shared keys refreshed, so its output location and hand edits survive.
    /// Returns the settings path.
    pub fn ensure_settings(&self, encounter: &str) -> Result<PathBuf, AnalysisError> {
        let path = self.settings_path(encounter);
        self.write_settings(&path, &self.settings_for(encounter))?;
        Ok(path)
    }

    /// Pushes the current shared keys into every settings file already in the
    /// settings directory. Returns how many files changed.
    pub fn sync_settings(&self) -> Result<usize, AnalysisError> {
        if !self.settings_dir.is_dir() {
            return Ok(0);
        }
        let files: Vec<PathBuf> = WalkDir::new(&self.settings_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().and_then(|ext| ext.to_str())
                        == Some(SETTINGS_EXTENSION)
            })
            .map(|entry| entry.into_path())
            .collect();

        let mut changed = 0;
        for path in files {
            let encounter = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.write_settings(&path, &self.settings_for(&encounter))? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Creates or merges one settings file. Returns whether it was written.
    fn write_settings(
        &self,
        path: &Path,
        settings: &AnalyzerSettings,
    ) -> Result<bool, AnalysisError> {
        let write = || -> std::io::Result<bool> {
            let contents = match fs::read_to_string(path) {
                Ok(existing) => {
                    let merged = settings.merge_into(&existing);
                    if merged == existing {
                        return Ok(false);
                    }
                    merged
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => settings.render(),
                Err(err) => return Err(err),
            };
            fs::create_dir_all(&self.settings_dir)?;
            fs::write(path, contents)?;
            Ok(true)
        };
        let written = write().map_err(|source| AnalysisError::Settings {
            path: path.to_path_buf(),
            source,
        })?;
        if written {
            tracing::debug!(path = %path.display(), "wrote analyzer settings");
        }
        Ok(written)
    }

    /// The reason reported on the analyzer's output, if it failed to parse.
    pub fn failure_reason(&self, output: &str) -> Option<String> {
        if !output.contains("Parsing Failure") {
            return None;
        }
        Some(
            self.failure
                .captures(output)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_else(|| "unknown cause".to_string()),
        )
    }
}

#[async_trait]
impl LogParser for CommandParser {
    async fn parse(&self, path: &Path) -> Result<(), AnalysisError> {
        let identity = self.resolver.resolve(path)?;
        let encounter = identity.encounter();
        let settings = self.ensure_settings(encounter)?;
        let out_dir = self.output_dir.join(encounter);
        fs::create_dir_all(&out_dir).map_err(|source| AnalysisError::Settings {
            path: out_dir.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), identity = %identity, "running analyzer");
        let output = tokio::process::Command::new(&self.executable)
            .arg("-c")
            .arg(&settings)
            .arg("-p")
            .arg(path)
            .output()
            .await
            .map_err(|source| AnalysisError::Spawn {
                program: self.executable.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        tracing::debug!(output = %stdout, "analyzer finished");
        if let Some(reason) = self.failure_reason(&stdout) {
            return Err(AnalysisError::ParsingFailure(reason));
        }
        if !output.status.success() {
            return Err(AnalysisError::Exit(output.status));
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandParser")
            .field("executable", &self.executable)
            .field("settings_dir", &self.settings_dir)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}
