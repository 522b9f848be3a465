//! Per-run collection of the documents seen since startup.
//!
//! Not persisted. Each entry holds the most complete [`LogDocument`] known for
//! an identity; the complementary upload/analysis views of one log are folded
//! into a single `Both` entry.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::document::LogDocument;
use crate::identity::LogIdentity;

#[derive(Debug, Default)]
pub struct Session {
    inner: RwLock<SessionInner>,
}

#[derive(Debug, Default)]
struct SessionInner {
    entries: HashMap<LogIdentity, SessionEntry>,
    clock: u64,
}

#[derive(Debug)]
struct SessionEntry {
    document: LogDocument,
    touched: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `document` for `identity`, merging with what is already known,
    /// and marks the entry as most recently touched.
    pub fn add(&self, identity: LogIdentity, document: impl Into<LogDocument>) -> LogDocument {
        let document = document.into();
        let mut inner = self.inner.write();
        inner.clock += 1;
        let touched = inner.clock;

        let merged = match inner.entries.remove(&identity) {
            Some(existing) => existing.document.merge(document),
            None => document,
        };
        inner.entries.insert(
            identity,
            SessionEntry {
                document: merged.clone(),
                touched,
            },
        );
        merged
    }

    pub fn get(&self, identity: &LogIdentity) -> Option<LogDocument> {
        self.inner
            .read()
            .entries
            .get(identity)
            .map(|entry| entry.document.clone())
    }

    /// Current entries, most recently touched first.
    pub fn entries(&self) -> Vec<(LogIdentity, LogDocument)> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .entries
            .iter()
            .map(|(id, entry)| (entry.touched, id.clone(), entry.document.clone()))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries
            .into_iter()
            .map(|(_, id, document)| (id, document))
            .collect()
    }

    /// Current documents, most recently touched first.
    pub fn current_logs(&self) -> Vec<LogDocument> {
        self.entries()
            .into_iter()
            .map(|(_, document)| document)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
    }
}
