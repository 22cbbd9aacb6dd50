//! Context gathering for implicated files.
//!
//! Reads the files a failure implicates into a [`FileSnapshot`]. Identifiers
//! are opaque paths taken verbatim from the classifier; nothing is globbed
//! or traversed. Unreadable files are left out of the snapshot.

use crate::testing::FileSystem;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Contents of implicated files, keyed by identifier.
///
/// Built fresh every iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSnapshot(BTreeMap<String, String>);

impl FileSnapshot {
    /// An empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, identifier: impl Into<String>, contents: impl Into<String>) {
        self.0.insert(identifier.into(), contents.into());
    }

    /// Contents for an exact identifier.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.0.get(identifier).map(String::as_str)
    }

    /// Whether an identifier is present.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.0.contains_key(identifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for FileSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reads implicated files through the injected file system.
#[derive(Clone)]
pub struct ContextGatherer {
    fs: Arc<dyn FileSystem>,
}

impl ContextGatherer {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Read every identifier that can be read.
    ///
    /// Missing or unreadable files are logged and omitted. An empty set
    /// returns an empty snapshot without touching the file system.
    pub fn gather(&self, identifiers: &BTreeSet<String>) -> FileSnapshot {
        let mut snapshot = FileSnapshot::new();
        for identifier in identifiers {
            match self.fs.read_file(Path::new(identifier)) {
                Ok(contents) => {
                    debug!("Gathered {} ({} bytes)", identifier, contents.len());
                    snapshot.insert(identifier.clone(), contents);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("File not found: {}", identifier);
                }
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", identifier, e);
                }
            }
        }
        snapshot
    }

    /// Split `snapshot` into the target's contents and every other entry.
    ///
    /// An exact identifier match wins; otherwise any entry the file system
    /// resolves to the same file as `target` supplies the contents. Entries
    /// naming the target are never part of the remainder.
    #[must_use]
    pub fn split_target(
        &self,
        snapshot: &FileSnapshot,
        target: &Path,
    ) -> (Option<String>, FileSnapshot) {
        let canonical_target = self.fs.canonicalize(target).ok();
        let names_target = |identifier: &str| {
            let candidate = Path::new(identifier);
            candidate == target
                || canonical_target.as_ref().is_some_and(|canonical| {
                    self.fs
                        .canonicalize(candidate)
                        .is_ok_and(|resolved| &resolved == canonical)
                })
        };

        let mut contents = target
            .to_str()
            .and_then(|t| snapshot.get(t))
            .map(str::to_string);
        let mut others = FileSnapshot::new();
        for (identifier, body) in snapshot.iter() {
            if names_target(identifier) {
                contents.get_or_insert_with(|| body.to_string());
            } else {
                others.insert(identifier, body);
            }
        }
        (contents, others)
    }
}
