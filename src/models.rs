//! Core data types shared by the sync engine and the remote store gateways.

use std::path::PathBuf;

/// A file as the remote store lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    /// Filename the file was uploaded under; this is the document key.
    pub display_name: String,
}

/// One page of a remote file listing.
#[derive(Debug, Clone, Default)]
pub struct RemotePage {
    pub files: Vec<RemoteFile>,
    /// Whether the remote reported more pages after this one.
    pub has_more: bool,
}

/// A markdown file read from disk and keyed for comparison.
#[derive(Debug, Clone)]
pub struct LocalDocument {
    pub path: PathBuf,
    pub key: String,
    pub fingerprint: String,
    pub content: String,
}

/// Outcome of one sync pass over a location.
///
/// Only [`SyncReport::changed`] carries meaning for callers deciding what was
/// pushed; the counters exist for summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Keys of documents created or replaced remotely in this pass.
    pub changed: Vec<String>,
    pub unchanged: usize,
    pub failed: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}
