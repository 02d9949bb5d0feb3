//! Sync engine.
//!
//! Keeps a remote store in step with a local tree of markdown documents.
//! Two in-memory tables drive it:
//!
//! - **fingerprints**: document key → fingerprint of the content last pushed
//!   (or primed as already pushed).
//! - **remote ids**: document key → id of the remote file currently holding
//!   that document.
//!
//! A pass ([`SyncEngine::sync_all`]) walks a location and, for each markdown
//! file, compares its fingerprint to the table. Unchanged files are skipped.
//! Changed (or never seen) files have their old remote file deleted, if one
//! is on record, and a new one created from the current content.
//!
//! # Failures
//!
//! Every remote call runs under a fresh [`BackoffExecution`](crate::backoff::BackoffExecution).
//! Rate-limited calls are retried after the next backoff interval until the
//! policy says stop; any other remote error, a read error, or an exhausted
//! retry budget skips that one document and the pass moves on. Cancelling the
//! token passed to a pass interrupts any backoff wait and ends the pass with
//! [`SyncError::Cancelled`], discarding what it had collected so far.
//!
//! # Delete-then-create
//!
//! Replacing a document is two remote calls and is not atomic. Deleting the
//! old remote file forgets both the remote id and the fingerprint, so a create
//! that fails afterwards is retried on the next pass even if the content does
//! not change again. Once the remote id table has been reconciled against the
//! store's listing ([`SyncEngine::load_remote_ids`]), a document whose
//! fingerprint matches but which has no remote file on record is also
//! uploaded; this covers a process that died between the two calls. A remote
//! file that is already gone when deleted counts as deleted.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffStep, ExponentialBackoff};
use crate::config::Config;
use crate::error::{DocumentError, RemoteError, SyncError};
use crate::models::{LocalDocument, RemoteFile, SyncReport};
use crate::store::RemoteStore;
use crate::walk::{load_document, markdown_files};

/// What a pass should do with one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Fingerprint matches the last synced content.
    Unchanged,
    /// Push the current content, first deleting `replace` if set.
    Upload { replace: Option<String> },
}

/// Why a retried remote call gave up.
#[derive(Debug)]
enum CallError {
    Cancelled,
    Exhausted { attempts: u32 },
    Failed(RemoteError),
}

/// Why a document was not committed.
#[derive(Debug)]
enum Skip {
    Cancelled,
    Failed(DocumentError),
}

impl From<DocumentError> for Skip {
    fn from(e: DocumentError) -> Self {
        Skip::Failed(e)
    }
}

impl From<std::io::Error> for Skip {
    fn from(e: std::io::Error) -> Self {
        Skip::Failed(DocumentError::Io(e))
    }
}

impl CallError {
    fn into_skip(self, operation: &'static str) -> Skip {
        match self {
            CallError::Cancelled => Skip::Cancelled,
            CallError::Exhausted { attempts } => {
                Skip::Failed(DocumentError::RetriesExhausted { operation, attempts })
            }
            CallError::Failed(source) => Skip::Failed(DocumentError::Remote { operation, source }),
        }
    }

    fn into_sync_error(self, operation: &'static str) -> SyncError {
        match self {
            CallError::Cancelled => SyncError::Cancelled,
            CallError::Exhausted { attempts } => SyncError::RetriesExhausted {
                operation,
                attempts,
            },
            CallError::Failed(e) => SyncError::Remote(e),
        }
    }
}

/// Incremental synchronizer between local markdown and a [`RemoteStore`].
///
/// Tables live only as long as the engine. Share one engine per remote store
/// and credential; concurrent passes must walk disjoint trees.
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    roots: Vec<String>,
    exclude_globs: Vec<String>,
    backoff: ExponentialBackoff,
    fingerprints: DashMap<String, String>,
    remote_ids: DashMap<String, String>,
    reconciled: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, roots: Vec<String>, backoff: ExponentialBackoff) -> Self {
        Self {
            store,
            roots,
            exclude_globs: Vec::new(),
            backoff,
            fingerprints: DashMap::new(),
            remote_ids: DashMap::new(),
            reconciled: AtomicBool::new(false),
        }
    }

    pub fn from_config(store: Arc<dyn RemoteStore>, config: &Config) -> Self {
        Self::new(store, config.markdown.roots.clone(), config.retry.backoff())
            .with_exclude_globs(config.markdown.exclude_globs.clone())
    }

    pub fn with_exclude_globs(mut self, exclude_globs: Vec<String>) -> Self {
        self.exclude_globs = exclude_globs;
        self
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn fingerprint_of(&self, key: &str) -> Option<String> {
        self.fingerprints.get(key).map(|fp| fp.value().clone())
    }

    pub fn remote_id_of(&self, key: &str) -> Option<String> {
        self.remote_ids.get(key).map(|id| id.value().clone())
    }

    /// Whether the remote id table mirrors a full listing of the store.
    pub fn is_reconciled(&self) -> bool {
        self.reconciled.load(Ordering::SeqCst)
    }

    /// Page through the remote store until it runs out of files.
    ///
    /// Each page request is retried on rate limits like any other call.
    pub async fn list_remote_files(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteFile>, SyncError> {
        let mut files: Vec<RemoteFile> = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let cursor = after.as_deref();
            let page = self
                .call_with_backoff("list", cancel, || self.store.list_files_page(cursor))
                .await
                .map_err(|e| e.into_sync_error("list"))?;

            let Some(last) = page.files.last() else {
                break;
            };
            after = Some(last.id.clone());
            files.extend(page.files);

            if !page.has_more {
                break;
            }
        }

        debug!(count = files.len(), "Listed remote files");
        Ok(files)
    }

    /// Rebuild the remote id table from the store's current listing.
    ///
    /// Remote files are matched to documents by the name they were uploaded
    /// under, which is the document key. Keys no longer listed are dropped.
    /// When several files share a name the one listed last is kept and the
    /// others are deleted; a failed cleanup is logged and left for the next
    /// reconciliation. Returns the number of entries.
    pub async fn load_remote_ids(&self, cancel: &CancellationToken) -> Result<usize, SyncError> {
        let files = self.list_remote_files(cancel).await?;

        let mut listed: HashMap<String, String> = HashMap::new();
        let mut duplicates: Vec<(String, String)> = Vec::new();
        for file in files {
            if file.display_name.is_empty() {
                debug!(remote_id = %file.id, "Skipping remote file without a name");
                continue;
            }
            if let Some(previous) = listed.insert(file.display_name.clone(), file.id) {
                duplicates.push((file.display_name, previous));
            }
        }

        for (key, id) in &duplicates {
            match self
                .call_with_backoff("delete", cancel, || self.store.delete_file(id))
                .await
            {
                Ok(()) => info!(key = %key, remote_id = %id, "Deleted duplicate remote file"),
                Err(CallError::Failed(e)) if e.is_not_found() => {}
                Err(CallError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => warn!(
                    key = %key,
                    remote_id = %id,
                    error = ?e,
                    "Failed to delete duplicate remote file"
                ),
            }
        }

        self.remote_ids.retain(|key, _| listed.contains_key(key));
        for (key, id) in listed {
            self.remote_ids.insert(key, id);
        }
        self.reconciled.store(true, Ordering::SeqCst);

        info!(
            count = self.remote_ids.len(),
            duplicates = duplicates.len(),
            "Loaded remote file ids"
        );
        Ok(self.remote_ids.len())
    }

    /// Record every markdown file under `location` as already synced.
    ///
    /// No remote calls are made. Unreadable files are logged and skipped.
    /// Returns the number of documents primed.
    pub fn prime_baseline(&self, location: &Path) -> usize {
        let files = match markdown_files(location, &self.exclude_globs) {
            Ok(files) => files,
            Err(e) => {
                error!(location = %location.display(), error = %e, "Error reading files from location");
                return 0;
            }
        };

        let mut primed = 0;
        for entry in files {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            match load_document(&path, &self.roots) {
                Ok(doc) => {
                    self.fingerprints.insert(doc.key, doc.fingerprint);
                    primed += 1;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Error processing file");
                }
            }
        }

        info!(location = %location.display(), primed, "Primed baseline");
        primed
    }

    /// Decide what a pass should do with `doc`, given the current tables.
    ///
    /// After reconciliation a document with no remote file on record is
    /// uploaded even if its fingerprint matches.
    pub fn plan(&self, doc: &LocalDocument) -> Plan {
        let fingerprint_matches = self
            .fingerprints
            .get(&doc.key)
            .is_some_and(|fp| *fp == doc.fingerprint);
        let remote_id = self.remote_id_of(&doc.key);

        if fingerprint_matches && (remote_id.is_some() || !self.is_reconciled()) {
            Plan::Unchanged
        } else {
            Plan::Upload { replace: remote_id }
        }
    }

    /// Run one sync pass over `location`.
    ///
    /// An unreadable location is logged and yields an empty report.
    pub async fn sync_all(
        &self,
        location: &Path,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let files = match markdown_files(location, &self.exclude_globs) {
            Ok(files) => files,
            Err(e) => {
                error!(location = %location.display(), error = %e, "Error reading files from location");
                return Ok(SyncReport::default());
            }
        };

        let mut report = SyncReport::default();
        for entry in files {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    report.failed += 1;
                    continue;
                }
            };

            match self.sync_document(&path, cancel).await {
                Ok(Some(key)) => report.changed.push(key),
                Ok(None) => report.unchanged += 1,
                Err(Skip::Cancelled) => {
                    warn!(path = %path.display(), "Sync cancelled");
                    return Err(SyncError::Cancelled);
                }
                Err(Skip::Failed(e)) => {
                    error!(path = %path.display(), error = %e, "Error processing file");
                    report.failed += 1;
                }
            }
        }

        info!(
            location = %location.display(),
            changed = report.changed.len(),
            unchanged = report.unchanged,
            failed = report.failed,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Returns the key if the document was pushed, `None` if unchanged.
    async fn sync_document(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, Skip> {
        let doc = load_document(path, &self.roots)?;

        let replace = match self.plan(&doc) {
            Plan::Unchanged => return Ok(None),
            Plan::Upload { replace } => replace,
        };

        debug!(key = %doc.key, "File has changed");

        if let Some(old_id) = replace {
            match self
                .call_with_backoff("delete", cancel, || self.store.delete_file(&old_id))
                .await
            {
                Ok(()) => debug!(key = %doc.key, remote_id = %old_id, "Deleted remote file"),
                Err(CallError::Failed(e)) if e.is_not_found() => {
                    debug!(key = %doc.key, remote_id = %old_id, "Remote file already gone")
                }
                Err(e) => return Err(e.into_skip("delete")),
            }
            self.remote_ids.remove(&doc.key);
            self.fingerprints.remove(&doc.key);
        }

        let new_id = self
            .call_with_backoff("create", cancel, || {
                self.store.create_file(&doc.key, &doc.content)
            })
            .await
            .map_err(|e| e.into_skip("create"))?;

        debug!(key = %doc.key, remote_id = %new_id, "Created remote file");
        self.remote_ids.insert(doc.key.clone(), new_id);
        self.fingerprints.insert(doc.key.clone(), doc.fingerprint);

        Ok(Some(doc.key))
    }

    /// Run `call`, retrying rate-limited failures under a fresh backoff execution.
    ///
    /// A retry-after hint from the remote lengthens the wait but does not
    /// count against the elapsed-time budget.
    async fn call_with_backoff<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut execution = self.backoff.start();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let retry_after = match call().await {
                Ok(value) => return Ok(value),
                Err(RemoteError::RateLimited { retry_after }) => retry_after,
                Err(e) => return Err(CallError::Failed(e)),
            };

            let interval = match execution.next_backoff() {
                BackoffStep::Wait(interval) => interval,
                BackoffStep::Stop => {
                    error!(operation, attempts, "Retry limit exceeded. Stopping");
                    return Err(CallError::Exhausted { attempts });
                }
            };
            let wait = retry_after.map_or(interval, |hint| hint.max(interval));

            warn!(
                operation,
                attempts,
                wait_ms = wait.as_millis() as u64,
                "Remote store rate limit exceeded. Retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(operation, "Interrupted while waiting for retry");
                    return Err(CallError::Cancelled);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
