//! Remote store gateway abstraction.
//!
//! The [`RemoteStore`] trait is the only surface the sync engine uses to talk
//! to the knowledge base. [`crate::openai::OpenAiStore`] implements it over
//! HTTP; [`MemoryStore`] keeps everything in process and can be scripted to
//! fail, which is how the engine's retry behavior is tested.
//!
//! Every method returns [`RemoteError`], so callers can tell a rate limit
//! (retry later) from any other failure (give up) without inspecting status
//! codes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::models::{RemoteFile, RemotePage};

/// Operations exposed by a remote knowledge-base store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One page of the store's files, in ascending id order, starting after `after`.
    ///
    /// An empty page, or `has_more == false`, ends the listing.
    async fn list_files_page(&self, after: Option<&str>) -> Result<RemotePage, RemoteError>;

    /// Upload `content` under the name `key`; returns the new remote id.
    async fn create_file(&self, key: &str, content: &str) -> Result<String, RemoteError>;

    /// Remove a file previously returned by [`create_file`](RemoteStore::create_file).
    ///
    /// Fails with [`RemoteError::NotFound`] if the file is already gone.
    async fn delete_file(&self, id: &str) -> Result<(), RemoteError>;

    /// Name the file was uploaded under.
    async fn file_name(&self, id: &str) -> Result<String, RemoteError>;
}

/// Name of a [`RemoteStore`] method, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Create,
    Delete,
    FileName,
}

/// In-process [`RemoteStore`].
///
/// Files get sequential ids (`file-000001`, ...). Failures queued with
/// [`fail_next`](MemoryStore::fail_next) are returned, in order, by the next
/// calls of that operation before the operation starts succeeding again.
pub struct MemoryStore {
    files: Mutex<BTreeMap<String, StoredFile>>,
    failures: Mutex<HashMap<StoreOp, VecDeque<RemoteError>>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    next_id: AtomicUsize,
    page_size: usize,
}

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    content: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            page_size: page_size.max(1),
        }
    }

    /// Add a file directly, bypassing fault injection and call counters.
    pub fn insert(&self, name: &str, content: &str) -> String {
        let id = self.allocate_id();
        lock(&self.files).insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                content: content.to_string(),
            },
        );
        id
    }

    /// Remove a file directly, as if someone else deleted it remotely.
    pub fn remove(&self, id: &str) -> bool {
        lock(&self.files).remove(id).is_some()
    }

    /// Queue `error` to be returned by the next unfailed call of `op`.
    pub fn fail_next(&self, op: StoreOp, error: RemoteError) {
        lock(&self.failures).entry(op).or_default().push_back(error);
    }

    /// How many times `op` has been called, failed calls included.
    pub fn calls(&self, op: StoreOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Current `(id, name)` pairs, ordered by id.
    pub fn files(&self) -> Vec<RemoteFile> {
        lock(&self.files)
            .iter()
            .map(|(id, f)| RemoteFile {
                id: id.clone(),
                display_name: f.name.clone(),
            })
            .collect()
    }

    /// Content stored under `name`, if exactly one file has that name.
    pub fn content_of(&self, name: &str) -> Option<String> {
        let files = lock(&self.files);
        let mut matching = files.values().filter(|f| f.name == name);
        match (matching.next(), matching.next()) {
            (Some(f), None) => Some(f.content.clone()),
            _ => None,
        }
    }

    fn allocate_id(&self) -> String {
        format!("file-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn enter(&self, op: StoreOp) -> Result<(), RemoteError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        match lock(&self.failures).get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_files_page(&self, after: Option<&str>) -> Result<RemotePage, RemoteError> {
        self.enter(StoreOp::List)?;
        let files = lock(&self.files);
        let mut remaining = files
            .iter()
            .filter(|(id, _)| after.map_or(true, |a| id.as_str() > a))
            .map(|(id, f)| RemoteFile {
                id: id.clone(),
                display_name: f.name.clone(),
            });
        let page: Vec<RemoteFile> = remaining.by_ref().take(self.page_size).collect();
        let has_more = remaining.next().is_some();
        Ok(RemotePage {
            files: page,
            has_more,
        })
    }

    async fn create_file(&self, key: &str, content: &str) -> Result<String, RemoteError> {
        self.enter(StoreOp::Create)?;
        Ok(self.insert(key, content))
    }

    async fn delete_file(&self, id: &str) -> Result<(), RemoteError> {
        self.enter(StoreOp::Delete)?;
        match lock(&self.files).remove(id) {
            Some(_) => Ok(()),
            None => Err(RemoteError::not_found(id)),
        }
    }

    async fn file_name(&self, id: &str) -> Result<String, RemoteError> {
        self.enter(StoreOp::FileName)?;
        lock(&self.files)
            .get(id)
            .map(|f| f.name.clone())
            .ok_or_else(|| RemoteError::not_found(id))
    }
}
