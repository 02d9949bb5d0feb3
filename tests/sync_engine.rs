//! End-to-end behavior of the sync engine against an in-memory remote store.
//!
//! Each test builds a markdown tree under a temp dir (`<tmp>/site/docs/...`)
//! and keys documents with the `docs/` root marker.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kb_sync::backoff::ExponentialBackoff;
use kb_sync::error::{RemoteError, SyncError};
use kb_sync::store::{MemoryStore, StoreOp};
use kb_sync::sync::SyncEngine;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn fast_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(Duration::from_millis(1), 2.0)
        .with_max_interval(Duration::from_millis(5))
        .with_max_elapsed_time(Duration::from_millis(20))
}

fn setup_tree(files: &[(&str, &str)]) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("site").join("docs");
    fs::create_dir_all(&docs).unwrap();
    for (name, content) in files {
        write(&docs, name, content);
    }
    (tmp, docs)
}

fn write(docs: &Path, name: &str, content: &str) {
    let path = docs.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn engine(store: &Arc<MemoryStore>) -> SyncEngine {
    SyncEngine::new(store.clone(), vec!["docs/".to_string()], fast_backoff())
}

fn sorted(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys
}

#[tokio::test]
async fn test_first_pass_uploads_everything() {
    let (_tmp, docs) = setup_tree(&[
        ("a.md", "# A"),
        ("guide/b.md", "# B"),
        ("notes.txt", "not markdown"),
    ]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);

    let report = engine.sync_all(&docs, &CancellationToken::new()).await.unwrap();

    assert_eq!(sorted(report.changed), vec!["docs/a.md", "docs/guide/b.md"]);
    assert_eq!(report.failed, 0);
    assert_eq!(store.calls(StoreOp::Create), 2);
    assert_eq!(store.calls(StoreOp::Delete), 0);
    assert_eq!(store.content_of("docs/guide/b.md").as_deref(), Some("# B"));
    assert!(engine.remote_id_of("docs/a.md").is_some());
}

#[tokio::test]
async fn test_second_pass_without_changes_is_empty() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B")]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let cancel = CancellationToken::new();

    engine.sync_all(&docs, &cancel).await.unwrap();
    let second = engine.sync_all(&docs, &cancel).await.unwrap();

    assert!(second.changed.is_empty());
    assert_eq!(second.unchanged, 2);
    assert_eq!(store.calls(StoreOp::Create), 2);
}

#[tokio::test]
async fn test_one_edit_after_baseline_replaces_one_remote_file() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B"), ("c.md", "# C")]);
    let store = Arc::new(MemoryStore::new());
    for key in ["docs/a.md", "docs/b.md", "docs/c.md"] {
        store.insert(key, "uploaded earlier");
    }
    let old_b = store
        .files()
        .into_iter()
        .find(|f| f.display_name == "docs/b.md")
        .unwrap()
        .id;

    let engine = engine(&store);
    let cancel = CancellationToken::new();
    assert_eq!(engine.load_remote_ids(&cancel).await.unwrap(), 3);
    assert_eq!(engine.prime_baseline(&docs), 3);

    write(&docs, "b.md", "# B, revised");
    let report = engine.sync_all(&docs, &cancel).await.unwrap();

    assert_eq!(report.changed, vec!["docs/b.md"]);
    assert_eq!(report.unchanged, 2);
    assert_eq!(store.calls(StoreOp::Delete), 1);
    assert_eq!(store.calls(StoreOp::Create), 1);
    assert_eq!(store.content_of("docs/b.md").as_deref(), Some("# B, revised"));

    let new_b = engine.remote_id_of("docs/b.md").unwrap();
    assert_ne!(new_b, old_b);
    assert!(store.files().iter().all(|f| f.id != old_b));
}

#[tokio::test]
async fn test_prime_baseline_makes_no_remote_calls() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B")]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);

    assert_eq!(engine.prime_baseline(&docs), 2);
    assert!(engine.fingerprint_of("docs/a.md").is_some());
    assert_eq!(store.calls(StoreOp::List), 0);
    assert_eq!(store.calls(StoreOp::Create), 0);

    let report = engine.sync_all(&docs, &CancellationToken::new()).await.unwrap();
    assert!(report.changed.is_empty());
}

#[tokio::test]
async fn test_same_logical_tree_under_different_parents_shares_keys() {
    let (_tmp_a, docs_a) = setup_tree(&[("x.md", "# X"), ("sub/y.md", "# Y")]);
    let (_tmp_b, docs_b) = setup_tree(&[("x.md", "# X"), ("sub/y.md", "# Y")]);
    assert_ne!(docs_a, docs_b);

    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    engine.prime_baseline(&docs_a);

    let report = engine
        .sync_all(&docs_b, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.changed.is_empty());
    assert_eq!(report.unchanged, 2);
}

#[tokio::test]
async fn test_rate_limited_create_retries_then_succeeds() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A")]);
    let store = Arc::new(MemoryStore::new());
    store.fail_next(StoreOp::Create, RemoteError::rate_limited(None));
    store.fail_next(StoreOp::Create, RemoteError::rate_limited(None));
    let engine = engine(&store);

    let report = engine.sync_all(&docs, &CancellationToken::new()).await.unwrap();

    assert_eq!(store.calls(StoreOp::Create), 3);
    assert_eq!(report.changed, vec!["docs/a.md"]);
    assert_eq!(store.files().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_delete_is_retried_on_its_own() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("docs/a.md", "old");
    store.fail_next(StoreOp::Delete, RemoteError::rate_limited(None));
    let engine = engine(&store);
    let cancel = CancellationToken::new();
    engine.load_remote_ids(&cancel).await.unwrap();

    let report = engine.sync_all(&docs, &cancel).await.unwrap();

    assert_eq!(report.changed, vec!["docs/a.md"]);
    assert_eq!(store.calls(StoreOp::Delete), 2);
    assert_eq!(store.calls(StoreOp::Create), 1);
    assert_eq!(store.content_of("docs/a.md").as_deref(), Some("# A"));
}

#[tokio::test]
async fn test_exhausted_retries_skip_only_that_document() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B")]);
    let store = Arc::new(MemoryStore::new());
    // Waits of 1, 2, 4, 5, 5, 5 ms exceed the 20ms budget, so "a.md" (walked
    // first) gives up on its seventh failure and "b.md" absorbs the other three.
    for _ in 0..10 {
        store.fail_next(StoreOp::Create, RemoteError::rate_limited(None));
    }
    let engine = engine(&store);

    let report = engine.sync_all(&docs, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.changed, vec!["docs/b.md"]);
    assert_eq!(report.failed, 1);
    assert_eq!(store.calls(StoreOp::Create), 11);
    assert!(engine.fingerprint_of("docs/a.md").is_none());
    assert!(engine.remote_id_of("docs/a.md").is_none());
}

#[tokio::test]
async fn test_permanent_failure_is_isolated_and_retried_next_pass() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B"), ("c.md", "# C")]);
    let store = Arc::new(MemoryStore::new());
    store.fail_next(StoreOp::Create, RemoteError::permanent("400 Bad Request"));
    let engine = engine(&store);
    let cancel = CancellationToken::new();

    let first = engine.sync_all(&docs, &cancel).await.unwrap();
    assert_eq!(first.changed, vec!["docs/b.md", "docs/c.md"]);
    assert_eq!(first.failed, 1);
    assert_eq!(store.calls(StoreOp::Create), 3);

    let second = engine.sync_all(&docs, &cancel).await.unwrap();
    assert_eq!(second.changed, vec!["docs/a.md"]);
    assert_eq!(second.unchanged, 2);
}

#[tokio::test]
async fn test_failed_create_after_delete_is_recreated_next_pass() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A")]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let cancel = CancellationToken::new();

    engine.sync_all(&docs, &cancel).await.unwrap();
    write(&docs, "a.md", "# A v2");

    store.fail_next(StoreOp::Create, RemoteError::permanent("500 Internal Server Error"));
    let failed = engine.sync_all(&docs, &cancel).await.unwrap();
    assert!(failed.changed.is_empty());
    assert_eq!(failed.failed, 1);
    assert!(store.files().is_empty());
    assert!(engine.remote_id_of("docs/a.md").is_none());

    // Content is unchanged since the failed pass, but the document is missing remotely.
    let recovered = engine.sync_all(&docs, &cancel).await.unwrap();
    assert_eq!(recovered.changed, vec!["docs/a.md"]);
    assert_eq!(store.content_of("docs/a.md").as_deref(), Some("# A v2"));
}

#[tokio::test]
async fn test_unreadable_file_is_skipped() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("c.md", "# C")]);
    fs::write(docs.join("b.md"), [0xc3, 0x28, 0xff]).unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);

    let report = engine.sync_all(&docs, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.changed, vec!["docs/a.md", "docs/c.md"]);
    assert_eq!(report.failed, 1);
    assert_eq!(engine.prime_baseline(&docs), 2);
}

#[tokio::test]
async fn test_missing_location_yields_empty_report() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);

    let report = engine
        .sync_all(&tmp.path().join("does-not-exist"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report, Default::default());
    assert_eq!(engine.prime_baseline(&tmp.path().join("does-not-exist")), 0);
}

#[tokio::test]
async fn test_cancel_during_backoff_stops_the_pass() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B")]);
    let store = Arc::new(MemoryStore::new());
    store.fail_next(StoreOp::Create, RemoteError::rate_limited(None));
    let slow = ExponentialBackoff::new(Duration::from_secs(3600), 2.0);
    let engine = SyncEngine::new(store.clone(), vec!["docs/".to_string()], slow);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(10), engine.sync_all(&docs, &cancel))
        .await
        .expect("cancellation should interrupt the backoff wait");

    assert!(matches!(result, Err(SyncError::Cancelled)));
    // "b.md" was never reached.
    assert_eq!(store.calls(StoreOp::Create), 1);
    assert!(store.files().is_empty());
}

#[tokio::test]
async fn test_already_cancelled_pass_does_nothing() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A")]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine.sync_all(&docs, &cancel).await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(store.calls(StoreOp::Create), 0);
}

#[tokio::test]
async fn test_remote_listing_drives_pagination_to_the_end() {
    let store = Arc::new(MemoryStore::with_page_size(2));
    for i in 0..5 {
        store.insert(&format!("docs/{}.md", i), "");
    }
    let engine = engine(&store);

    assert_eq!(engine.load_remote_ids(&CancellationToken::new()).await.unwrap(), 5);
    assert_eq!(store.calls(StoreOp::List), 3);
    for i in 0..5 {
        assert!(engine.remote_id_of(&format!("docs/{}.md", i)).is_some());
    }
}

#[tokio::test]
async fn test_remote_listing_of_empty_store() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);

    let files = engine
        .list_remote_files(&CancellationToken::new())
        .await
        .unwrap();
    assert!(files.is_empty());
    assert_eq!(store.calls(StoreOp::List), 1);
}

#[tokio::test]
async fn test_remote_listing_retries_rate_limited_pages() {
    let store = Arc::new(MemoryStore::with_page_size(1));
    store.insert("docs/a.md", "");
    store.insert("docs/b.md", "");
    store.fail_next(
        StoreOp::List,
        RemoteError::rate_limited(Some(Duration::from_millis(1))),
    );
    let engine = engine(&store);

    let files = engine
        .list_remote_files(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(files.len(), 2);
}

#[tokio::test]
async fn test_exclude_globs_are_not_synced() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("drafts/wip.md", "# WIP")]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store).with_exclude_globs(vec!["drafts/**".to_string()]);

    let report = engine.sync_all(&docs, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.changed, vec!["docs/a.md"]);
}

#[tokio::test]
async fn test_remote_file_deleted_elsewhere_is_recreated() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A")]);
    let store = Arc::new(MemoryStore::new());
    let stale = store.insert("docs/a.md", "old");
    let engine = engine(&store);
    let cancel = CancellationToken::new();
    engine.load_remote_ids(&cancel).await.unwrap();

    assert!(store.remove(&stale));

    let first = engine.sync_all(&docs, &cancel).await.unwrap();
    assert_eq!(first.changed, vec!["docs/a.md"]);
    assert_eq!(first.failed, 0);
    assert_eq!(store.calls(StoreOp::Delete), 1);
    assert_eq!(store.content_of("docs/a.md").as_deref(), Some("# A"));
    assert_ne!(engine.remote_id_of("docs/a.md").unwrap(), stale);

    let second = engine.sync_all(&docs, &cancel).await.unwrap();
    assert!(second.changed.is_empty());
    assert_eq!(store.calls(StoreOp::Create), 1);
}

#[tokio::test]
async fn test_restart_recreates_document_missing_remotely() {
    // A previous run died between deleting "a.md" and recreating it.
    let (_tmp, docs) = setup_tree(&[("a.md", "# A"), ("b.md", "# B")]);
    let store = Arc::new(MemoryStore::new());
    store.insert("docs/b.md", "# B");
    let engine = engine(&store);
    let cancel = CancellationToken::new();

    assert_eq!(engine.load_remote_ids(&cancel).await.unwrap(), 1);
    assert!(engine.is_reconciled());
    assert_eq!(engine.prime_baseline(&docs), 2);

    let first = engine.sync_all(&docs, &cancel).await.unwrap();
    assert_eq!(first.changed, vec!["docs/a.md"]);
    assert_eq!(first.unchanged, 1);
    assert_eq!(store.calls(StoreOp::Delete), 0);
    assert_eq!(store.content_of("docs/a.md").as_deref(), Some("# A"));

    let second = engine.sync_all(&docs, &cancel).await.unwrap();
    assert!(second.changed.is_empty());
}

#[tokio::test]
async fn test_reload_drops_ids_no_longer_listed() {
    let (_tmp, docs) = setup_tree(&[("a.md", "# A")]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store);
    let cancel = CancellationToken::new();

    engine.sync_all(&docs, &cancel).await.unwrap();
    let id = engine.remote_id_of("docs/a.md").unwrap();
    assert!(store.remove(&id));

    assert_eq!(engine.load_remote_ids(&cancel).await.unwrap(), 0);
    assert!(engine.remote_id_of("docs/a.md").is_none());

    let report = engine.sync_all(&docs, &cancel).await.unwrap();
    assert_eq!(report.changed, vec!["docs/a.md"]);
    assert_eq!(store.calls(StoreOp::Delete), 0);
}

#[tokio::test]
async fn test_duplicate_remote_names_keep_the_last_listed() {
    let store = Arc::new(MemoryStore::new());
    let older = store.insert("docs/a.md", "v1");
    let newer = store.insert("docs/a.md", "v2");
    store.insert("docs/b.md", "# B");
    let engine = engine(&store);

    let loaded = engine
        .load_remote_ids(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(loaded, 2);
    assert_eq!(engine.remote_id_of("docs/a.md"), Some(newer.clone()));
    assert_eq!(store.calls(StoreOp::Delete), 1);
    let ids: Vec<String> = store.files().into_iter().map(|f| f.id).collect();
    assert!(!ids.contains(&older));
    assert!(ids.contains(&newer));
}

#[tokio::test]
async fn test_failed_duplicate_cleanup_does_not_fail_reconciliation() {
    let store = Arc::new(MemoryStore::new());
    store.insert("docs/a.md", "v1");
    let newer = store.insert("docs/a.md", "v2");
    store.fail_next(StoreOp::Delete, RemoteError::permanent("500 Internal Server Error"));
    let engine = engine(&store);

    let loaded = engine
        .load_remote_ids(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(loaded, 1);
    assert_eq!(engine.remote_id_of("docs/a.md"), Some(newer));
    assert_eq!(store.files().len(), 2);
}
