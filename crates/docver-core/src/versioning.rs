//! Optimistic concurrency control
//!
//! Every document carries a `version` that starts at 1 and grows by exactly
//! one per successful update. Writers never lock. Instead they state the
//! version they last read, and the update only lands if the stored version
//! still matches:
//!
//! 1. the caller's filter is extended with `version == expected`,
//! 2. the caller's patch is extended with `version += 1`,
//! 3. both go to the store as one atomic find-and-modify returning the
//!    post-image.
//!
//! If nothing matched, the caller's view was stale (or the document is
//! gone) and the result is [`UpdateError::VersionConflict`]. Retrying is up
//! to the caller.
//!
//! ## Usage
//!
//! ```ignore
//! let doc = store.find_one(&ctx, &Filter::by_id("acc-1"))?.unwrap();
//! let expected = doc.version().unwrap_or(1);
//!
//! match update_if_current(&ctx, &store, &Filter::by_id("acc-1"), &patch, expected) {
//!     Ok(updated) => assert_eq!(updated.version(), Some(expected + 1)),
//!     Err(UpdateError::VersionConflict { .. }) => { /* re-read and decide */ }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use thiserror::Error;

use crate::context::Context;
use crate::document::{Document, VERSION_FIELD};
use crate::query::{Filter, Patch};
use crate::store::{DocumentStore, FindOneAndUpdateOptions, StoreError, StoreResult};

/// Errors returned by [`update_if_current`]
#[derive(Error, Debug)]
pub enum UpdateError {
    /// No document matched the identity filter at the expected version
    ///
    /// Either another writer got there first or the document does not exist.
    #[error("Version conflict: no document matched the filter at version {expected}")]
    VersionConflict { expected: i64 },

    /// The store failed; passed through unchanged
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UpdateError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, UpdateError::VersionConflict { .. })
    }

    /// Check if re-reading and retrying can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdateError::VersionConflict { .. } => true,
            UpdateError::Store(e) => e.is_recoverable(),
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            UpdateError::VersionConflict { .. } => {
                Some("Re-read the document to learn its current version, then decide whether to retry.")
            }
            UpdateError::Store(e) => e.recovery_suggestion(),
        }
    }
}

/// Result type for conditional updates
pub type UpdateResult<T> = Result<T, UpdateError>;

/// Give a freshly created document its first version
///
/// Zero means unset and becomes 1; any other value is left alone.
pub fn initialize_version(version: &mut i64) {
    if *version == 0 {
        *version = 1;
    }
}

/// Initialize the document's version and insert it
pub fn insert_versioned<S>(ctx: &Context, store: &S, mut doc: Document) -> StoreResult<Document>
where
    S: DocumentStore + ?Sized,
{
    doc.initialize_version();
    store.insert_one(ctx, doc)
}

/// The identity filter pinned to `expected_version`
///
/// A `version` constraint already present in `filter` is replaced.
pub fn conditional_filter(filter: &Filter, expected_version: i64) -> Filter {
    filter.and_eq(VERSION_FIELD, expected_version)
}

/// The caller's patch plus the version bump
pub fn conditional_patch(patch: &Patch) -> Patch {
    patch.and_inc(VERSION_FIELD, 1)
}

/// Apply `patch` only if the document is still at `expected_version`
///
/// On success the post-image is returned and its version is
/// `expected_version + 1`. Neither `filter` nor `patch` is modified.
pub fn update_if_current<S>(
    ctx: &Context,
    store: &S,
    filter: &Filter,
    patch: &Patch,
    expected_version: i64,
) -> UpdateResult<Document>
where
    S: DocumentStore + ?Sized,
{
    let filter = conditional_filter(filter, expected_version);
    let patch = conditional_patch(patch);

    let options = FindOneAndUpdateOptions::return_after();
    match store.find_one_and_update(ctx, &filter, &patch, options)? {
        Some(doc) => Ok(doc),
        None => Err(UpdateError::VersionConflict {
            expected: expected_version,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SqliteStore};
    use serde_json::json;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn ctx() -> Context {
        Context::background()
    }

    /// Store holding document `a` at version 5
    fn seeded<S: DocumentStore>(store: S) -> S {
        store
            .insert_one(
                &ctx(),
                Document::try_from(json!({"_id": "a", "version": 5, "name": "orig"})).unwrap(),
            )
            .unwrap();
        store
    }

    fn stores() -> Vec<Box<dyn DocumentStore>> {
        vec![
            Box::new(seeded(MemoryStore::new())),
            Box::new(seeded(SqliteStore::open_in_memory("docs").unwrap())),
        ]
    }

    fn stored(store: &dyn DocumentStore, id: &str) -> Document {
        store.find_one(&ctx(), &Filter::by_id(id)).unwrap().unwrap()
    }

    /// Store that fails every request
    struct UnreachableStore;

    impl DocumentStore for UnreachableStore {
        fn insert_one(&self, _: &Context, _: Document) -> StoreResult<Document> {
            Err(StoreError::Io(std::io::ErrorKind::ConnectionRefused.into()))
        }

        fn find_one(&self, _: &Context, _: &Filter) -> StoreResult<Option<Document>> {
            Err(StoreError::Io(std::io::ErrorKind::ConnectionRefused.into()))
        }

        fn find_one_and_update(
            &self,
            _: &Context,
            _: &Filter,
            _: &Patch,
            _: FindOneAndUpdateOptions,
        ) -> StoreResult<Option<Document>> {
            Err(StoreError::Io(std::io::ErrorKind::ConnectionRefused.into()))
        }

        fn delete_one(&self, _: &Context, _: &Filter) -> StoreResult<bool> {
            Err(StoreError::Io(std::io::ErrorKind::ConnectionRefused.into()))
        }

        fn count(&self, _: &Context) -> StoreResult<u64> {
            Err(StoreError::Io(std::io::ErrorKind::ConnectionRefused.into()))
        }
    }

    #[test]
    fn test_initialize_version() {
        for (input, expected) in [(0, 1), (1, 1), (7, 7), (-3, -3)] {
            let mut version = input;
            initialize_version(&mut version);
            assert_eq!(version, expected, "input {}", input);
        }
    }

    #[test]
    fn test_insert_versioned_starts_at_one() {
        let store = MemoryStore::new();
        let doc = insert_versioned(&ctx(), &store, Document::with_id("n")).unwrap();

        assert_eq!(doc.version(), Some(1));
        assert_eq!(stored(&store, "n").version(), Some(1));
    }

    #[test]
    fn test_conditional_filter_replaces_caller_version() {
        let filter = Filter::by_id("a").eq(VERSION_FIELD, 99);
        let composed = conditional_filter(&filter, 5);

        assert_eq!(composed.get(VERSION_FIELD), Some(&json!(5)));
        assert_eq!(filter.get(VERSION_FIELD), Some(&json!(99)));
    }

    #[test]
    fn test_success_bumps_version() {
        for store in stores() {
            let updated = update_if_current(
                &ctx(),
                store.as_ref(),
                &Filter::by_id("a"),
                &Patch::new().set("name", "x"),
                5,
            )
            .unwrap();

            assert_eq!(updated.version(), Some(6));
            assert_eq!(updated.get("name"), Some(&json!("x")));
            assert_eq!(stored(store.as_ref(), "a"), updated);
        }
    }

    #[test]
    fn test_stale_version_conflicts_without_mutation() {
        for store in stores() {
            update_if_current(
                &ctx(),
                store.as_ref(),
                &Filter::by_id("a"),
                &Patch::new().set("name", "first"),
                5,
            )
            .unwrap();

            let err = update_if_current(
                &ctx(),
                store.as_ref(),
                &Filter::by_id("a"),
                &Patch::new().set("name", "x"),
                5,
            )
            .unwrap_err();

            assert!(matches!(err, UpdateError::VersionConflict { expected: 5 }));
            assert!(err.is_conflict());
            assert!(err.is_recoverable());

            let doc = stored(store.as_ref(), "a");
            assert_eq!(doc.version(), Some(6));
            assert_eq!(doc.get("name"), Some(&json!("first")));
        }
    }

    #[test]
    fn test_missing_document_is_a_conflict() {
        for store in stores() {
            for expected in [0, 1, 5] {
                let err = update_if_current(
                    &ctx(),
                    store.as_ref(),
                    &Filter::by_id("nope"),
                    &Patch::new().set("name", "x"),
                    expected,
                )
                .unwrap_err();
                assert!(err.is_conflict());
            }
            assert_eq!(store.count(&ctx()).unwrap(), 1);
        }
    }

    #[test]
    fn test_versions_increase_without_gaps() {
        for store in stores() {
            let mut seen = Vec::new();
            let mut expected = 5;
            for i in 0..10 {
                let doc = update_if_current(
                    &ctx(),
                    store.as_ref(),
                    &Filter::by_id("a"),
                    &Patch::new().set("step", i),
                    expected,
                )
                .unwrap();
                expected = doc.version().unwrap();
                seen.push(expected);
            }
            assert_eq!(seen, (6..=15).collect::<Vec<i64>>());
        }
    }

    #[test]
    fn test_caller_inputs_untouched() {
        let store = seeded(MemoryStore::new());
        let filter = Filter::by_id("a");
        let patch = Patch::new().set("name", "x");
        let (filter_before, patch_before) = (filter.clone(), patch.clone());

        update_if_current(&ctx(), &store, &filter, &patch, 5).unwrap();

        assert_eq!(filter, filter_before);
        assert_eq!(patch, patch_before);
    }

    #[test]
    fn test_patch_touching_version_is_rejected() {
        for store in stores() {
            let err = update_if_current(
                &ctx(),
                store.as_ref(),
                &Filter::by_id("a"),
                &Patch::new().set("name", "x").set(VERSION_FIELD, 100),
                5,
            )
            .unwrap_err();

            assert!(matches!(err, UpdateError::Store(StoreError::InvalidPatch { .. })));
            let doc = stored(store.as_ref(), "a");
            assert_eq!(doc.version(), Some(5));
            assert_eq!(doc.get("name"), Some(&json!("orig")));
        }
    }

    #[test]
    fn test_store_error_passes_through() {
        let err = update_if_current(
            &ctx(),
            &UnreachableStore,
            &Filter::by_id("a"),
            &Patch::new(),
            1,
        )
        .unwrap_err();

        assert!(!err.is_conflict());
        assert!(matches!(err, UpdateError::Store(StoreError::Io(_))));
    }

    #[test]
    fn test_deadline_exceeded_passes_through() {
        for store in stores() {
            let expired = Context::with_deadline(Instant::now());
            let err = update_if_current(
                &expired,
                store.as_ref(),
                &Filter::by_id("a"),
                &Patch::new().set("name", "x"),
                5,
            )
            .unwrap_err();

            assert!(matches!(err, UpdateError::Store(StoreError::DeadlineExceeded)));
            assert!(!err.is_conflict());

            let doc = stored(store.as_ref(), "a");
            assert_eq!(doc.version(), Some(5));
            assert_eq!(doc.get("name"), Some(&json!("orig")));
        }
    }

    #[test]
    fn test_cancelled_context_passes_through() {
        let store = seeded(MemoryStore::new());
        let cancelled = Context::background();
        cancelled.cancel_handle().cancel();

        let err = update_if_current(&cancelled, &store, &Filter::by_id("a"), &Patch::new(), 5)
            .unwrap_err();
        assert!(matches!(err, UpdateError::Store(StoreError::Cancelled)));
        assert_eq!(stored(&store, "a").version(), Some(5));
    }

    #[test]
    fn test_deadline_during_lock_wait_leaves_document_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locked.db");
        let store = seeded(SqliteStore::open(&path, "docs").unwrap());

        let blocker = rusqlite::Connection::open(&path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let started = Instant::now();
        let err = update_if_current(
            &Context::with_timeout(std::time::Duration::from_millis(60)),
            &store,
            &Filter::by_id("a"),
            &Patch::new().set("name", "late"),
            5,
        )
        .unwrap_err();

        assert!(matches!(err, UpdateError::Store(StoreError::DeadlineExceeded)));
        assert!(err.is_recoverable());
        assert!(started.elapsed() >= std::time::Duration::from_millis(60));

        blocker.execute_batch("ROLLBACK").unwrap();
        let doc = stored(&store, "a");
        assert_eq!(doc.version(), Some(5));
        assert_eq!(doc.get("name"), Some(&json!("orig")));
    }

    #[test]
    fn test_whole_float_version_stays_integral() {
        for store in [
            Box::new(MemoryStore::new()) as Box<dyn DocumentStore>,
            Box::new(SqliteStore::open_in_memory("docs").unwrap()),
        ] {
            store
                .insert_one(&ctx(), Document::try_from(json!({"_id": "f", "version": 5.0})).unwrap())
                .unwrap();

            let updated =
                update_if_current(&ctx(), store.as_ref(), &Filter::by_id("f"), &Patch::new(), 5)
                    .unwrap();
            assert_eq!(updated.version(), Some(6));
            assert_eq!(stored(store.as_ref(), "f").version(), Some(6));
        }
    }

    /// Race `writers` threads at version 5 and return (winners, conflicts)
    fn race(store: Arc<dyn DocumentStore>, writers: usize) -> (Vec<Document>, usize) {
        let barrier = Arc::new(Barrier::new(writers));
        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    update_if_current(
                        &Context::background(),
                        store.as_ref(),
                        &Filter::by_id("a"),
                        &Patch::new().set("writer", i as i64),
                        5,
                    )
                })
            })
            .collect();

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for handle in handles {
            match handle.join().unwrap() {
                Ok(doc) => winners.push(doc),
                Err(UpdateError::VersionConflict { expected: 5 }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        (winners, conflicts)
    }

    #[test]
    fn test_race_has_one_winner_memory() {
        let store: Arc<dyn DocumentStore> = Arc::new(seeded(MemoryStore::new()));
        let (winners, conflicts) = race(Arc::clone(&store), 16);

        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 15);
        assert_eq!(winners[0].version(), Some(6));
        assert_eq!(stored(store.as_ref(), "a"), winners[0]);
    }

    #[test]
    fn test_race_has_one_winner_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("race.db");
        let store: Arc<dyn DocumentStore> =
            Arc::new(seeded(SqliteStore::open(&path, "docs").unwrap()));

        let (winners, conflicts) = race(Arc::clone(&store), 8);

        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 7);
        assert_eq!(winners[0].version(), Some(6));
    }

    #[test]
    fn test_race_across_connections_has_one_winner() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("race.db");
        seeded(SqliteStore::open(&path, "docs").unwrap());

        let writers = 6;
        let barrier = Arc::new(Barrier::new(writers));
        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let store = SqliteStore::open(&path, "docs").unwrap();
                    barrier.wait();
                    update_if_current(
                        &Context::background(),
                        &store,
                        &Filter::by_id("a"),
                        &Patch::new().set("writer", i as i64),
                        5,
                    )
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_conflict()))
            .count();

        assert_eq!(winners, 1);
        assert_eq!(conflicts, writers - 1);

        let store = SqliteStore::open(&path, "docs").unwrap();
        assert_eq!(stored(&store, "a").version(), Some(6));
    }
}
