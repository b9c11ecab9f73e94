//! Document stores
//!
//! The conditional updater talks to a store through [`DocumentStore`]. The
//! store owns atomicity: `find_one_and_update` must locate, patch and persist
//! a document as one indivisible step, so that concurrent conditional updates
//! against the same document are serialized.
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: process-local, guarded by a mutex
//! - [`SqliteStore`]: durable, one `BEGIN IMMEDIATE` transaction per update

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use crate::context::Context;
use crate::document::{Document, ID_FIELD};
use crate::query::{Filter, Patch};

/// Which image of the document `find_one_and_update` returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the patch
    #[default]
    Before,
    /// The document as it is after the patch
    After,
}

/// Options for [`DocumentStore::find_one_and_update`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOneAndUpdateOptions {
    pub return_document: ReturnDocument,
}

impl FindOneAndUpdateOptions {
    /// Options asking for the post-image
    pub fn return_after() -> Self {
        Self {
            return_document: ReturnDocument::After,
        }
    }
}

/// A document-oriented data store
///
/// "No document matched" is reported as `Ok(None)`; `Err` is reserved for
/// real failures.
pub trait DocumentStore: Send + Sync {
    /// Insert a new document, assigning a random `_id` when it has none
    fn insert_one(&self, ctx: &Context, doc: Document) -> StoreResult<Document>;

    /// The first document matching `filter`, in insertion order
    fn find_one(&self, ctx: &Context, filter: &Filter) -> StoreResult<Option<Document>>;

    /// Atomically patch the first document matching `filter`
    fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: &Filter,
        patch: &Patch,
        options: FindOneAndUpdateOptions,
    ) -> StoreResult<Option<Document>>;

    /// Delete the first document matching `filter`; `false` when none matched
    fn delete_one(&self, ctx: &Context, filter: &Filter) -> StoreResult<bool>;

    /// Number of documents in the store
    fn count(&self, ctx: &Context) -> StoreResult<u64>;
}

/// Give `doc` a random `_id` if it lacks one, returning the identity
pub(crate) fn ensure_id(doc: &mut Document) -> StoreResult<String> {
    if let Some(id) = doc.id() {
        return Ok(id.to_string());
    }
    if doc.contains(ID_FIELD) {
        return Err(StoreError::InvalidDocument {
            details: "_id must be a string".to_string(),
        });
    }
    let id = uuid::Uuid::new_v4().to_string();
    doc.set(ID_FIELD, id.clone());
    Ok(id)
}

/// Patch `current` and pick the image the caller asked for
///
/// Returns the document to persist and the document to hand back.
pub(crate) fn patched_images(
    current: Document,
    patch: &Patch,
    options: FindOneAndUpdateOptions,
) -> StoreResult<(Document, Document)> {
    let mut updated = current.clone();
    patch.apply(&mut updated)?;
    let returned = match options.return_document {
        ReturnDocument::Before => current,
        ReturnDocument::After => updated.clone(),
    };
    Ok((updated, returned))
}
