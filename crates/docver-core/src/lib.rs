//! docver core library
//!
//! Optimistic concurrency control for documents in a document store. Each
//! document carries a `version`; writers state the version they last read
//! and an update only lands while that version is still current.
//!
//! # Quick Start
//!
//! ```text
//! let store = SqliteStore::open_with_config(&Config::load()?)?;
//! let ctx = Context::with_timeout(Duration::from_secs(2));
//!
//! // First revision is stored at version 1
//! let doc = insert_versioned(&ctx, &store, Document::with_id("acc-1"))?;
//!
//! // Only succeeds while the document is still at version 1
//! let patch = Patch::new().set("owner", "kim");
//! let updated = update_if_current(&ctx, &store, &Filter::by_id("acc-1"), &patch, 1)?;
//! assert_eq!(updated.version(), Some(2));
//! ```
//!
//! # Modules
//!
//! - `versioning`: version initializer and conditional updater (main entry point)
//! - `document`: the document type and the `Versioned` trait
//! - `query`: filters and patches
//! - `context`: deadlines and cancellation
//! - `store`: the `DocumentStore` trait with in-memory and SQLite stores
//! - `config`: application configuration

pub mod config;
pub mod context;
pub mod document;
pub mod query;
pub mod store;
pub mod versioning;

pub use config::Config;
pub use context::{CancelHandle, Context};
pub use document::{Document, Versioned, ID_FIELD, VERSION_FIELD};
pub use query::{Filter, Patch, PatchOp};
pub use store::{
    DocumentStore, FindOneAndUpdateOptions, MemoryStore, ReturnDocument, SqliteStore, StoreError,
    StoreResult,
};
pub use versioning::{
    conditional_filter, conditional_patch, initialize_version, insert_versioned,
    update_if_current, UpdateError, UpdateResult,
};
