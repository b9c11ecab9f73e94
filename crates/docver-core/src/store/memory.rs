//! In-memory document store
//!
//! Documents live in a `Vec` behind a single mutex, which makes every
//! operation atomic with respect to every other. Insertion order is kept so
//! `find_one` behaves like a natural-order scan.
//!
//! Waiting for the mutex ignores the context deadline. A request that
//! expires while it waits still fails at the check before its write lands,
//! so the deadline bounds what is written, not how long the call takes.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{
    ensure_id, patched_images, DocumentStore, FindOneAndUpdateOptions, StoreError, StoreResult,
};
use crate::context::Context;
use crate::document::Document;
use crate::query::{Filter, Patch};

/// Process-local document store
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Vec<Document>>> {
        self.docs.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl DocumentStore for MemoryStore {
    fn insert_one(&self, ctx: &Context, mut doc: Document) -> StoreResult<Document> {
        ctx.check()?;
        let id = ensure_id(&mut doc)?;

        let mut docs = self.lock()?;
        if docs.iter().any(|d| d.id() == Some(id.as_str())) {
            return Err(StoreError::DuplicateKey { id });
        }
        ctx.check()?;
        docs.push(doc.clone());
        debug!("Inserted document {}", id);
        Ok(doc)
    }

    fn find_one(&self, ctx: &Context, filter: &Filter) -> StoreResult<Option<Document>> {
        ctx.check()?;
        let docs = self.lock()?;
        Ok(docs.iter().find(|d| filter.matches(d)).cloned())
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: &Filter,
        patch: &Patch,
        options: FindOneAndUpdateOptions,
    ) -> StoreResult<Option<Document>> {
        ctx.check()?;
        let mut docs = self.lock()?;

        let Some(slot) = docs.iter_mut().find(|d| filter.matches(d)) else {
            return Ok(None);
        };

        let (updated, returned) = patched_images(slot.clone(), patch, options)?;
        ctx.check()?;
        *slot = updated;
        Ok(Some(returned))
    }

    fn delete_one(&self, ctx: &Context, filter: &Filter) -> StoreResult<bool> {
        ctx.check()?;
        let mut docs = self.lock()?;
        match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn count(&self, ctx: &Context) -> StoreResult<u64> {
        ctx.check()?;
        Ok(self.lock()?.len() as u64)
    }
}
