//! SQLite document store
//!
//! Durable store backed by a single SQLite file. Several collections can
//! share one file; each `SqliteStore` handle is bound to one collection.
//!
//! ## Atomicity
//!
//! Every mutation runs inside a `BEGIN IMMEDIATE` transaction, which takes
//! the database write lock up front. The match, the patch and the write
//! therefore happen with no other writer in between, whether that writer is
//! another thread, another connection or another process. The request
//! context is checked once more before `COMMIT`; if it has expired the
//! transaction rolls back and nothing is written.
//!
//! Lock waits are bounded by `busy_timeout`, shortened to the context's
//! remaining time when that is smaller. A wait cut short by the deadline
//! reports `DeadlineExceeded`, not the raw busy error.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior,
};
use tracing::debug;

use super::error::is_busy;
use super::schema::{init_schema, needs_init};
use super::{
    ensure_id, patched_images, DocumentStore, FindOneAndUpdateOptions, StoreError, StoreResult,
};
use crate::config::Config;
use crate::context::Context;
use crate::document::Document;
use crate::query::{Filter, Patch};

/// Default wait for the database write lock
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Document store persisted in SQLite
pub struct SqliteStore {
    conn: Mutex<Connection>,
    collection: String,
    busy_timeout: Duration,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the database and collection named in the configuration
    pub fn open_with_config(config: &Config) -> StoreResult<Self> {
        let mut store = Self::open(config.sqlite_path(), &config.collection)?;
        store.busy_timeout = config.busy_timeout();
        Ok(store)
    }

    /// Open or create the database at `path`, bound to `collection`
    pub fn open(path: impl AsRef<Path>, collection: &str) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        debug!("Opened {:?} (journal_mode={})", path, mode);

        Self::with_connection(conn, collection, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database (for testing)
    pub fn open_in_memory(collection: &str) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection, None)
    }

    fn with_connection(
        conn: Connection,
        collection: &str,
        path: Option<PathBuf>,
    ) -> StoreResult<Self> {
        if needs_init(&conn) {
            init_schema(&conn)?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            path,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Start a write transaction, waiting at most until the context deadline
    fn begin_write<'c>(
        &self,
        ctx: &Context,
        conn: &'c mut Connection,
    ) -> StoreResult<Transaction<'c>> {
        // SQLite counts whole milliseconds; round up so the wait never ends
        // before the deadline does
        let (wait, capped) = match ctx.remaining() {
            Some(remaining) if remaining < self.busy_timeout => (ceil_millis(remaining), true),
            _ => (self.busy_timeout, false),
        };
        conn.busy_timeout(wait)?;

        conn.transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| match ctx.check() {
                Err(expired) => expired,
                Ok(()) if capped && is_busy(&e) => StoreError::DeadlineExceeded,
                Ok(()) => StoreError::Database(e),
            })
    }
}

fn ceil_millis(duration: Duration) -> Duration {
    let millis = duration.as_millis() as u64;
    if duration.subsec_nanos() % 1_000_000 == 0 {
        Duration::from_millis(millis)
    } else {
        Duration::from_millis(millis + 1)
    }
}

impl DocumentStore for SqliteStore {
    fn insert_one(&self, ctx: &Context, mut doc: Document) -> StoreResult<Document> {
        ctx.check()?;
        let id = ensure_id(&mut doc)?;
        let body = serde_json::to_string(&doc)?;

        let mut conn = self.lock()?;
        let tx = self.begin_write(ctx, &mut conn)?;
        let inserted = tx.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)",
            params![self.collection, id, body],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::DuplicateKey { id });
            }
            Err(e) => return Err(e.into()),
        }

        ctx.check()?;
        tx.commit()?;
        debug!("Inserted document {} into {}", id, self.collection);
        Ok(doc)
    }

    fn find_one(&self, ctx: &Context, filter: &Filter) -> StoreResult<Option<Document>> {
        ctx.check()?;
        let conn = self.lock()?;
        Ok(find_row(&conn, &self.collection, filter)?.map(|(_, doc)| doc))
    }

    fn find_one_and_update(
        &self,
        ctx: &Context,
        filter: &Filter,
        patch: &Patch,
        options: FindOneAndUpdateOptions,
    ) -> StoreResult<Option<Document>> {
        ctx.check()?;
        let mut conn = self.lock()?;
        let tx = self.begin_write(ctx, &mut conn)?;

        let Some((seq, current)) = find_row(&tx, &self.collection, filter)? else {
            return Ok(None);
        };

        let (updated, returned) = patched_images(current, patch, options)?;
        tx.execute(
            "UPDATE documents SET body = ?1 WHERE seq = ?2",
            params![serde_json::to_string(&updated)?, seq],
        )?;

        ctx.check()?;
        tx.commit()?;
        Ok(Some(returned))
    }

    fn delete_one(&self, ctx: &Context, filter: &Filter) -> StoreResult<bool> {
        ctx.check()?;
        let mut conn = self.lock()?;
        let tx = self.begin_write(ctx, &mut conn)?;

        let Some((seq, _)) = find_row(&tx, &self.collection, filter)? else {
            return Ok(false);
        };
        tx.execute("DELETE FROM documents WHERE seq = ?1", params![seq])?;

        ctx.check()?;
        tx.commit()?;
        Ok(true)
    }

    fn count(&self, ctx: &Context) -> StoreResult<u64> {
        ctx.check()?;
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Find the first matching row, returning its sequence number and document
///
/// A string `_id` constraint goes through the unique index; anything else
/// scans the collection in insertion order.
fn find_row(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
) -> StoreResult<Option<(i64, Document)>> {
    if let Some(id) = filter.id() {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        return match row {
            Some((seq, body)) => {
                let doc = decode(id, &body)?;
                Ok(filter.matches(&doc).then_some((seq, doc)))
            }
            None => Ok(None),
        };
    }

    let mut stmt = conn
        .prepare("SELECT seq, id, body FROM documents WHERE collection = ?1 ORDER BY seq")?;
    let mut rows = stmt.query(params![collection])?;

    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let id: String = row.get(1)?;
        let body: String = row.get(2)?;

        let doc = decode(&id, &body)?;
        if filter.matches(&doc) {
            return Ok(Some((seq, doc)));
        }
    }

    Ok(None)
}

fn decode(id: &str, body: &str) -> StoreResult<Document> {
    serde_json::from_str(body).map_err(|e| StoreError::CorruptDocument {
        id: id.to_string(),
        details: e.to_string(),
    })
}
