//! Document command handlers

use anyhow::{anyhow, bail, Context as _, Result};
use tracing::info;

use docver_core::{
    insert_versioned, update_if_current, Context, Document, DocumentStore, Filter, Patch,
    UpdateError,
};

use crate::output::Output;

/// Insert a new document at version 1
pub fn insert(
    store: &dyn DocumentStore,
    ctx: &Context,
    json: &str,
    output: &Output,
) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("Document is not valid JSON")?;
    let doc = Document::try_from(value)?;

    let doc = insert_versioned(ctx, store, doc).context("Failed to insert document")?;
    info!("Inserted {}", doc.id().unwrap_or_default());

    output.success(&format!("Inserted document: {}", doc.id().unwrap_or_default()));
    output.print_document(&doc);
    Ok(())
}

/// Show a document
pub fn get(store: &dyn DocumentStore, ctx: &Context, id: &str, output: &Output) -> Result<()> {
    let doc = store
        .find_one(ctx, &Filter::by_id(id))?
        .ok_or_else(|| anyhow!("Document not found: {}", id))?;

    output.print_document(&doc);
    Ok(())
}

/// Apply a patch if the document is still at `expected`
pub fn update(
    store: &dyn DocumentStore,
    ctx: &Context,
    id: &str,
    patch: &Patch,
    expected: i64,
    output: &Output,
) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to update. Use --set, --unset or --inc.");
    }

    match update_if_current(ctx, store, &Filter::by_id(id), patch, expected) {
        Ok(doc) => {
            info!("Updated {} to version {}", id, doc.version().unwrap_or_default());
            output.success(&format!("Updated document: {}", id));
            output.print_document(&doc);
            Ok(())
        }
        Err(UpdateError::VersionConflict { expected }) => {
            let current = store
                .find_one(ctx, &Filter::by_id(id))
                .ok()
                .flatten()
                .and_then(|doc| doc.version());
            match current {
                Some(current) => bail!(
                    "Version conflict on '{}': expected version {}, current version is {}. \
                     Re-read the document and retry with --expect {}.",
                    id,
                    expected,
                    current,
                    current
                ),
                None => bail!(
                    "Version conflict on '{}': no document at version {} (it may not exist).",
                    id,
                    expected
                ),
            }
        }
        Err(e) => Err(e).context("Failed to update document"),
    }
}

/// Delete a document
pub fn delete(
    store: &dyn DocumentStore,
    ctx: &Context,
    id: &str,
    output: &Output,
) -> Result<()> {
    if !store.delete_one(ctx, &Filter::by_id(id))? {
        bail!("Document not found: {}", id);
    }

    info!("Deleted {}", id);
    output.success(&format!("Deleted document: {}", id));
    Ok(())
}
