//! Race command handler
//!
//! Reads a document's current version and fires several conditional updates
//! at it at once. Exactly one should win; the rest report a conflict.

use std::sync::{Arc, Barrier};

use anyhow::{anyhow, bail, Context as _, Result};
use tracing::{debug, info};

use docver_core::{update_if_current, Context, DocumentStore, Filter, Patch, UpdateError};

use crate::output::{Output, OutputFormat};

/// Every writer holds a blocking-pool thread until the barrier releases
const MAX_WRITERS: usize = 256;

/// Outcome of one race
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RaceReport {
    pub expected: i64,
    /// Writer index and the version it produced
    pub winners: Vec<(usize, i64)>,
    pub conflicts: usize,
    pub failures: Vec<String>,
}

/// Run `writers` concurrent conditional updates against one document
pub async fn run(
    store: Arc<dyn DocumentStore>,
    ctx: &Context,
    id: &str,
    writers: usize,
    patch: &Patch,
) -> Result<RaceReport> {
    if writers == 0 || writers > MAX_WRITERS {
        bail!("--writers must be between 1 and {}", MAX_WRITERS);
    }

    let current = store
        .find_one(ctx, &Filter::by_id(id))?
        .ok_or_else(|| anyhow!("Document not found: {}", id))?;
    let expected = current
        .version()
        .ok_or_else(|| anyhow!("Document '{}' has no integer version", id))?;

    info!("Racing {} writers at version {} of {}", writers, expected, id);

    let barrier = Arc::new(Barrier::new(writers));
    let mut tasks = Vec::with_capacity(writers);
    for writer in 0..writers {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        let ctx = ctx.clone();
        let filter = Filter::by_id(id);
        let patch = patch.and_inc("race_writes", 1);

        tasks.push(tokio::task::spawn_blocking(move || {
            barrier.wait();
            (
                writer,
                update_if_current(&ctx, store.as_ref(), &filter, &patch, expected),
            )
        }));
    }

    let mut report = RaceReport {
        expected,
        ..RaceReport::default()
    };
    for task in tasks {
        let (writer, result) = task.await.context("Writer task panicked")?;
        match result {
            Ok(doc) => {
                debug!("Writer {} won", writer);
                report.winners.push((writer, doc.version().unwrap_or_default()));
            }
            Err(UpdateError::VersionConflict { .. }) => {
                debug!("Writer {} lost", writer);
                report.conflicts += 1;
            }
            Err(e) => report.failures.push(format!("writer {}: {}", writer, e)),
        }
    }

    Ok(report)
}

/// Print a race report
pub fn print(report: &RaceReport, output: &Output) {
    match output.format {
        OutputFormat::Json => {
            let winners: Vec<_> = report
                .winners
                .iter()
                .map(|(writer, version)| serde_json::json!({"writer": writer, "version": version}))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "expected_version": report.expected,
                    "winners": winners,
                    "conflicts": report.conflicts,
                    "failures": report.failures,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{} {}", report.winners.len(), report.conflicts);
        }
        OutputFormat::Human => {
            println!("Race at version {}", report.expected);
            for (writer, version) in &report.winners {
                println!("  Winner:    writer {} -> version {}", writer, version);
            }
            println!("  Conflicts: {}", report.conflicts);
            for failure in &report.failures {
                println!("  Failed:    {}", failure);
            }
        }
    }
}
