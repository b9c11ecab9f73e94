//! Status command handler

use anyhow::Result;

use docver_core::{Config, Context, DocumentStore, SqliteStore};

use crate::output::{Output, OutputFormat};

/// Show status information
pub fn show(store: &SqliteStore, config: &Config, ctx: &Context, output: &Output) -> Result<()> {
    let count = store.count(ctx)?;
    let database = store
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string());

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "database": database,
                    "collection": store.collection(),
                    "documents": count,
                    "busy_timeout_ms": config.busy_timeout_ms,
                    "request_timeout_ms": config.request_timeout_ms,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", count);
        }
        OutputFormat::Human => {
            println!("docver Status");
            println!("=============");
            println!();
            println!("Storage:");
            println!("  Database:   {}", database);
            println!("  Collection: {}", store.collection());
            println!("  Documents:  {}", count);
            println!();
            println!("Timeouts:");
            println!("  Lock wait: {} ms", config.busy_timeout_ms);
            match config.request_timeout_ms {
                Some(ms) => println!("  Request:   {} ms", ms),
                None => println!("  Request:   (none)"),
            }
        }
    }

    Ok(())
}
