//! docver CLI
//!
//! Command-line interface for versioned documents with optimistic
//! concurrency control.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docver_core::{Config, Context, SqliteStore};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "docver")]
#[command(about = "docver - versioned documents with optimistic concurrency control")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a specific config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deadline for each store request, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert a new document (stored at version 1)
    #[command(alias = "add")]
    Insert {
        /// Document as a JSON object; "_id" is generated when missing
        json: String,
    },
    /// Show a document
    Get {
        /// Document ID
        id: String,
    },
    /// Update a document if it is still at the expected version
    Update {
        /// Document ID
        id: String,
        /// Version you last read
        #[arg(short, long)]
        expect: i64,
        /// Set a field (key=value, value parsed as JSON)
        #[arg(short, long)]
        set: Vec<String>,
        /// Remove a field
        #[arg(short, long)]
        unset: Vec<String>,
        /// Increment a numeric field (key=number)
        #[arg(short, long)]
        inc: Vec<String>,
    },
    /// Delete a document
    #[command(alias = "rm")]
    Delete {
        /// Document ID
        id: String,
    },
    /// Fire concurrent conditional updates at one document
    Race {
        /// Document ID
        id: String,
        /// Number of concurrent writers
        #[arg(short, long, default_value_t = 8)]
        writers: usize,
        /// Set a field (key=value, value parsed as JSON)
        #[arg(short, long)]
        set: Vec<String>,
    },
    /// Show status (database, collection, document count)
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Value to set
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return match command.clone().unwrap_or(ConfigCommands::Show) {
            ConfigCommands::Show => commands::config::show(cli.config.as_ref(), &output),
            ConfigCommands::Set { key, value } => {
                commands::config::set(key, value, cli.config.as_ref(), &output)
            }
        };
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    init_logging(&config, cli.verbose);

    let store = SqliteStore::open_with_config(&config).with_context(|| {
        format!("Failed to open document store at {:?}", config.sqlite_path())
    })?;
    let timeout = cli
        .timeout_ms
        .map(Duration::from_millis)
        .or(config.request_timeout());
    let ctx = request_context(timeout);

    match cli.command {
        Commands::Insert { json } => commands::doc::insert(&store, &ctx, &json, &output),
        Commands::Get { id } => commands::doc::get(&store, &ctx, &id, &output),
        Commands::Update {
            id,
            expect,
            set,
            unset,
            inc,
        } => {
            let patch = commands::build_patch(&set, &unset, &inc)?;
            commands::doc::update(&store, &ctx, &id, &patch, expect, &output)
        }
        Commands::Delete { id } => commands::doc::delete(&store, &ctx, &id, &output),
        Commands::Race { id, writers, set } => {
            let patch = commands::build_patch(&set, &[], &[])?;
            let report =
                commands::race::run(Arc::new(store), &ctx, &id, writers, &patch).await?;
            commands::race::print(&report, &output);
            Ok(())
        }
        Commands::Status => commands::status::show(&store, &config, &ctx, &output),
        // Handled before the store is opened
        Commands::Config { .. } => Ok(()),
    }
}

fn request_context(timeout: Option<Duration>) -> Context {
    match timeout {
        Some(timeout) => Context::with_timeout(timeout),
        None => Context::background(),
    }
}

/// Initialize logging to stderr, or to the configured log file
///
/// `RUST_LOG` wins over the `-v` count when set.
fn init_logging(config: &Config, verbose: u8) {
    let log_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("docver_core={},docver_cli={}", log_level, log_level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    // Ignore error if already initialized
    match &config.log_file {
        Some(path) => match File::create(path) {
            Ok(file) => {
                let _ = builder.with_ansi(false).with_writer(Arc::new(file)).try_init();
            }
            Err(e) => {
                eprintln!("Warning: Could not create log file {:?}: {}", path, e);
            }
        },
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_update() {
        let cli = Cli::parse_from([
            "docver", "update", "a", "--expect", "3", "--set", "name=kim", "--inc", "n=1",
        ]);
        match cli.command {
            Commands::Update {
                id,
                expect,
                set,
                inc,
                ..
            } => {
                assert_eq!(id, "a");
                assert_eq!(expect, 3);
                assert_eq!(set, vec!["name=kim"]);
                assert_eq!(inc, vec!["n=1"]);
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_request_context() {
        assert!(request_context(None).deadline().is_none());
        assert!(request_context(Some(Duration::from_secs(1))).deadline().is_some());
    }
}
