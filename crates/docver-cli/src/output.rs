//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use docver_core::Document;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a single document
    pub fn print_document(&self, doc: &Document) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:      {}", doc.id().unwrap_or("(none)"));
                match doc.version() {
                    Some(v) => println!("Version: {}", v),
                    None => println!("Version: (unset)"),
                }
                let mut fields: Vec<_> = doc
                    .as_map()
                    .iter()
                    .filter(|(k, _)| !is_managed_field(k))
                    .collect();
                fields.sort_by(|a, b| a.0.cmp(b.0));
                if !fields.is_empty() {
                    println!();
                    for (key, value) in fields {
                        println!("  {}: {}", key, value);
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::Value::from(doc.clone()));
            }
            OutputFormat::Quiet => {
                println!("{} {}", doc.id().unwrap_or(""), doc.version().unwrap_or(0));
            }
        }
    }

    /// Print a success message (suppressed in quiet and JSON modes)
    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Human {
            println!("{}", message);
        }
    }
}

fn is_managed_field(key: &str) -> bool {
    key == docver_core::ID_FIELD || key == docver_core::VERSION_FIELD
}
