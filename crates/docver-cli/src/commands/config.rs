//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use docver_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "collection": config.collection,
                    "busy_timeout_ms": config.busy_timeout_ms,
                    "request_timeout_ms": config.request_timeout_ms,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!("  collection:         {}", config.collection);
            println!("  busy_timeout_ms:    {}", config.busy_timeout_ms);
            println!(
                "  request_timeout_ms: {}",
                config
                    .request_timeout_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  log_file:           {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let unset = value.is_empty() || value == "none";

    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "collection" => {
            if value.is_empty() {
                bail!("collection cannot be empty");
            }
            config.collection = value.to_string();
        }
        "busy_timeout_ms" => {
            config.busy_timeout_ms = value
                .parse()
                .context("Invalid value for busy_timeout_ms. Use a number of milliseconds.")?;
        }
        "request_timeout_ms" => {
            config.request_timeout_ms = if unset {
                None
            } else {
                Some(value.parse().context(
                    "Invalid value for request_timeout_ms. Use a number of milliseconds or 'none'.",
                )?)
            };
        }
        "log_file" => {
            config.log_file = if unset { None } else { Some(value.into()) };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, collection, busy_timeout_ms, request_timeout_ms, log_file",
                key
            );
        }
    }

    Ok(())
}
