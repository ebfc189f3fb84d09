//! Config command handlers

use std::path::{Path, PathBuf};

use anyhow::Result;

use inventory_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Quiet => {
            println!("{}", config.db_path.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  db_path:           {}", config.db_path.display());
            println!("  busy_timeout_ms:   {}", config.busy_timeout_ms);
            println!("  read_pool_size:    {}", config.read_pool_size);
            println!(
                "  lease_timeout_ms:  {}",
                config
                    .lease_timeout_ms
                    .map(|ms| ms.to_string())
                    .unwrap_or_else(|| "(wait forever)".to_string())
            );
            println!("  watch_queue_depth: {}", config.watch_queue_depth);
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Config file in effect: the `--config` flag or the default location
pub fn effective_path(cli_path: Option<&PathBuf>) -> PathBuf {
    cli_path.cloned().unwrap_or_else(Config::config_file_path)
}
