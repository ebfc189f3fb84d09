//! Inventory CLI
//!
//! Command-line interface for inspecting and editing an inventory store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use inventory_core::{Config, Registry, Store};

mod commands;
mod output;
mod resource;

use commands::resource::Filter;
use output::{Output, OutputFormat};
use resource::Resource;

#[derive(Parser)]
#[command(name = "inventory")]
#[command(about = "Inventory - labeled resources in a local transactional store")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (default: ~/.config/inventory/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store file and schema
    Init {
        /// Delete any existing store first
        #[arg(long)]
        purge: bool,
    },
    /// Create a new resource
    #[command(alias = "create")]
    Add {
        /// Resource name
        name: String,
        /// Resource class
        #[arg(short, long, default_value = "generic")]
        class: String,
        /// Labels (name=value, repeatable)
        #[arg(short, long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },
    /// List resources
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Sort by field
        #[arg(long)]
        sort: Option<String>,
        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,
        /// Skip this many rows
        #[arg(long)]
        offset: Option<u64>,
        /// Return at most this many rows
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Show resource details
    Show {
        /// Resource ID (full UUID or prefix)
        id: String,
    },
    /// Set or remove labels
    Relabel {
        /// Resource ID (full UUID or prefix)
        id: String,
        /// Labels to set (name=value, repeatable)
        #[arg(short, long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
        /// Label names to remove
        #[arg(short, long)]
        remove: Vec<String>,
    },
    /// Delete a resource
    #[command(alias = "rm")]
    Delete {
        /// Resource ID (full UUID or prefix)
        id: String,
    },
    /// Count resources
    Count {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show store location and counts
    Status,
    /// Show configuration
    Config,
}

#[derive(clap::Args, Clone)]
struct FilterArgs {
    /// Require label (name=value, repeatable)
    #[arg(short, long = "label", value_parser = parse_label)]
    labels: Vec<(String, String)>,
    /// Require class
    #[arg(short, long)]
    class: Option<String>,
    /// Name pattern (SQL LIKE, e.g. "web-%")
    #[arg(short, long)]
    name: Option<String>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Filter {
            labels: args.labels,
            class: args.class,
            name: args.name,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config_path = commands::config::effective_path(cli.config.as_ref());
    let mut config = Config::load_from_path(&config_path).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // Commands that don't need the store
    if let Commands::Config = cli.command {
        return commands::config::show(&config, &config_path, &output);
    }

    let purge = matches!(cli.command, Commands::Init { purge: true });
    let store = Store::new(config, Registry::new().register::<Resource>());
    store
        .open(purge)
        .with_context(|| format!("Failed to open store at {}", store.path().display()))?;

    let result = match cli.command {
        Commands::Init { .. } => {
            output.success(&format!("Initialized store at {}", store.path().display()));
            Ok(())
        }
        Commands::Add {
            name,
            class,
            labels,
        } => commands::resource::add(&store, name, class, labels, &output),
        Commands::List {
            filter,
            sort,
            desc,
            offset,
            limit,
        } => commands::resource::list(
            &store,
            &filter.into(),
            sort,
            desc,
            offset,
            limit,
            &output,
        ),
        Commands::Show { id } => commands::resource::show(&store, &id, &output),
        Commands::Relabel { id, labels, remove } => {
            commands::resource::relabel(&store, &id, labels, remove, &output)
        }
        Commands::Delete { id } => commands::resource::delete(&store, &id, &output),
        Commands::Count { filter } => commands::resource::count(&store, &filter.into(), &output),
        Commands::Status => commands::status::show(&store, &output),
        Commands::Config => unreachable!(), // Handled above
    };

    store.close(false).context("Failed to close store")?;
    result
}

/// Install the stderr log subscriber
///
/// `RUST_LOG` wins over `--log-level` when set.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("inventory_core={0},inventory_cli={0}", level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Parse a `name=value` label argument
fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected name=value, got '{}'", s)),
    }
}
