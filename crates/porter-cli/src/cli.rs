//! CLI structure and argument parsing for `porter`.
//!
//! Two subcommands drive the toolkit:
//!
//! - `porter migrate` runs the full two-pass migration: scan sources,
//!   download assets, rewrite URLs, import entities.
//! - `porter scan` is the dry run: it lists the asset references a
//!   migration would download, without fetching anything or importing
//!   anything.
//!
//! A run is described either by a TOML config file (`--config`) or by the
//! equivalent flags; flags win over nothing, not over the file — mixing
//! both is rejected to keep runs reproducible.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI for the `porter` command.
#[derive(Debug, Parser)]
#[command(name = "porter", version, about = "Streaming content migration toolkit")]
pub struct Cli {
    /// Enable verbose logging output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Enable debug-level logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The operation to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a migration: download assets, rewrite URLs, import entities
    Migrate(MigrateArgs),
    /// Dry run: list the assets a migration would download
    Scan(ScanArgs),
}

/// How the migration source and URL mapping are described.
#[derive(Debug, Args)]
pub struct RunSpec {
    /// Path to a migration TOML file (exclusive with the individual flags)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Migrate a directory tree of markdown/HTML documents
    #[arg(long, value_name = "DIR", conflicts_with = "config")]
    pub source_dir: Option<PathBuf>,

    /// Migrate a streaming XML export file
    #[arg(long, value_name = "FILE", conflicts_with_all = ["config", "source_dir"])]
    pub wxr: Option<PathBuf>,

    /// Origin the content is migrating away from
    #[arg(long, value_name = "URL", conflicts_with = "config")]
    pub from_url: Option<String>,

    /// Origin of the destination site
    #[arg(long, value_name = "URL", conflicts_with = "config")]
    pub to_url: Option<String>,

    /// Public URL prefix the fetched assets will be served under
    #[arg(long, value_name = "URL", conflicts_with = "config")]
    pub assets_url: Option<String>,

    /// Directory fetched assets are written into
    #[arg(long, value_name = "DIR", conflicts_with = "config")]
    pub assets_dir: Option<PathBuf>,

    /// Maximum simultaneous transfers
    #[arg(long, value_name = "N", conflicts_with = "config")]
    pub concurrency: Option<usize>,
}

/// Arguments for `porter migrate`.
#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Source and URL mapping
    #[command(flatten)]
    pub spec: RunSpec,

    /// Directory the JSON-lines entity sink writes into
    #[arg(long, value_name = "DIR", default_value = "./imported")]
    pub target_dir: PathBuf,

    /// Keep importing after the store rejects an entity
    #[arg(long)]
    pub continue_on_error: bool,
}

/// Arguments for `porter scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Source and URL mapping
    #[command(flatten)]
    pub spec: RunSpec,
}
