//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// rollgate - pipeline orchestrator with staged rollouts
///
/// Builds once per input set, then promotes the artifact through gated
/// environments with short-lived, scoped credentials.
#[derive(Parser, Debug)]
#[command(name = "rollgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ROLLGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .rollgate.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build and roll out a pipeline
    Run(RunArgs),

    /// List recorded runs
    Runs(RunsArgs),

    /// Show one run in detail
    Show(ShowArgs),

    /// Manage the artifact cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Print recent audit records
    Audit(AuditArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline definition file
    pub pipeline: PathBuf,

    /// Source reference being built (commit, tag, branch)
    #[arg(short, long, default_value = "HEAD")]
    pub source: String,

    /// Concurrency group (defaults to the pipeline's group)
    #[arg(short, long)]
    pub group: Option<String>,

    /// Pre-approve a gated environment (repeatable)
    #[arg(long = "approve", value_name = "ENV")]
    pub approve: Vec<String>,

    /// Output format for the final report
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the runs command
#[derive(Parser, Debug)]
pub struct RunsArgs {
    /// Show every archived run instead of the most recent ones
    #[arg(short, long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the show command
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Run ID or unique prefix
    pub run: String,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the audit command
#[derive(Parser, Debug)]
pub struct AuditArgs {
    /// Number of records to show (0 = all)
    #[arg(short = 'n', long, default_value = "20")]
    pub lines: usize,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cached artifacts
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show cache size against the configured limit
    Status,

    /// Evict stale entries and enforce the size limit
    Gc {
        /// Evict entries unused for N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be evicted
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every cached artifact
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
