//! CLI argument parsing for the vector agent.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// Vector agent daemon
///
/// Buffers vector mutations, commits them into an ANN index on a schedule
/// and keeps crash-safe snapshots on disk.
#[derive(Parser, Debug)]
#[command(name = "vector-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides the default config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the agent in the foreground
    Start {
        /// Override snapshot base directory
        #[arg(long)]
        index_path: Option<String>,

        /// Keep the index in memory only
        #[arg(long, conflicts_with = "index_path")]
        in_memory: bool,

        /// Override vector dimension
        #[arg(short, long)]
        dimension: Option<usize>,

        /// Enable copy-on-write snapshots
        #[arg(long)]
        copy_on_write: bool,
    },

    /// Stop the running agent
    Stop,

    /// Show agent status
    Status,

    /// Show snapshot metadata under an index directory
    Inspect {
        /// Snapshot base directory (default from config)
        #[arg(long)]
        index_path: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}
