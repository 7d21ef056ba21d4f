//! Vector Agent
//!
//! Buffers vector mutations, commits them into an ANN index on a schedule
//! and persists crash-safe snapshots.
//!
//! # Usage
//!
//! ```bash
//! vector-agent start [--index-path PATH | --in-memory] [--dimension N] [--copy-on-write]
//! vector-agent stop
//! vector-agent status
//! vector-agent inspect [--index-path PATH]
//! vector-agent config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/vector-agent/config.toml)
//! 3. File passed with --config
//! 4. Environment variables (AGENT_*, nested keys joined with __)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use agent_daemon::{
    inspect, show_config, show_status, start_agent, stop_agent, Cli, Commands, StartOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            index_path,
            in_memory,
            dimension,
            copy_on_write,
        } => {
            let options = StartOptions {
                index_path,
                in_memory,
                dimension,
                copy_on_write,
            };
            start_agent(cli.config.as_deref(), cli.log_level.as_deref(), options).await?;
        }
        Commands::Stop => {
            stop_agent()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Inspect { index_path } => {
            inspect(cli.config.as_deref(), index_path)?;
        }
        Commands::Config => {
            show_config(cli.config.as_deref(), cli.log_level.as_deref())?;
        }
    }

    Ok(())
}
