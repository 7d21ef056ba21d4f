//! Vector agent daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, stop, status, inspect, config)
//! - `settings`: Layered configuration loading

pub mod cli;
pub mod commands;
pub mod settings;

pub use cli::{Cli, Commands};
pub use commands::{
    apply_overrides, inspect, show_config, show_status, start_agent, stop_agent, StartOptions,
};
pub use settings::{Settings, SettingsError};
