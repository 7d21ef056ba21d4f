//! Command implementations for the vector agent.
//!
//! Handles:
//! - start: load settings, recover the index, run the maintenance loop
//! - stop: signal the running agent to stop (via PID file)
//! - status: check if the agent is running
//! - inspect: report snapshot metadata per slot
//! - config: print the effective settings

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_index::{IndexOrchestrator, Metadata, Slot, METADATA_FILE_NAME};
use anyhow::{Context, Result};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::settings::{default_index_path, Settings};

/// CLI overrides for `start`.
#[derive(Debug, Default, Clone)]
pub struct StartOptions {
    pub index_path: Option<String>,
    pub in_memory: bool,
    pub dimension: Option<usize>,
    pub copy_on_write: bool,
}

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vector-agent")
        .join("agent.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Merge CLI overrides into loaded settings.
pub fn apply_overrides(
    settings: &mut Settings,
    log_level: Option<&str>,
    options: &StartOptions,
) {
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    if let Some(dimension) = options.dimension {
        settings.index.dimension = dimension;
    }
    if options.copy_on_write {
        settings.index.enable_copy_on_write = true;
    }
    if options.in_memory {
        settings.index.index_path = None;
        return;
    }
    if let Some(path) = &options.index_path {
        settings.index.index_path = Some(PathBuf::from(path));
        settings.expand_index_path();
    } else if settings.index.index_path.is_none() {
        settings.index.index_path = Some(default_index_path());
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Start the agent and run until a shutdown signal arrives.
pub async fn start_agent(
    config_path: Option<&str>,
    log_level: Option<&str>,
    options: StartOptions,
) -> Result<()> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    apply_overrides(&mut settings, log_level, &options);
    settings.validate().context("Invalid configuration")?;

    init_tracing(&settings.log_level)?;

    info!("Vector agent starting...");
    info!("  Dimension: {}", settings.index.dimension);
    info!("  Engine: {}", settings.index.engine);
    match &settings.index.index_path {
        Some(path) => info!("  Index path: {:?} (copy-on-write: {})", path, settings.index.enable_copy_on_write),
        None => info!("  Index path: in-memory"),
    }

    let shutdown_timeout = settings.shutdown_timeout();
    let index = IndexOrchestrator::builder(settings.index)
        .build()
        .await
        .context("Failed to open index")?;
    let index = Arc::new(index);
    info!(
        entries = index.len(),
        trained = index.is_trained(),
        "Index ready"
    );

    write_pid_file()?;

    let token = CancellationToken::new();
    let reporter = index.start(token.clone()).map(|mut errors| {
        tokio::spawn(async move {
            while let Some(e) = errors.recv().await {
                error!(error = %e, "Background indexing failed");
            }
        })
    });

    shutdown_signal().await;
    token.cancel();
    if let Some(reporter) = reporter {
        if tokio::time::timeout(shutdown_timeout, reporter).await.is_err() {
            warn!("Background indexing did not stop within {:?}", shutdown_timeout);
        }
    }

    let result = index.close_within(shutdown_timeout).await;
    remove_pid_file();
    result.context("Failed to close index")?;
    info!("Vector agent stopped");
    Ok(())
}

/// Stop the running agent by sending SIGTERM.
pub fn stop_agent() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - agent may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Agent not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to agent");
            }
        }
        println!("Sent SIGTERM to agent (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not yet implemented on this platform");
    }

    Ok(())
}

/// Show agent status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();
    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Vector agent is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "Vector agent is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => println!("Vector agent is NOT running (no PID file)"),
    }
    Ok(())
}

/// Metadata found in one snapshot slot.
#[derive(Debug, Serialize)]
pub struct SlotReport {
    pub slot: String,
    pub path: PathBuf,
    pub metadata: Option<Metadata>,
    pub error: Option<String>,
}

/// Collect metadata for every slot under `base` that carries a metadata file.
pub fn inspect_slots(base: &Path) -> Vec<SlotReport> {
    [Slot::Origin, Slot::Backup, Slot::Legacy]
        .into_iter()
        .map(|slot| {
            let path = match slot {
                Slot::Origin => base.join(agent_index::snapshot::ORIGIN_DIR_NAME),
                Slot::Backup => base.join(agent_index::snapshot::BACKUP_DIR_NAME),
                _ => base.to_path_buf(),
            };
            (slot, path)
        })
        .filter(|(_, path)| path.join(METADATA_FILE_NAME).exists())
        .map(|(slot, path)| {
            let (metadata, error) = match Metadata::load(&path) {
                Ok(metadata) => (Some(metadata), None),
                Err(e) => (None, Some(e.to_string())),
            };
            SlotReport {
                slot: slot.to_string(),
                path,
                metadata,
                error,
            }
        })
        .collect()
}

/// Print snapshot metadata as JSON.
pub fn inspect(config_path: Option<&str>, index_path: Option<String>) -> Result<()> {
    let settings = Settings::load(config_path).context("Failed to load configuration")?;
    let base = index_path
        .map(PathBuf::from)
        .or(settings.index.index_path)
        .unwrap_or_else(default_index_path);

    let reports = inspect_slots(&base);
    if reports.is_empty() {
        println!("No snapshots found under {:?}", base);
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

/// Print the effective settings as TOML.
pub fn show_config(config_path: Option<&str>, log_level: Option<&str>) -> Result<()> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}
