//! Snapshot directory slots and copy-on-write rotation.
//!
//! Under a base directory the arena manages:
//!
//! ```text
//! <base>/
//! ├── origin/     live snapshot
//! ├── backup/     previous generation
//! ├── tmp-XXXX/   snapshot being written (one per save cycle)
//! └── *           legacy single-directory layout
//! ```
//!
//! Without copy-on-write the base directory itself is the only slot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::atomic;
use crate::error::IndexError;

pub const ORIGIN_DIR_NAME: &str = "origin";
pub const BACKUP_DIR_NAME: &str = "backup";
pub const TEMP_DIR_PREFIX: &str = "tmp-";

/// Logical snapshot location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Origin,
    Backup,
    Temp,
    Legacy,
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Origin => write!(f, "origin"),
            Slot::Backup => write!(f, "backup"),
            Slot::Temp => write!(f, "temp"),
            Slot::Legacy => write!(f, "legacy"),
        }
    }
}

/// Filesystem primitives used by rotation, swappable for failure injection.
pub trait SnapshotFs: Send + Sync {
    fn move_dir(&self, from: &Path, to: &Path) -> std::io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_dir_all(path)
    }

    /// Copy the regular files directly under `from` into `to`.
    fn copy_files(&self, from: &Path, to: &Path) -> std::io::Result<usize> {
        std::fs::create_dir_all(to)?;
        let mut copied = 0;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                atomic::copy_file_with_fsync(&entry.path(), &to.join(entry.file_name()))?;
                copied += 1;
            }
        }
        atomic::fsync_dir(to)?;
        Ok(copied)
    }

    fn sync_dir(&self, path: &Path) -> std::io::Result<()> {
        atomic::fsync_dir(path)
    }
}

/// [`SnapshotFs`] over `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl SnapshotFs for StdFs {}

/// The set of snapshot directories under one base path.
pub struct SnapshotArena {
    base: PathBuf,
    copy_on_write: bool,
    fs: Arc<dyn SnapshotFs>,
    // Also serialises rotation.
    temp: Mutex<Option<PathBuf>>,
}

impl SnapshotArena {
    /// Open the arena at `base`, creating it if needed. With copy-on-write,
    /// leftover temp directories from earlier runs are removed and a fresh
    /// one is allocated.
    pub fn open(
        base: impl Into<PathBuf>,
        copy_on_write: bool,
        fs: Arc<dyn SnapshotFs>,
    ) -> Result<Self, IndexError> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;

        let temp = if copy_on_write {
            remove_stale_temps(&base, fs.as_ref());
            Some(allocate_temp(&base)?)
        } else {
            None
        };

        info!(base = ?base, copy_on_write, "Opened snapshot arena");
        Ok(Self {
            base,
            copy_on_write,
            fs,
            temp: Mutex::new(temp),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn copy_on_write(&self) -> bool {
        self.copy_on_write
    }

    pub fn fs(&self) -> &dyn SnapshotFs {
        self.fs.as_ref()
    }

    /// Resolve a slot to its directory. `Temp` resolves to the base path when
    /// copy-on-write is off.
    pub fn path(&self, slot: Slot) -> PathBuf {
        match slot {
            Slot::Origin => self.base.join(ORIGIN_DIR_NAME),
            Slot::Backup => self.base.join(BACKUP_DIR_NAME),
            Slot::Temp => self
                .temp
                .lock()
                .clone()
                .unwrap_or_else(|| self.base.clone()),
            Slot::Legacy => self.base.clone(),
        }
    }

    /// Directory a save writes into.
    pub fn write_target(&self) -> PathBuf {
        if self.copy_on_write {
            self.path(Slot::Temp)
        } else {
            self.path(Slot::Legacy)
        }
    }

    /// Promote the temp directory: origin → backup, temp → origin, then
    /// allocate a new temp. A failed promotion restores the backup.
    pub fn rotate(&self) -> Result<(), IndexError> {
        let mut temp = self.temp.lock();
        let current = temp.clone().ok_or_else(|| {
            IndexError::Config("snapshot rotation requires copy-on-write".to_string())
        })?;
        let origin = self.path(Slot::Origin);
        let backup = self.path(Slot::Backup);

        if origin.exists() {
            if backup.exists() {
                if let Err(e) = self.fs.remove_dir(&backup) {
                    warn!(path = ?backup, error = %e, "Failed to remove old backup");
                }
            }
            if let Err(e) = self.fs.move_dir(&origin, &backup) {
                warn!(from = ?origin, to = ?backup, error = %e, "Failed to move origin to backup");
            }
        }

        if let Err(rotation) = self.fs.move_dir(&current, &origin) {
            error!(from = ?current, to = ?origin, error = %rotation, "Failed to promote snapshot");
            return match self.restore_backup() {
                Ok(()) => Err(IndexError::RotationFailed(format!(
                    "{} -> {}: {}",
                    current.display(),
                    origin.display(),
                    rotation
                ))),
                Err(rollback) => Err(IndexError::RollbackFailed {
                    rotation: rotation.to_string(),
                    rollback: rollback.to_string(),
                }),
            };
        }

        if let Err(e) = self.fs.sync_dir(&self.base) {
            warn!(path = ?self.base, error = %e, "Failed to fsync snapshot base");
        }
        *temp = Some(allocate_temp(&self.base)?);
        info!(origin = ?origin, "Rotated snapshot");
        Ok(())
    }

    /// Move backup back into origin when origin is missing.
    pub fn restore_backup(&self) -> std::io::Result<()> {
        let origin = self.path(Slot::Origin);
        let backup = self.path(Slot::Backup);
        if origin.exists() || !backup.exists() {
            return Ok(());
        }
        self.fs.move_dir(&backup, &origin)?;
        warn!(from = ?backup, to = ?origin, "Restored backup snapshot");
        Ok(())
    }

    /// Replace the temp directory with an empty one, dropping partial writes.
    pub fn reset_temp(&self) -> Result<PathBuf, IndexError> {
        let mut temp = self.temp.lock();
        if let Some(old) = temp.take() {
            if let Err(e) = self.fs.remove_dir(&old) {
                warn!(path = ?old, error = %e, "Failed to remove temp snapshot");
            }
        }
        let fresh = allocate_temp(&self.base)?;
        *temp = Some(fresh.clone());
        Ok(fresh)
    }

    /// Copy the files of the legacy layout into origin.
    pub fn copy_legacy_forward(&self) -> Result<usize, IndexError> {
        let origin = self.path(Slot::Origin);
        let copied = self.fs.copy_files(&self.base, &origin)?;
        info!(copied = copied, to = ?origin, "Copied legacy snapshot into origin");
        Ok(copied)
    }
}

fn allocate_temp(base: &Path) -> Result<PathBuf, IndexError> {
    let dir = tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir_in(base)?
        .keep();
    debug!(path = ?dir, "Allocated temp snapshot directory");
    Ok(dir)
}

fn remove_stale_temps(base: &Path, fs: &dyn SnapshotFs) {
    let Ok(entries) = std::fs::read_dir(base) else {
        return;
    };
    for entry in entries.flatten() {
        let is_temp = entry.file_name().to_string_lossy().starts_with(TEMP_DIR_PREFIX);
        if is_temp && entry.path().is_dir() {
            match fs.remove_dir(&entry.path()) {
                Ok(()) => debug!(path = ?entry.path(), "Removed stale temp snapshot"),
                Err(e) => warn!(path = ?entry.path(), error = %e, "Failed to remove stale temp snapshot"),
            }
        }
    }
}
