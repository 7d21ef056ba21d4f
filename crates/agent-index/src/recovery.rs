//! Startup recovery: pick the best loadable snapshot.
//!
//! With copy-on-write the candidates are tried in order `origin`, `backup`,
//! then the legacy layout in the base directory. A snapshot whose identifier
//! map holds fewer than half the entries its metadata records is kept as a
//! partial result and only used when nothing better loads. When every
//! candidate fails the index starts empty, which is not an error.

use std::path::Path;
use std::sync::Arc;

use agent_engine::{EngineFactory, IndexEngine};
use tracing::{error, info, warn};

use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::kvsdb::{self, DecodedMap, AGENT_META_FILE_NAME};
use crate::metadata::Metadata;
use crate::service::blocking;
use crate::snapshot::{SnapshotArena, Slot};

/// Engine and identifier map rebuilt from disk.
pub(crate) struct Recovered {
    pub engine: Box<dyn IndexEngine>,
    pub map: DecodedMap,
}

enum Attempt {
    Loaded(Recovered),
    Partial(Recovered, IndexError),
    Failed(IndexError),
}

pub(crate) async fn recover(
    config: &IndexConfig,
    arena: &SnapshotArena,
    factory: &Arc<dyn EngineFactory>,
) -> Result<Recovered, IndexError> {
    if !arena.copy_on_write() {
        let base = arena.path(Slot::Legacy);
        return match load_dir(config, factory, &base).await {
            Attempt::Loaded(recovered) => Ok(recovered),
            Attempt::Partial(_, e) | Attempt::Failed(e) => {
                warn!(path = ?base, error = %e, "Snapshot not loadable, starting fresh");
                fresh(factory, &base)
            }
        };
    }

    let mut partial: Option<Recovered> = None;
    for slot in [Slot::Origin, Slot::Backup] {
        let dir = arena.path(slot);
        match load_dir(config, factory, &dir).await {
            Attempt::Loaded(recovered) => {
                if let Some(previous) = partial.take() {
                    if previous.map.len() > recovered.map.len() {
                        warn!(
                            slot = %slot,
                            loaded = recovered.map.len(),
                            partial = previous.map.len(),
                            "Snapshot has fewer entries than an earlier partial load, keeping the partial one"
                        );
                        return Ok(previous);
                    }
                }
                info!(slot = %slot, entries = recovered.map.len(), "Recovered snapshot");
                return Ok(recovered);
            }
            Attempt::Partial(recovered, e) => {
                warn!(slot = %slot, error = %e, "Snapshot loaded partially");
                partial = Some(larger(partial, recovered));
            }
            Attempt::Failed(e) => {
                warn!(slot = %slot, path = ?dir, error = %e, "Snapshot not loadable");
            }
        }
    }

    let legacy = arena.path(Slot::Legacy);
    match load_dir(config, factory, &legacy).await {
        Attempt::Loaded(recovered) => {
            if let Err(e) = arena.copy_legacy_forward() {
                warn!(error = %e, "Failed to copy legacy snapshot into origin");
            }
            info!(entries = recovered.map.len(), "Recovered legacy snapshot");
            return Ok(recovered);
        }
        Attempt::Partial(recovered, e) => {
            warn!(error = %e, "Legacy snapshot loaded partially");
            partial = Some(larger(partial, recovered));
        }
        Attempt::Failed(e) => {
            warn!(path = ?legacy, error = %e, "Legacy snapshot not loadable");
        }
    }

    if let Some(recovered) = partial {
        warn!(entries = recovered.map.len(), "Serving partially recovered snapshot");
        return Ok(recovered);
    }

    let temp = arena.path(Slot::Temp);
    info!(path = ?temp, "No snapshot recovered, starting fresh");
    fresh(factory, &temp)
}

fn larger(current: Option<Recovered>, candidate: Recovered) -> Recovered {
    match current {
        Some(current) if current.map.len() >= candidate.map.len() => current,
        _ => candidate,
    }
}

fn fresh(factory: &Arc<dyn EngineFactory>, dir: &Path) -> Result<Recovered, IndexError> {
    Ok(Recovered {
        engine: factory.create(Some(dir))?,
        map: DecodedMap::default(),
    })
}

/// Validate and load one snapshot directory.
async fn load_dir(config: &IndexConfig, factory: &Arc<dyn EngineFactory>, dir: &Path) -> Attempt {
    let metadata = match validate_dir(dir) {
        Ok(metadata) => metadata,
        Err(e) => return Attempt::Failed(e),
    };
    let recorded = metadata.index.index_count;
    let limit = config.load_timeout(recorded);

    let engine_unit = {
        let factory = Arc::clone(factory);
        let dir = dir.to_path_buf();
        blocking(move || Ok(factory.load(&dir)?))
    };
    let map_unit = {
        let dir = dir.to_path_buf();
        blocking(move || kvsdb::read_identifier_map(&dir))
    };

    let (engine, map) =
        match tokio::time::timeout(limit, async { tokio::try_join!(engine_unit, map_unit) }).await {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(e)) => return Attempt::Failed(e),
            Err(_) => {
                error!(path = ?dir, timeout = ?limit, "Snapshot load timed out, marking it invalid");
                if let Err(e) = Metadata::invalid().store(dir) {
                    warn!(path = ?dir, error = %e, "Failed to mark snapshot invalid");
                }
                return Attempt::Failed(IndexError::IndexLoadTimeout {
                    path: dir.to_path_buf(),
                    timeout: limit,
                });
            }
        };

    let loaded = map.len();
    let recovered = Recovered { engine, map };
    if (loaded as u64) < recorded / 2 {
        return Attempt::Partial(
            recovered,
            IndexError::IndicesAreTooFewComparedToMetadata {
                path: dir.to_path_buf(),
                loaded,
                recorded,
            },
        );
    }
    Attempt::Loaded(recovered)
}

fn validate_dir(dir: &Path) -> Result<Metadata, IndexError> {
    let stat = match std::fs::metadata(dir) {
        Ok(stat) => stat,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::IndexFileNotFound(dir.to_path_buf()));
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(IndexError::InvalidPermission(dir.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if !stat.is_dir() {
        return Err(IndexError::InvalidMetadata {
            path: dir.to_path_buf(),
            reason: "snapshot path is not a directory".to_string(),
        });
    }
    if std::fs::read_dir(dir)?.next().is_none() {
        return Err(IndexError::IndexFileNotFound(dir.to_path_buf()));
    }

    let metadata = Metadata::load(dir)?;
    if metadata.is_invalid {
        return Err(IndexError::InvalidMetadata {
            path: dir.to_path_buf(),
            reason: "marked invalid".to_string(),
        });
    }
    if metadata.index.index_count == 0 {
        return Err(IndexError::InvalidMetadata {
            path: dir.to_path_buf(),
            reason: "index count is zero".to_string(),
        });
    }

    let ids = dir.join(AGENT_META_FILE_NAME);
    if !ids.is_file() {
        return Err(IndexError::IndexFileNotFound(ids));
    }
    Ok(metadata)
}
