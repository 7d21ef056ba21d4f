//! Snapshot metadata record.
//!
//! Every snapshot directory carries a `metadata.json` describing how many
//! identifier-map entries it holds and whether a load from it gave up.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::atomic;
use crate::error::IndexError;

/// File name of the metadata record inside a snapshot directory
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Engine-side counters recorded at save time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Identifier-map entries written with the snapshot
    pub index_count: u64,
}

/// Metadata record of one snapshot directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Set when a load from this directory timed out
    pub is_invalid: bool,
    pub index: IndexMetadata,
}

impl Metadata {
    pub fn valid(index_count: u64) -> Self {
        Self {
            is_invalid: false,
            index: IndexMetadata { index_count },
        }
    }

    pub fn invalid() -> Self {
        Self {
            is_invalid: true,
            index: IndexMetadata { index_count: 0 },
        }
    }

    /// Read the record from `dir`, rejecting missing, empty or undecodable files.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let path = dir.join(METADATA_FILE_NAME);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::IndexFileNotFound(path));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(IndexError::InvalidPermission(path));
            }
            Err(e) => return Err(e.into()),
        };
        if raw.is_empty() {
            return Err(IndexError::InvalidMetadata {
                path,
                reason: "file is empty".to_string(),
            });
        }
        serde_json::from_slice(&raw).map_err(|e| IndexError::InvalidMetadata {
            path,
            reason: e.to_string(),
        })
    }

    /// Atomically write the record into `dir`.
    pub fn store(&self, dir: &Path) -> Result<(), IndexError> {
        atomic::write_json(&dir.join(METADATA_FILE_NAME), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_load() {
        let temp = TempDir::new().unwrap();
        Metadata::valid(42).store(temp.path()).unwrap();

        let raw = std::fs::read_to_string(temp.path().join(METADATA_FILE_NAME)).unwrap();
        assert_eq!(raw, r#"{"is_invalid":false,"index":{"index_count":42}}"#);
        assert_eq!(Metadata::load(temp.path()).unwrap(), Metadata::valid(42));
    }

    #[test]
    fn test_load_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            Metadata::load(temp.path()),
            Err(IndexError::IndexFileNotFound(_))
        ));
    }

    #[test]
    fn test_load_empty_or_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(METADATA_FILE_NAME);

        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            Metadata::load(temp.path()),
            Err(IndexError::InvalidMetadata { .. })
        ));

        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            Metadata::load(temp.path()),
            Err(IndexError::InvalidMetadata { .. })
        ));
    }

    #[test]
    fn test_invalid_overwrites() {
        let temp = TempDir::new().unwrap();
        Metadata::valid(7).store(temp.path()).unwrap();
        Metadata::invalid().store(temp.path()).unwrap();

        let loaded = Metadata::load(temp.path()).unwrap();
        assert!(loaded.is_invalid);
        assert_eq!(loaded.index.index_count, 0);
    }
}
