//! Identifier-map snapshot files.
//!
//! A snapshot carries the identifier map split across two JSON files, uuid to
//! internal id and uuid to timestamp, plus an optional file of broken entries.
//! Decoding tolerates a missing timestamp file; entries that only one of the
//! two files knows about are reported as failures.

use std::collections::HashMap;
use std::path::Path;

use agent_kvs::{IdentifierMap, InternalId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::atomic;
use crate::error::IndexError;

/// uuid → internal id
pub const AGENT_META_FILE_NAME: &str = "agent-meta.kvsdb";
/// uuid → timestamp
pub const AGENT_TIMESTAMP_FILE_NAME: &str = "agent-timestamp.kvsdb";
/// uuid → internal id (or [`NO_TIMESTAMP_FILE`]) of broken entries
pub const INVALID_AGENT_META_FILE_NAME: &str = "invalid-agent-meta.kvsdb";

/// Failure-map sentinel for an entry found only in the timestamp file.
pub const NO_TIMESTAMP_FILE: i64 = -1;

/// Identifier map as read back from a snapshot directory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DecodedMap {
    /// (uuid, id, timestamp)
    pub entries: Vec<(String, InternalId, i64)>,
    /// Inconsistent entries, uuid → id or sentinel
    pub failures: HashMap<String, i64>,
}

impl DecodedMap {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest internal id present, if any.
    pub fn max_id(&self) -> Option<InternalId> {
        self.entries.iter().map(|(_, id, _)| *id).max()
    }
}

/// Write the id and timestamp files for `map` into `dir`. Returns the number
/// of entries written.
pub fn write_identifier_map(
    dir: &Path,
    map: &dyn IdentifierMap,
    token: &CancellationToken,
) -> Result<usize, IndexError> {
    let mut ids: HashMap<String, InternalId> = HashMap::with_capacity(map.len());
    let mut timestamps: HashMap<String, i64> = HashMap::with_capacity(map.len());
    map.range(token, &mut |uuid, id, ts| {
        ids.insert(uuid.to_string(), id);
        timestamps.insert(uuid.to_string(), ts);
        true
    })?;

    atomic::write_json(&dir.join(AGENT_META_FILE_NAME), &ids)?;
    atomic::write_json(&dir.join(AGENT_TIMESTAMP_FILE_NAME), &timestamps)?;
    debug!(dir = ?dir, entries = ids.len(), "Wrote identifier map");
    Ok(ids.len())
}

/// Write the failure map into `dir`, or drop a stale file when it is empty.
pub fn write_failure_map(dir: &Path, failures: &HashMap<String, i64>) -> Result<(), IndexError> {
    let path = dir.join(INVALID_AGENT_META_FILE_NAME);
    if failures.is_empty() {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = ?path, "Removed stale failure map"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }
    atomic::write_json(&path, failures)?;
    warn!(dir = ?dir, broken = failures.len(), "Wrote failure map");
    Ok(())
}

/// Decode the identifier map stored in `dir`.
pub fn read_identifier_map(dir: &Path) -> Result<DecodedMap, IndexError> {
    let ids: HashMap<String, InternalId> = read_json(&dir.join(AGENT_META_FILE_NAME))?;

    let ts_path = dir.join(AGENT_TIMESTAMP_FILE_NAME);
    let mut timestamps: HashMap<String, i64> = match read_json(&ts_path) {
        Ok(timestamps) => timestamps,
        Err(e) => {
            warn!(path = ?ts_path, error = %e, "Timestamp file unusable, entries get timestamp 0");
            HashMap::new()
        }
    };

    let mut decoded = DecodedMap {
        entries: Vec::with_capacity(ids.len()),
        failures: HashMap::new(),
    };
    for (uuid, id) in ids {
        match timestamps.remove(&uuid) {
            Some(ts) => decoded.entries.push((uuid, id, ts)),
            None => {
                decoded.failures.insert(uuid.clone(), i64::from(id));
                decoded.entries.push((uuid, id, 0));
            }
        }
    }
    for uuid in timestamps.into_keys() {
        decoded.failures.insert(uuid, NO_TIMESTAMP_FILE);
    }

    if !decoded.failures.is_empty() {
        warn!(
            dir = ?dir,
            broken = decoded.failures.len(),
            "Identifier map files disagree"
        );
    }
    Ok(decoded)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(IndexError::IndexFileNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_kvs::BidiMap;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sorted(mut decoded: DecodedMap) -> DecodedMap {
        decoded.entries.sort();
        decoded
    }

    #[test]
    fn test_write_and_read() {
        let temp = TempDir::new().unwrap();
        let map = BidiMap::new();
        map.set("a", 0, 10);
        map.set("b", 1, 11);

        let written = write_identifier_map(temp.path(), &map, &CancellationToken::new()).unwrap();
        assert_eq!(written, 2);

        let decoded = sorted(read_identifier_map(temp.path()).unwrap());
        assert_eq!(
            decoded.entries,
            vec![("a".to_string(), 0, 10), ("b".to_string(), 1, 11)]
        );
        assert!(decoded.failures.is_empty());
        assert_eq!(decoded.max_id(), Some(1));
    }

    #[test]
    fn test_missing_id_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            read_identifier_map(temp.path()),
            Err(IndexError::IndexFileNotFound(_))
        ));
    }

    #[test]
    fn test_missing_timestamp_file_records_failures() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(AGENT_META_FILE_NAME), r#"{"a":3}"#).unwrap();

        let decoded = read_identifier_map(temp.path()).unwrap();
        assert_eq!(decoded.entries, vec![("a".to_string(), 3, 0)]);
        assert_eq!(decoded.failures.get("a"), Some(&3));
    }

    #[test]
    fn test_orphan_timestamp_gets_sentinel() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(AGENT_META_FILE_NAME), r#"{"a":3}"#).unwrap();
        std::fs::write(
            temp.path().join(AGENT_TIMESTAMP_FILE_NAME),
            r#"{"a":5,"ghost":9}"#,
        )
        .unwrap();

        let decoded = read_identifier_map(temp.path()).unwrap();
        assert_eq!(decoded.entries, vec![("a".to_string(), 3, 5)]);
        assert_eq!(decoded.failures.get("ghost"), Some(&NO_TIMESTAMP_FILE));
    }

    #[test]
    fn test_failure_map_file_lifecycle() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(INVALID_AGENT_META_FILE_NAME);

        let mut failures = HashMap::new();
        failures.insert("x".to_string(), 4);
        write_failure_map(temp.path(), &failures).unwrap();
        assert!(path.exists());

        write_failure_map(temp.path(), &HashMap::new()).unwrap();
        assert!(!path.exists());
    }
}
