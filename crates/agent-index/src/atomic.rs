//! Crash-safe file writes.
//!
//! A file is written to a sibling temp file, fsynced, renamed over the target
//! and the parent directory fsynced, so readers see either the old or the new
//! content.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::IndexError;

/// Serialize `value` as JSON into `path` atomically.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), IndexError> {
    let dir = parent_dir(path)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// fsync a directory so renames inside it are durable.
pub(crate) fn fsync_dir(path: &Path) -> std::io::Result<()> {
    OpenOptions::new().read(true).open(path)?.sync_all()
}

/// Copy a file and fsync the copy.
pub(crate) fn copy_file_with_fsync(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let bytes = std::fs::copy(src, dst)?;
    File::open(dst)?.sync_all()?;
    Ok(bytes)
}

fn parent_dir(path: &Path) -> Result<&Path, IndexError> {
    path.parent().ok_or_else(|| {
        IndexError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_write_json_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("map.json");

        let mut map = BTreeMap::new();
        map.insert("a", 1u32);
        write_json(&path, &map).unwrap();
        map.insert("b", 2u32);
        write_json(&path, &map).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"a":1,"b":2}"#);

        // only the target remains, no stray temp files
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_copy_file_with_fsync() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::write(&src, b"payload").unwrap();

        assert_eq!(copy_file_with_fsync(&src, &dst).unwrap(), 7);
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }
}
