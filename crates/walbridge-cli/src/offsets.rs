//! JSON-file offset storage, keyed by server name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;
use walbridge_core::{
    Error, OffsetStorageReader, OffsetStorageWriter, Result, SourceOffset, SourcePartition,
};

/// Offsets persisted as a JSON object mapping server name to offset.
#[derive(Debug)]
pub struct FileOffsetStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FileOffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every stored offset.
    pub fn load_all(&self) -> Result<BTreeMap<String, SourceOffset>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|e| {
            Error::OffsetStorage(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn store_all(&self, offsets: &BTreeMap<String, SourceOffset>) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(offsets)?;
        fs::write(&tmp, content)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                Error::OffsetStorage(format!("failed to write {}: {}", self.path.display(), e))
            })
    }
}

impl OffsetStorageReader for FileOffsetStore {
    fn offset(&self, partition: &SourcePartition) -> Result<Option<SourceOffset>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load_all()?.remove(&partition.server))
    }
}

impl OffsetStorageWriter for FileOffsetStore {
    fn write(&self, partition: &SourcePartition, offset: &SourceOffset) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut offsets = self.load_all()?;
        offsets.insert(partition.server.clone(), offset.clone());
        self.store_all(&offsets)?;
        debug!(partition = %partition, lsn = %offset.lsn, "stored offset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use walbridge_core::Lsn;

    #[test]
    fn test_missing_file_has_no_offsets() {
        let dir = TempDir::new().unwrap();
        let store = FileOffsetStore::new(dir.path().join("offsets.json"));
        assert_eq!(store.offset(&SourcePartition::new("db")).unwrap(), None);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_write_then_read_per_partition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        let store = FileOffsetStore::new(&path);

        store
            .write(
                &SourcePartition::new("a"),
                &SourceOffset::snapshot(Lsn::new(10), false),
            )
            .unwrap();
        store
            .write(&SourcePartition::new("b"), &SourceOffset::streaming(Lsn::new(20)))
            .unwrap();
        store
            .write(&SourcePartition::new("a"), &SourceOffset::streaming(Lsn::new(30)))
            .unwrap();

        let reopened = FileOffsetStore::new(&path);
        assert_eq!(
            reopened.offset(&SourcePartition::new("a")).unwrap(),
            Some(SourceOffset::streaming(Lsn::new(30)))
        );
        assert_eq!(reopened.load_all().unwrap().len(), 2);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileOffsetStore::new(&path);
        assert!(store.offset(&SourcePartition::new("a")).is_err());
    }
}
