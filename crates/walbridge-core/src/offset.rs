//! Source partitions, persisted offsets and the storage the framework keeps them in.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lsn::Lsn;

/// Identifies the logical source instance an offset belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePartition {
    /// Configured server name.
    pub server: String,
}

impl SourcePartition {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
        }
    }
}

impl fmt::Display for SourcePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server={}", self.server)
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// How far a producer had progressed when a record was emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOffset {
    pub lsn: Lsn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<u64>,
    /// Commit or read time, microseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts_usec: Option<i64>,
    /// A snapshot was running when this offset was recorded.
    #[serde(default, skip_serializing_if = "is_false")]
    pub snapshot: bool,
    /// This offset belongs to the final record of a snapshot.
    #[serde(default, skip_serializing_if = "is_false")]
    pub last_snapshot_record: bool,
}

impl SourceOffset {
    /// Offset of a change read from the live log.
    pub fn streaming(lsn: Lsn) -> Self {
        Self {
            lsn,
            ..Default::default()
        }
    }

    /// Offset of a row read by a snapshot.
    pub fn snapshot(lsn: Lsn, last_snapshot_record: bool) -> Self {
        Self {
            lsn,
            snapshot: true,
            last_snapshot_record,
            ..Default::default()
        }
    }

    pub fn with_txid(mut self, txid: Option<u64>) -> Self {
        self.txid = txid;
        self
    }

    pub fn with_ts_usec(mut self, ts_usec: Option<i64>) -> Self {
        self.ts_usec = ts_usec;
        self
    }

    /// True when the task stopped before the snapshot finished.
    pub fn is_snapshot_in_effect(&self) -> bool {
        self.snapshot && !self.last_snapshot_record
    }
}

/// Partition plus the offset it resumes from, handed to a producer at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub partition: SourcePartition,
    pub offset: Option<SourceOffset>,
}

impl SourceInfo {
    pub fn new(partition: SourcePartition, offset: Option<SourceOffset>) -> Self {
        Self { partition, offset }
    }

    /// Position to resume streaming from, if any was recorded.
    pub fn resume_lsn(&self) -> Option<Lsn> {
        self.offset.as_ref().map(|o| o.lsn)
    }
}

/// Read side of the framework's offset storage.
pub trait OffsetStorageReader: Send + Sync {
    fn offset(&self, partition: &SourcePartition) -> Result<Option<SourceOffset>>;
}

/// Write side of the framework's offset storage.
pub trait OffsetStorageWriter: Send + Sync {
    fn write(&self, partition: &SourcePartition, offset: &SourceOffset) -> Result<()>;
}

/// In-process offset storage.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offsets: Mutex<HashMap<SourcePartition, SourceOffset>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with one offset.
    pub fn with_offset(partition: SourcePartition, offset: SourceOffset) -> Self {
        let store = Self::default();
        store
            .offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(partition, offset);
        store
    }
}

impl OffsetStorageReader for MemoryOffsetStore {
    fn offset(&self, partition: &SourcePartition) -> Result<Option<SourceOffset>> {
        let offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(offsets.get(partition).cloned())
    }
}

impl OffsetStorageWriter for MemoryOffsetStore {
    fn write(&self, partition: &SourcePartition, offset: &SourceOffset) -> Result<()> {
        let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        offsets.insert(partition.clone(), offset.clone());
        Ok(())
    }
}
