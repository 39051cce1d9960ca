use std::time::Duration;

use crate::mode::SnapshotMode;
use crate::offset::SourcePartition;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 8192;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 2048;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// How long a poll may wait before handing control back to the caller.
pub const DEFAULT_RETURN_CONTROL_INTERVAL: Duration = Duration::from_secs(5);

/// Runtime settings for a connector task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    /// Logical name of the source; the partition key for offsets.
    pub server_name: String,
    pub snapshot_mode: SnapshotMode,
    /// Capacity of the handoff queue.
    pub max_queue_size: usize,
    /// Upper bound on records returned by one poll.
    pub max_batch_size: usize,
    /// Sleep between empty drains.
    pub poll_interval: Duration,
    /// Minimum time a poll waits for records, whatever the poll interval.
    pub return_control_interval: Duration,
}

impl TaskSettings {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            snapshot_mode: SnapshotMode::default(),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            return_control_interval: DEFAULT_RETURN_CONTROL_INTERVAL,
        }
    }

    pub fn partition(&self) -> SourcePartition {
        SourcePartition::new(self.server_name.clone())
    }

    /// Total wait budget of one poll.
    pub fn poll_timeout(&self) -> Duration {
        self.poll_interval.max(self.return_control_interval)
    }
}
