pub mod error;
pub mod event;
pub mod lsn;
pub mod mode;
pub mod offset;
pub mod pacing;
pub mod producer;
pub mod queue;
pub mod settings;
pub mod task;
pub mod types;

pub use error::{Error, Result};
pub use event::{BoundaryMarker, ChangeEvent};
pub use lsn::{format_lsn, parse_lsn, Lsn};
pub use mode::{ProducerMode, SnapshotMode, TaskState};
pub use offset::{
    MemoryOffsetStore, OffsetStorageReader, OffsetStorageWriter, SourceInfo, SourceOffset,
    SourcePartition,
};
pub use pacing::{Metronome, Pause, Timer};
pub use producer::{BackendFactory, Emitter, FailureSlot, RecordsProducer};
pub use queue::{BackpressureQueue, Enqueued, QueueSender};
pub use settings::TaskSettings;
pub use task::{last_boundary_offset, ConnectorTask, CONTEXT_NAME};
pub use types::{Operation, RowEvent, RowMap, SourceRecord, Value};

// Re-export tokio_util for CancellationToken
pub use tokio_util::sync::CancellationToken;
