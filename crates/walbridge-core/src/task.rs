//! The connector task: picks a producer, bridges its events to the poller,
//! and forwards acknowledgements back.
//!
//! One producer task pushes into the bounded queue. The framework calls
//! [`ConnectorTask::poll`], [`ConnectorTask::commit`] and
//! [`ConnectorTask::stop`] one at a time, except that `stop` may arrive from
//! another task while a poll is waiting. State shared with the producer is
//! limited to the running flag, the failure slot and the queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::error::{Error, Result};
use crate::event::ChangeEvent;
use crate::mode::{ProducerMode, TaskState};
use crate::offset::{OffsetStorageReader, SourceInfo, SourceOffset};
use crate::pacing::{Metronome, Pause, Timer};
use crate::producer::{BackendFactory, Emitter, FailureSlot, RecordsProducer};
use crate::queue::{self, BackpressureQueue};
use crate::settings::TaskSettings;
use crate::types::SourceRecord;

/// Span name every task entry point logs under.
pub const CONTEXT_NAME: &str = "walbridge-task";

/// Everything that exists only while a task runs.
struct Session {
    span: Span,
    max_batch_size: usize,
    poll_timeout: std::time::Duration,
    metronome: Metronome,
    queue: tokio::sync::Mutex<BackpressureQueue>,
    producer: tokio::sync::Mutex<Box<dyn RecordsProducer>>,
    cancel: CancellationToken,
    failure: FailureSlot,
    /// Offset of the newest boundary event handed to the poller.
    last_processed: Mutex<Option<SourceOffset>>,
}

impl Session {
    fn last_processed(&self) -> Option<SourceOffset> {
        self.last_processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A change-capture task driven by a polling framework.
pub struct ConnectorTask {
    factory: Arc<dyn BackendFactory>,
    running: AtomicBool,
    session: RwLock<Option<Arc<Session>>>,
}

impl ConnectorTask {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            running: AtomicBool::new(false),
            session: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Offset of the newest boundary event returned by [`poll`](Self::poll).
    pub fn last_processed_offset(&self) -> Option<SourceOffset> {
        self.session().and_then(|s| s.last_processed())
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select and start a producer. A no-op if already running.
    ///
    /// The prior offset for the configured partition is read from `offsets`
    /// exactly once. On any failure the task stays stopped and whatever was
    /// created is released.
    pub async fn start(
        &self,
        settings: &TaskSettings,
        offsets: &dyn OffsetStorageReader,
    ) -> Result<()> {
        if self.is_running() {
            debug!("task already running");
            return Ok(());
        }

        let span = info_span!(CONTEXT_NAME, server = %settings.server_name);
        let session = self
            .open_session(settings, offsets, span.clone())
            .instrument(span)
            .await?;

        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(session));
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn open_session(
        &self,
        settings: &TaskSettings,
        offsets: &dyn OffsetStorageReader,
        span: Span,
    ) -> Result<Session> {
        let partition = settings.partition();
        let prior = offsets.offset(&partition)?;

        let server_info = self.factory.server_info().await?;
        info!(server_info = %server_info, "connected to source");

        match &prior {
            None => info!("no previous offset found"),
            Some(offset) => info!(
                lsn = %offset.lsn,
                snapshot = offset.snapshot,
                last_snapshot_record = offset.last_snapshot_record,
                "found previous offset"
            ),
        }

        let state = TaskState::capture(prior.as_ref(), settings.snapshot_mode);
        let mode = state.select_mode()?;
        match mode {
            ProducerMode::Streaming if prior.is_some() => {
                info!("previous snapshot completed, streaming changes from last known position")
            }
            ProducerMode::Streaming => {
                info!("snapshots are not allowed, streaming changes only")
            }
            ProducerMode::Snapshot { stream_afterwards } => {
                if state.snapshot_in_effect {
                    info!("found previous incomplete snapshot");
                }
                if stream_afterwards {
                    info!("taking a snapshot and streaming changes once it finishes")
                } else {
                    info!("taking only a snapshot, without streaming changes afterwards")
                }
            }
        }

        let mut producer = self
            .factory
            .create(mode, SourceInfo::new(partition, prior));
        let (sender, queue) = queue::bounded(settings.max_queue_size);
        let cancel = CancellationToken::new();
        let failure = FailureSlot::default();
        let emitter = Emitter::new(sender, failure.clone(), cancel.clone()).with_span(span.clone());

        if let Err(e) = producer.start(emitter).await {
            warn!(error = %e, "failed to start producer");
            cancel.cancel();
            producer.stop().await;
            return Err(e);
        }

        info!(
            max_queue_size = settings.max_queue_size,
            max_batch_size = settings.max_batch_size,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            "task started"
        );

        Ok(Session {
            span,
            max_batch_size: settings.max_batch_size.max(1),
            poll_timeout: settings.poll_timeout(),
            metronome: Metronome::sleeper(settings.poll_interval),
            queue: tokio::sync::Mutex::new(queue),
            producer: tokio::sync::Mutex::new(producer),
            cancel,
            failure,
            last_processed: Mutex::new(None),
        })
    }

    /// Return up to `max_batch_size` records, waiting a bounded time if none
    /// are ready. An empty result just means nothing arrived in time.
    ///
    /// Fails with [`Error::Backend`] once the producer has recorded a failure.
    pub async fn poll(&self) -> Result<Vec<SourceRecord>> {
        let Some(session) = self.session() else {
            return Ok(Vec::new());
        };
        let span = session.span.clone();
        self.poll_session(&session).instrument(span).await
    }

    async fn poll_session(&self, session: &Session) -> Result<Vec<SourceRecord>> {
        let mut queue = session.queue.lock().await;
        debug!(
            queued = queue.len(),
            capacity = queue.capacity(),
            "polling records"
        );
        let mut events = Vec::new();
        let timeout = Timer::after(session.poll_timeout);

        while self.is_running() && queue.drain(session.max_batch_size, &mut events) == 0 {
            if let Some(failure) = session.failure.get() {
                return Err(Error::Backend(failure.to_string()));
            }
            debug!("no records available yet, sleeping a bit");
            if session.metronome.pause(&session.cancel).await == Pause::Cancelled {
                debug!("stop requested while polling");
                break;
            }
            if timeout.expired() {
                break;
            }
        }

        if let Some(offset) = last_boundary_offset(&events) {
            *session
                .last_processed
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(offset);
        }

        Ok(events.into_iter().map(ChangeEvent::into_record).collect())
    }

    /// Forward the last processed position to the producer.
    ///
    /// Returns the acknowledged offset for the framework to persist, or
    /// `None` when not running or nothing has been processed yet.
    pub async fn commit(&self) -> Result<Option<SourceOffset>> {
        if !self.is_running() {
            return Ok(None);
        }
        let Some(session) = self.session() else {
            return Ok(None);
        };
        let Some(offset) = session.last_processed() else {
            debug!(parent: &session.span, "nothing processed yet, skipping commit");
            return Ok(None);
        };

        let mut producer = session.producer.lock().await;
        producer
            .acknowledge(offset.lsn, &session.cancel)
            .instrument(session.span.clone())
            .await?;
        Ok(Some(offset))
    }

    /// Stop the producer and end the task. Calling it again is a no-op.
    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let session = self
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        let mut producer = session.producer.lock().await;
        producer.stop().instrument(session.span.clone()).await;

        let queue = session.queue.lock().await;
        if !queue.is_empty() {
            debug!(
                parent: &session.span,
                discarded = queue.len(),
                "dropping events that were never polled"
            );
        }
        info!(parent: &session.span, "task stopped");
    }
}

/// Offset of the newest boundary event in a drained batch.
///
/// Earlier boundaries in the same batch are superseded by the last one.
pub fn last_boundary_offset(events: &[ChangeEvent]) -> Option<SourceOffset> {
    events
        .iter()
        .rev()
        .find(|event| event.is_boundary())
        .map(|event| event.record().offset.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::Lsn;
    use crate::offset::SourcePartition;
    use crate::types::{Operation, RowEvent};

    fn event(lsn: u64, is_boundary: bool) -> ChangeEvent {
        let record = SourceRecord::new(
            SourcePartition::new("test"),
            SourceOffset::streaming(Lsn::new(lsn)),
            RowEvent {
                op: Operation::Update,
                schema: "public".into(),
                table: "t".into(),
                new: None,
                old: None,
            },
        );
        ChangeEvent::new(record, is_boundary)
    }

    #[test]
    fn test_last_boundary_wins() {
        let events = vec![
            event(5, true),
            event(8, false),
            event(8, true),
            event(12, true),
            event(13, false),
        ];
        assert_eq!(
            last_boundary_offset(&events).map(|o| o.lsn),
            Some(Lsn::new(12))
        );
    }

    #[test]
    fn test_no_boundary_in_batch() {
        assert_eq!(last_boundary_offset(&[]), None);
        assert_eq!(last_boundary_offset(&[event(3, false), event(3, false)]), None);
    }
}
