//! The contract between the task and the backend that produces change events.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, Instrument, Span};

use crate::error::{Error, Result};
use crate::event::ChangeEvent;
use crate::lsn::Lsn;
use crate::mode::ProducerMode;
use crate::offset::SourceInfo;
use crate::queue::{Enqueued, QueueSender};

/// Set-once slot where a producer records the failure that ended it.
///
/// Written from the producer's task, read by the poll loop.
#[derive(Debug, Clone, Default)]
pub struct FailureSlot(Arc<OnceLock<String>>);

impl FailureSlot {
    /// Record `error` unless an earlier failure is already recorded.
    /// Returns whether this call won.
    pub fn record(&self, error: &Error) -> bool {
        self.0.set(error.to_string()).is_ok()
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

/// Handle a producer uses to hand events to the task.
#[derive(Debug, Clone)]
pub struct Emitter {
    queue: QueueSender,
    failure: FailureSlot,
    cancel: CancellationToken,
    span: Span,
}

impl Emitter {
    pub fn new(queue: QueueSender, failure: FailureSlot, cancel: CancellationToken) -> Self {
        Self {
            queue,
            failure,
            cancel,
            span: Span::none(),
        }
    }

    /// Log enqueues inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Block until the queue has room, then append.
    ///
    /// A shutdown while waiting drops the event and returns
    /// [`Enqueued::Cancelled`]; this is not an error.
    pub async fn emit(&self, event: ChangeEvent) -> Enqueued {
        let lsn = event.lsn();
        async {
            let outcome = self.queue.put(event, &self.cancel).await;
            match outcome {
                Enqueued::Accepted => debug!(%lsn, "placed change event into queue"),
                Enqueued::Cancelled => debug!(%lsn, "received interrupt request while enqueuing"),
            }
            outcome
        }
        .instrument(self.span.clone())
        .await
    }

    /// Record an asynchronous failure; the next poll surfaces it.
    pub fn fail(&self, error: Error) {
        let _enter = self.span.enter();
        if self.failure.record(&error) {
            error!(error = %error, "producer failed");
        } else {
            debug!(error = %error, "producer failure already recorded");
        }
    }

    /// Token cancelled when the task stops.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A backend producing change events on its own task.
#[async_trait]
pub trait RecordsProducer: Send {
    /// Begin producing. Emission happens on a task the producer spawns;
    /// this returns once the backend is connected.
    ///
    /// Fails with [`Error::Connection`] or [`Error::Protocol`].
    async fn start(&mut self, emitter: Emitter) -> Result<()>;

    /// Everything at or before `lsn` has been delivered; the backend may
    /// release it. Fails with [`Error::Interrupted`] if `cancel` fires while
    /// waiting.
    async fn acknowledge(&mut self, lsn: Lsn, cancel: &CancellationToken) -> Result<()>;

    /// Stop producing. Idempotent, bounded in time, and must release any
    /// pending [`Emitter::emit`].
    async fn stop(&mut self);
}

/// Creates the producer a task runs.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    /// Describe the server, establishing a session to do so.
    /// Fails with [`Error::Connection`].
    async fn server_info(&self) -> Result<String>;

    fn create(&self, mode: ProducerMode, source: SourceInfo) -> Box<dyn RecordsProducer>;
}
