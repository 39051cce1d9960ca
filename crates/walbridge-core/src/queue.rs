//! Bounded handoff between a producer's emitting task and the polling side.
//!
//! Backed by a bounded [`tokio::sync::mpsc`] channel: a full queue parks the
//! sender until the poller drains, and nothing is ever dropped. A parked
//! sender is released by cancelling the token passed to [`QueueSender::put`].

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::ChangeEvent;

/// Result of handing an event to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Shutdown was requested while waiting; the event was not queued.
    Cancelled,
}

/// Create a queue holding at most `capacity` events.
pub fn bounded(capacity: usize) -> (QueueSender, BackpressureQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, BackpressureQueue { rx, capacity })
}

/// Producer-side handle.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<ChangeEvent>,
}

impl QueueSender {
    /// Wait for capacity, then append.
    ///
    /// Returns [`Enqueued::Cancelled`] without queuing if `cancel` fires first
    /// or the polling side has gone away.
    pub async fn put(&self, event: ChangeEvent, cancel: &CancellationToken) -> Enqueued {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Enqueued::Cancelled,
            sent = self.tx.send(event) => match sent {
                Ok(()) => Enqueued::Accepted,
                Err(_) => Enqueued::Cancelled,
            },
        }
    }
}

/// Consumer-side handle.
#[derive(Debug)]
pub struct BackpressureQueue {
    rx: mpsc::Receiver<ChangeEvent>,
    capacity: usize,
}

impl BackpressureQueue {
    /// Move up to `max` events into `out` in FIFO order without waiting.
    /// Returns how many were moved.
    pub fn drain(&mut self, max: usize, out: &mut Vec<ChangeEvent>) -> usize {
        let mut drained = 0;
        while drained < max {
            match self.rx.try_recv() {
                Ok(event) => {
                    out.push(event);
                    drained += 1;
                }
                Err(_) => break,
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::lsn::Lsn;
    use crate::offset::{SourceOffset, SourcePartition};
    use crate::types::{Operation, RowEvent, SourceRecord};

    fn event(lsn: u64) -> ChangeEvent {
        let record = SourceRecord::new(
            SourcePartition::new("test"),
            SourceOffset::streaming(Lsn::new(lsn)),
            RowEvent {
                op: Operation::Insert,
                schema: "public".into(),
                table: "t".into(),
                new: None,
                old: None,
            },
        );
        ChangeEvent::new(record, true)
    }

    #[tokio::test]
    async fn test_drain_is_fifo_and_bounded() {
        let (tx, mut queue) = bounded(8);
        let cancel = CancellationToken::new();
        for lsn in 1..=5 {
            assert_eq!(tx.put(event(lsn), &cancel).await, Enqueued::Accepted);
        }

        let mut out = Vec::new();
        assert_eq!(queue.drain(3, &mut out), 3);
        assert_eq!(queue.drain(3, &mut out), 2);
        assert_eq!(queue.drain(3, &mut out), 0);
        let lsns: Vec<u64> = out.iter().map(|e| e.lsn().as_u64()).collect();
        assert_eq!(lsns, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_drained() {
        let (tx, mut queue) = bounded(2);
        let cancel = CancellationToken::new();
        tx.put(event(1), &cancel).await;
        tx.put(event(2), &cancel).await;
        assert_eq!(queue.len(), 2);

        let blocked = {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.put(event(3), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());
        assert_eq!(queue.len(), queue.capacity());

        let mut out = Vec::new();
        assert_eq!(queue.drain(1, &mut out), 1);
        assert_eq!(blocked.await.unwrap(), Enqueued::Accepted);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_releases_blocked_put() {
        let (tx, queue) = bounded(1);
        let cancel = CancellationToken::new();
        tx.put(event(1), &cancel).await;

        let blocked = {
            let cancel = cancel.clone();
            tokio::spawn(async move { tx.put(event(2), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        assert_eq!(blocked.await.unwrap(), Enqueued::Cancelled);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_put_after_queue_dropped_is_cancelled() {
        let (tx, queue) = bounded(1);
        drop(queue);
        let outcome = tx.put(event(1), &CancellationToken::new()).await;
        assert_eq!(outcome, Enqueued::Cancelled);
    }
}
