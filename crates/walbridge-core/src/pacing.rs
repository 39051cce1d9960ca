//! Pacing for the poll loop: a fixed-period sleeper and a deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of [`Metronome::pause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    Elapsed,
    Cancelled,
}

/// Sleeps one fixed period per call.
#[derive(Debug, Clone, Copy)]
pub struct Metronome {
    period: Duration,
}

impl Metronome {
    pub fn sleeper(period: Duration) -> Self {
        Self { period }
    }

    /// Sleep one period, waking early if `cancel` fires.
    pub async fn pause(&self, cancel: &CancellationToken) -> Pause {
        tokio::select! {
            _ = cancel.cancelled() => Pause::Cancelled,
            _ = tokio::time::sleep(self.period) => Pause::Elapsed,
        }
    }
}

/// A deadline measured from creation.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    deadline: Instant,
}

impl Timer {
    pub fn after(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
