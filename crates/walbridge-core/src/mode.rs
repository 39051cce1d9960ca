//! Choosing which producer runs, from persisted state and snapshot policy.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::offset::SourceOffset;

/// Snapshot policy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Snapshot when no offset exists, then stream.
    #[default]
    Initial,
    /// Snapshot on every start, then stream.
    Always,
    /// Never snapshot; stream only.
    Never,
    /// Snapshot when no offset exists and stop afterwards.
    InitialOnly,
}

impl SnapshotMode {
    pub fn never_allowed(self) -> bool {
        self == SnapshotMode::Never
    }

    pub fn always(self) -> bool {
        self == SnapshotMode::Always
    }

    pub fn initial_only(self) -> bool {
        self == SnapshotMode::InitialOnly
    }
}

/// The producer variant a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// Consume the live change log.
    Streaming,
    /// Read existing state first, optionally streaming once done.
    Snapshot { stream_afterwards: bool },
}

/// Inputs to mode selection, captured once at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState {
    pub has_prior_offset: bool,
    /// The prior offset was recorded in the middle of a snapshot.
    pub snapshot_in_effect: bool,
    pub never_snapshot: bool,
    pub always_snapshot: bool,
    pub initial_only_snapshot: bool,
}

impl TaskState {
    pub fn capture(prior: Option<&SourceOffset>, mode: SnapshotMode) -> Self {
        Self {
            has_prior_offset: prior.is_some(),
            snapshot_in_effect: prior.is_some_and(SourceOffset::is_snapshot_in_effect),
            never_snapshot: mode.never_allowed(),
            always_snapshot: mode.always(),
            initial_only_snapshot: mode.initial_only(),
        }
    }

    /// Pick the producer variant.
    ///
    /// An interrupted snapshot combined with a policy that forbids snapshots
    /// is refused outright instead of silently streaming past the gap.
    pub fn select_mode(&self) -> Result<ProducerMode> {
        let snapshot = ProducerMode::Snapshot {
            stream_afterwards: !self.initial_only_snapshot,
        };

        if !self.has_prior_offset {
            return Ok(if self.never_snapshot {
                ProducerMode::Streaming
            } else {
                snapshot
            });
        }

        if self.snapshot_in_effect {
            if self.never_snapshot {
                return Err(Error::Configuration(
                    "the task previously stopped while taking a snapshot, but snapshots are now \
                     disabled; reconfigure the task to allow snapshots initially or when needed"
                        .to_string(),
                ));
            }
            return Ok(snapshot);
        }

        if self.always_snapshot {
            Ok(ProducerMode::Snapshot {
                stream_afterwards: true,
            })
        } else {
            Ok(ProducerMode::Streaming)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::Lsn;

    fn state(prior: Option<SourceOffset>, mode: SnapshotMode) -> TaskState {
        TaskState::capture(prior.as_ref(), mode)
    }

    fn completed() -> Option<SourceOffset> {
        Some(SourceOffset::streaming(Lsn::new(100)))
    }

    fn interrupted() -> Option<SourceOffset> {
        Some(SourceOffset::snapshot(Lsn::new(100), false))
    }

    #[test]
    fn test_no_offset() {
        assert_eq!(
            state(None, SnapshotMode::Never).select_mode().unwrap(),
            ProducerMode::Streaming
        );
        assert_eq!(
            state(None, SnapshotMode::Initial).select_mode().unwrap(),
            ProducerMode::Snapshot {
                stream_afterwards: true
            }
        );
        assert_eq!(
            state(None, SnapshotMode::Always).select_mode().unwrap(),
            ProducerMode::Snapshot {
                stream_afterwards: true
            }
        );
        assert_eq!(
            state(None, SnapshotMode::InitialOnly).select_mode().unwrap(),
            ProducerMode::Snapshot {
                stream_afterwards: false
            }
        );
    }

    #[test]
    fn test_interrupted_snapshot() {
        let err = state(interrupted(), SnapshotMode::Never)
            .select_mode()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));

        assert_eq!(
            state(interrupted(), SnapshotMode::Initial)
                .select_mode()
                .unwrap(),
            ProducerMode::Snapshot {
                stream_afterwards: true
            }
        );
        assert_eq!(
            state(interrupted(), SnapshotMode::InitialOnly)
                .select_mode()
                .unwrap(),
            ProducerMode::Snapshot {
                stream_afterwards: false
            }
        );
    }

    #[test]
    fn test_completed_snapshot() {
        assert_eq!(
            state(completed(), SnapshotMode::Always)
                .select_mode()
                .unwrap(),
            ProducerMode::Snapshot {
                stream_afterwards: true
            }
        );
        for mode in [
            SnapshotMode::Initial,
            SnapshotMode::Never,
            SnapshotMode::InitialOnly,
        ] {
            assert_eq!(
                state(completed(), mode).select_mode().unwrap(),
                ProducerMode::Streaming,
                "mode {:?}",
                mode
            );
        }

        let last_snapshot_row = Some(SourceOffset::snapshot(Lsn::new(100), true));
        assert_eq!(
            state(last_snapshot_row, SnapshotMode::Initial)
                .select_mode()
                .unwrap(),
            ProducerMode::Streaming
        );
    }

    #[test]
    fn test_selection_covers_every_flag_combination() {
        for bits in 0u8..32 {
            let state = TaskState {
                has_prior_offset: bits & 1 != 0,
                snapshot_in_effect: bits & 2 != 0,
                never_snapshot: bits & 4 != 0,
                always_snapshot: bits & 8 != 0,
                initial_only_snapshot: bits & 16 != 0,
            };
            let first = state.select_mode();
            let second = state.select_mode();
            match (first, second) {
                (Ok(a), Ok(b)) => assert_eq!(a, b),
                (Err(Error::Configuration(_)), Err(Error::Configuration(_))) => {
                    assert!(state.has_prior_offset && state.snapshot_in_effect && state.never_snapshot)
                }
                other => panic!("unexpected selection for {:?}: {:?}", state, other),
            }
        }
    }
}
