//! Change events as they travel through the handoff queue.

use crate::lsn::Lsn;
use crate::types::SourceRecord;

/// One emitted record plus the metadata needed for checkpointing.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    record: SourceRecord,
    lsn: Lsn,
    is_boundary: bool,
}

impl ChangeEvent {
    /// Wrap a record; its position is taken from the record's offset.
    ///
    /// `is_boundary` marks the last event emitted at that position.
    pub fn new(record: SourceRecord, is_boundary: bool) -> Self {
        let lsn = record.offset.lsn;
        Self {
            record,
            lsn,
            is_boundary,
        }
    }

    pub fn record(&self) -> &SourceRecord {
        &self.record
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn is_boundary(&self) -> bool {
        self.is_boundary
    }

    pub fn into_record(self) -> SourceRecord {
        self.record
    }
}

/// Decides boundaries for records arriving in emission order.
///
/// A record closes its position only once a record at a later position
/// shows up, so the newest record is always held back.
#[derive(Debug, Default)]
pub struct BoundaryMarker {
    held: Option<SourceRecord>,
}

impl BoundaryMarker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `record` and release the previously held one, flagged as a
    /// boundary when `record` moved past its position.
    pub fn push(&mut self, record: SourceRecord) -> Option<ChangeEvent> {
        let lsn = record.offset.lsn;
        self.held.replace(record).map(|previous| {
            let is_boundary = previous.offset.lsn != lsn;
            ChangeEvent::new(previous, is_boundary)
        })
    }

    /// Position of the record still waiting for its successor.
    pub fn held_lsn(&self) -> Option<Lsn> {
        self.held.as_ref().map(|r| r.offset.lsn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offset::{SourceOffset, SourcePartition};
    use crate::types::{Operation, RowEvent};

    fn record(lsn: u64) -> SourceRecord {
        SourceRecord::new(
            SourcePartition::new("test"),
            SourceOffset::streaming(Lsn::new(lsn)),
            RowEvent {
                op: Operation::Insert,
                schema: "public".into(),
                table: "t".into(),
                new: None,
                old: None,
            },
        )
    }

    #[test]
    fn test_event_takes_position_from_record() {
        let event = ChangeEvent::new(record(17), true);
        assert_eq!(event.lsn(), Lsn::new(17));
        assert!(event.is_boundary());
        assert_eq!(event.into_record().offset.lsn, Lsn::new(17));
    }

    #[test]
    fn test_marker_flags_last_of_each_lsn() {
        let mut marker = BoundaryMarker::new();
        let released: Vec<(u64, bool)> = [1, 1, 2, 3, 3]
            .into_iter()
            .filter_map(|lsn| marker.push(record(lsn)))
            .map(|e| (e.lsn().as_u64(), e.is_boundary()))
            .collect();

        assert_eq!(released, vec![(1, false), (1, true), (2, true), (3, false)]);
        assert_eq!(marker.held_lsn(), Some(Lsn::new(3)));
    }

    #[test]
    fn test_marker_holds_single_record() {
        let mut marker = BoundaryMarker::new();
        assert_eq!(marker.held_lsn(), None);
        assert!(marker.push(record(8)).is_none());
        assert!(marker.push(record(8)).is_some_and(|e| !e.is_boundary()));
        assert!(marker.push(record(9)).is_some_and(|e| e.is_boundary()));
    }
}
