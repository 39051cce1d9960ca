use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::offset::{SourceOffset, SourcePartition};

/// A column value carried by a row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

/// The kind of change a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Row read by a snapshot.
    Read,
    Insert,
    Update,
    Delete,
}

/// A row map containing column name to value mappings.
pub type RowMap = HashMap<String, Value>;

/// A single row-level change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEvent {
    pub op: Operation,
    /// The schema name (e.g., "public").
    pub schema: String,
    pub table: String,
    /// The new row values (present for read/insert/update).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<RowMap>,
    /// The old row values (present for update/delete with replica identity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<RowMap>,
}

/// The unit handed to the polling consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub partition: SourcePartition,
    pub offset: SourceOffset,
    pub event: RowEvent,
}

impl SourceRecord {
    pub fn new(partition: SourcePartition, offset: SourceOffset, event: RowEvent) -> Self {
        Self {
            partition,
            offset,
            event,
        }
    }
}
