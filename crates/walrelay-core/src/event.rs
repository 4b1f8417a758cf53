use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Operation, Row};

/// Schema-qualified table name of a change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRef {
    pub schema: String,
    pub table: String,
}

impl RelationRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

impl std::fmt::Display for RelationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// One committed row mutation decoded from the replication stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: Operation,
    pub relation: RelationRef,
    /// New row for inserts and updates; the key (or full old row) for deletes.
    pub columns: Row,
    /// Old image of an update, when the upstream sent one.
    pub old: Option<Row>,
    /// LSN of the change record. Rows of one multi-insert share it.
    pub wal_position: u64,
    /// Index among changes decoded at the same `wal_position`.
    pub ordinal: u32,
    pub commit_timestamp: Option<DateTime<Utc>>,
    pub xid: Option<u32>,
}

impl ChangeEvent {
    pub fn new(operation: Operation, relation: RelationRef, columns: Row, wal_position: u64) -> Self {
        Self {
            operation,
            relation,
            columns,
            old: None,
            wal_position,
            ordinal: 0,
            commit_timestamp: None,
            xid: None,
        }
    }
}
