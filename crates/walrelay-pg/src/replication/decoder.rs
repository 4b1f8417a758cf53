//! Turns pgoutput messages into change events.
//!
//! Text-format values are converted by type oid; anything without a natural
//! JSON shape stays a string, binary-format values stay bytes.

use chrono::{DateTime, Utc};
use walrelay_core::{ChangeEvent, Operation, RelationRef, Row, Value};

use super::catalog::{ColumnDescriptor, RelationCatalog, RelationDescriptor};
use super::pgoutput::{
    parse_message, ColumnValue, DeleteMessage, InsertMessage, OldImage, PgOutputMessage,
    TupleData, UpdateMessage,
};
use super::protocol::pg_timestamp_to_utc;
use crate::error::{PgError, PgResult};

/// Built-in type oids with a dedicated conversion.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const VARCHAR: u32 = 1043;
    pub const JSONB: u32 = 3802;
}

/// Transaction the following changes belong to, from its Begin message.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnContext {
    pub xid: u32,
    pub final_lsn: u64,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// Outcome of decoding one pgoutput message.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Change(ChangeEvent),
    /// The catalog entry for this relation was created or replaced.
    Relation(RelationRef),
    Begin { xid: u32 },
    Commit { end_lsn: u64 },
    Truncate(Vec<RelationRef>),
    /// Type, Origin and logical Message records carry nothing to publish.
    Skipped(&'static str),
}

/// Stateful decoder for one session: owns the relation catalog and the
/// current transaction context.
#[derive(Debug, Default)]
pub struct LogicalDecoder {
    catalog: RelationCatalog,
    txn: Option<TxnContext>,
    /// Position and ordinal of the last decoded change.
    last_change: Option<(u64, u32)>,
}

impl LogicalDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &RelationCatalog {
        &self.catalog
    }

    pub fn transaction(&self) -> Option<&TxnContext> {
        self.txn.as_ref()
    }

    /// Decode one message. `wal_position` is the LSN the server framed it at.
    pub fn decode(&mut self, data: &[u8], wal_position: u64) -> PgResult<Decoded> {
        let decoded = match parse_message(data)? {
            PgOutputMessage::Relation(msg) => {
                let descriptor = RelationDescriptor::from(msg);
                let relation = descriptor.relation_ref();
                self.catalog.upsert(descriptor);
                Decoded::Relation(relation)
            }
            PgOutputMessage::Begin(begin) => {
                self.txn = Some(TxnContext {
                    xid: begin.xid,
                    final_lsn: begin.final_lsn,
                    commit_timestamp: pg_timestamp_to_utc(begin.timestamp),
                });
                Decoded::Begin { xid: begin.xid }
            }
            PgOutputMessage::Commit(commit) => {
                self.txn = None;
                Decoded::Commit {
                    end_lsn: commit.end_lsn,
                }
            }
            PgOutputMessage::Insert(msg) => {
                let event = decode_insert(&self.catalog, &msg, wal_position)?;
                Decoded::Change(self.finish_change(event))
            }
            PgOutputMessage::Update(msg) => {
                let event = decode_update(&self.catalog, &msg, wal_position)?;
                Decoded::Change(self.finish_change(event))
            }
            PgOutputMessage::Delete(msg) => {
                let event = decode_delete(&self.catalog, &msg, wal_position)?;
                Decoded::Change(self.finish_change(event))
            }
            PgOutputMessage::Truncate(msg) => Decoded::Truncate(
                msg.relation_ids
                    .iter()
                    .map(|id| self.catalog.get(*id).map(RelationDescriptor::relation_ref))
                    .collect::<PgResult<Vec<_>>>()?,
            ),
            other @ (PgOutputMessage::Type(_)
            | PgOutputMessage::Origin(_)
            | PgOutputMessage::Message(_)) => Decoded::Skipped(other.kind()),
        };
        Ok(decoded)
    }

    /// Attach transaction context and number rows that share a position.
    fn finish_change(&mut self, mut event: ChangeEvent) -> ChangeEvent {
        event.ordinal = match self.last_change {
            Some((position, ordinal)) if position == event.wal_position => {
                ordinal.saturating_add(1)
            }
            _ => 0,
        };
        self.last_change = Some((event.wal_position, event.ordinal));

        if let Some(txn) = &self.txn {
            event.xid = Some(txn.xid);
            event.commit_timestamp = txn.commit_timestamp;
        }
        event
    }
}

pub fn decode_insert(
    catalog: &RelationCatalog,
    msg: &InsertMessage,
    wal_position: u64,
) -> PgResult<ChangeEvent> {
    let relation = catalog.get(msg.relation_id)?;
    let columns = decode_tuple(relation, &msg.tuple, false)?;
    Ok(ChangeEvent::new(
        Operation::Insert,
        relation.relation_ref(),
        columns,
        wal_position,
    ))
}

/// Decode an update. The old image is optional; only the new row is required.
pub fn decode_update(
    catalog: &RelationCatalog,
    msg: &UpdateMessage,
    wal_position: u64,
) -> PgResult<ChangeEvent> {
    let relation = catalog.get(msg.relation_id)?;

    let old = match &msg.old_tuple {
        Some((image, tuple)) => Some(decode_tuple(relation, tuple, *image == OldImage::Key)?),
        None => None,
    };
    let mut columns = decode_tuple(relation, &msg.new_tuple, false)?;

    // A full old image lets unchanged TOAST values be filled in.
    if let (Some((OldImage::Full, _)), Some(old_row)) = (&msg.old_tuple, &old) {
        columns = columns
            .iter()
            .map(|(name, value)| {
                let value = match (value, old_row.get(name)) {
                    (Value::Unchanged, Some(previous)) if previous != &Value::Unchanged => {
                        previous.clone()
                    }
                    _ => value.clone(),
                };
                (name.to_string(), value)
            })
            .collect();
    }

    let mut event = ChangeEvent::new(
        Operation::Update,
        relation.relation_ref(),
        columns,
        wal_position,
    );
    event.old = old;
    Ok(event)
}

/// Decode a delete; `columns` holds the key (or the full old row).
pub fn decode_delete(
    catalog: &RelationCatalog,
    msg: &DeleteMessage,
    wal_position: u64,
) -> PgResult<ChangeEvent> {
    let relation = catalog.get(msg.relation_id)?;
    let columns = decode_tuple(relation, &msg.old_tuple, msg.image == OldImage::Key)?;
    Ok(ChangeEvent::new(
        Operation::Delete,
        relation.relation_ref(),
        columns,
        wal_position,
    ))
}

/// Pair tuple values with the relation's columns.
///
/// With `key_only`, non-key columns (sent as placeholders) are left out.
pub fn decode_tuple(
    relation: &RelationDescriptor,
    tuple: &TupleData,
    key_only: bool,
) -> PgResult<Row> {
    if tuple.columns.len() != relation.columns.len() {
        return Err(PgError::PgOutput(format!(
            "tuple for {}.{} has {} columns, relation has {}",
            relation.namespace,
            relation.name,
            tuple.columns.len(),
            relation.columns.len()
        )));
    }

    let mut row = Row::with_capacity(relation.columns.len());
    for (column, value) in relation.columns.iter().zip(&tuple.columns) {
        if key_only && !column.is_key {
            continue;
        }
        row.push(column.name.clone(), convert_value(column, value)?);
    }
    Ok(row)
}

/// Convert one wire value into a portable value.
pub fn convert_value(column: &ColumnDescriptor, value: &ColumnValue) -> PgResult<Value> {
    let text = match value {
        ColumnValue::Null => return Ok(Value::Null),
        ColumnValue::Unchanged => return Ok(Value::Unchanged),
        ColumnValue::Binary(bytes) => return Ok(Value::Bytes(bytes.clone())),
        ColumnValue::Text(bytes) => bytes,
    };

    let invalid = |reason: String| PgError::InvalidValue {
        column: column.name.clone(),
        type_oid: column.type_oid,
        reason,
    };

    if column.type_oid == oid::BYTEA {
        return match text.strip_prefix(b"\\x") {
            Some(hex_digits) => hex::decode(hex_digits)
                .map(Value::Bytes)
                .map_err(|e| invalid(e.to_string())),
            None => Ok(Value::Bytes(text.clone())),
        };
    }

    let text = std::str::from_utf8(text).map_err(|e| invalid(e.to_string()))?;

    let value = match column.type_oid {
        oid::BOOL => match text {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            other => return Err(invalid(format!("'{}' is not a boolean", other))),
        },
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => Value::Int(
            text.parse()
                .map_err(|_| invalid(format!("'{}' is not an integer", text)))?,
        ),
        oid::FLOAT4 | oid::FLOAT8 => Value::Float(parse_float(text).ok_or_else(|| {
            invalid(format!("'{}' is not a float", text))
        })?),
        oid::JSON | oid::JSONB => Value::Json(
            serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?,
        ),
        _ => Value::String(text.to_string()),
    };
    Ok(value)
}

fn parse_float(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}
