use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::event::{ChangeEvent, RelationRef};
use crate::lsn::format_lsn;
use crate::subscription::SubscriptionIdentity;
use crate::types::{Operation, Row, Value};

const EVENT_ID_LEN: usize = 32;

/// Self-describing payload published for each change.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: String,
    pub operation: Operation,
    pub relation: RelationRef,
    pub columns: Row,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Row>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unchanged: Vec<String>,
    pub occurred_at: DateTime<Utc>,
    pub wal_position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xid: Option<u32>,
}

impl EventEnvelope {
    /// Wrap a change for publishing.
    ///
    /// `occurred_at` is the commit timestamp when the stream supplied one and
    /// the current time otherwise.
    pub fn from_event(identity: &SubscriptionIdentity, event: ChangeEvent) -> Self {
        let id = event_id(identity, &event);
        let unchanged = event
            .columns
            .unchanged_columns()
            .into_iter()
            .map(str::to_string)
            .collect();

        Self {
            id,
            operation: event.operation,
            relation: event.relation,
            columns: event.columns,
            old: event.old,
            unchanged,
            occurred_at: event.commit_timestamp.unwrap_or_else(Utc::now),
            wal_position: format_lsn(event.wal_position),
            xid: event.xid,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Deterministic id for a change.
///
/// Replaying the same WAL record through the same slot yields the same id,
/// which lets the broker and consumers drop duplicates. Rows sharing a WAL
/// position are told apart by ordinal and contents.
pub fn event_id(identity: &SubscriptionIdentity, event: &ChangeEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity.slot_name.as_bytes());
    hasher.update([0]);
    hasher.update(event.wal_position.to_be_bytes());
    hasher.update(event.ordinal.to_be_bytes());
    hasher.update(event.relation.schema.as_bytes());
    hasher.update([0]);
    hasher.update(event.relation.table.as_bytes());
    hasher.update([0]);
    hasher.update(event.operation.as_str().as_bytes());
    hash_row(&mut hasher, &event.columns);
    if let Some(old) = &event.old {
        hasher.update([1]);
        hash_row(&mut hasher, old);
    }
    let mut id = hex::encode(hasher.finalize());
    id.truncate(EVENT_ID_LEN);
    id
}

fn hash_row(hasher: &mut Sha256, row: &Row) {
    for (name, value) in row.iter() {
        hasher.update([0]);
        hasher.update(name.as_bytes());
        hasher.update([0]);
        match value {
            Value::Unchanged => hasher.update([0xff]),
            other => hasher.update(other.to_json().to_string().as_bytes()),
        }
    }
}

/// Routing subject for a relation: `<prefix>.<table>`.
pub fn subject_for(prefix: &str, relation: &RelationRef) -> Result<String> {
    validate_subject(prefix)?;
    Ok(format!("{}.{}", prefix, sanitize_token(&relation.table)))
}

/// Make a table name usable as a single subject token.
pub fn sanitize_token(token: &str) -> String {
    if token.is_empty() {
        return "_".to_string();
    }
    token
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// A literal subject: dot separated, non-empty tokens, no wildcards.
pub fn validate_subject(subject: &str) -> Result<()> {
    let valid = !subject.is_empty()
        && subject.split('.').all(|token| {
            !token.is_empty()
                && token
                    .chars()
                    .all(|c| !matches!(c, '*' | '>') && !c.is_whitespace() && !c.is_control())
        });
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSubject(subject.to_string()))
    }
}

/// Whether `subject` falls under a subject filter such as `outbox.>` or `a.*.c`.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
