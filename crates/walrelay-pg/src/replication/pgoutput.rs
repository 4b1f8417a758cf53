//! Parser for the pgoutput logical replication message format.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html

use crate::error::{PgError, PgResult};

/// A parsed pgoutput message.
#[derive(Debug, Clone, PartialEq)]
pub enum PgOutputMessage {
    Begin(BeginMessage),
    Commit(CommitMessage),
    Relation(RelationMessage),
    Type(TypeMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    Truncate(TruncateMessage),
    Origin(OriginMessage),
    Message(LogicalMessage),
}

impl PgOutputMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PgOutputMessage::Begin(_) => "begin",
            PgOutputMessage::Commit(_) => "commit",
            PgOutputMessage::Relation(_) => "relation",
            PgOutputMessage::Type(_) => "type",
            PgOutputMessage::Insert(_) => "insert",
            PgOutputMessage::Update(_) => "update",
            PgOutputMessage::Delete(_) => "delete",
            PgOutputMessage::Truncate(_) => "truncate",
            PgOutputMessage::Origin(_) => "origin",
            PgOutputMessage::Message(_) => "message",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    pub final_lsn: u64,
    /// Microseconds since 2000-01-01.
    pub timestamp: i64,
    pub xid: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitMessage {
    pub flags: u8,
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMessage {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaIdentity {
    /// Primary key.
    Default,
    Nothing,
    /// All columns.
    Full,
    Index,
}

impl TryFrom<u8> for ReplicaIdentity {
    type Error = PgError;

    fn try_from(b: u8) -> PgResult<Self> {
        match b {
            b'd' => Ok(ReplicaIdentity::Default),
            b'n' => Ok(ReplicaIdentity::Nothing),
            b'f' => Ok(ReplicaIdentity::Full),
            b'i' => Ok(ReplicaIdentity::Index),
            other => Err(PgError::PgOutput(format!(
                "unknown replica identity '{}'",
                other as char
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationColumn {
    /// Bit 1 marks a replica identity (key) column.
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

impl RelationColumn {
    pub fn is_key(&self) -> bool {
        self.flags & 1 == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMessage {
    pub type_id: u32,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertMessage {
    pub relation_id: u32,
    pub tuple: TupleData,
}

/// Which old image accompanies an update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldImage {
    /// Replica identity columns only; the rest are sent as nulls.
    Key,
    /// The full old row (REPLICA IDENTITY FULL).
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    pub relation_id: u32,
    pub old_tuple: Option<(OldImage, TupleData)>,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessage {
    pub relation_id: u32,
    pub image: OldImage,
    pub old_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncateMessage {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginMessage {
    pub origin_lsn: u64,
    pub origin_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub flags: u8,
    pub lsn: u64,
    pub prefix: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleData {
    pub columns: Vec<ColumnValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    /// TOASTed value that did not change.
    Unchanged,
    /// Text output of the type; not yet validated as UTF-8.
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// Bounds-checked big-endian reader over one message.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> PgResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                PgError::PgOutput(format!(
                    "message truncated reading {} ({} of {} bytes consumed)",
                    what,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let buf = self.buf;
        let slice = &buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, what: &str) -> PgResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> PgResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn i16(&mut self, what: &str) -> PgResult<i16> {
        Ok(i16::from_be_bytes(self.array(what)?))
    }

    fn i32(&mut self, what: &str) -> PgResult<i32> {
        Ok(i32::from_be_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> PgResult<u32> {
        Ok(u32::from_be_bytes(self.array(what)?))
    }

    fn u64(&mut self, what: &str) -> PgResult<u64> {
        Ok(u64::from_be_bytes(self.array(what)?))
    }

    fn i64(&mut self, what: &str) -> PgResult<i64> {
        Ok(i64::from_be_bytes(self.array(what)?))
    }

    /// Null-terminated string.
    fn cstr(&mut self, what: &str) -> PgResult<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest.iter().position(|b| *b == 0).ok_or_else(|| {
            PgError::PgOutput(format!("unterminated string reading {}", what))
        })?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| PgError::PgOutput(format!("{} is not valid UTF-8", what)))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    fn count(&mut self, what: &str) -> PgResult<usize> {
        let n = self.i16(what)?;
        usize::try_from(n).map_err(|_| PgError::PgOutput(format!("negative {}: {}", what, n)))
    }

    fn length(&mut self, what: &str) -> PgResult<usize> {
        let n = self.i32(what)?;
        usize::try_from(n).map_err(|_| PgError::PgOutput(format!("negative {}: {}", what, n)))
    }
}

/// Parse one pgoutput message.
pub fn parse_message(data: &[u8]) -> PgResult<PgOutputMessage> {
    let (&msg_type, payload) = data
        .split_first()
        .ok_or_else(|| PgError::PgOutput("empty message".into()))?;
    let mut r = Reader::new(payload);

    let msg = match msg_type {
        b'B' => PgOutputMessage::Begin(BeginMessage {
            final_lsn: r.u64("final lsn")?,
            timestamp: r.i64("commit timestamp")?,
            xid: r.u32("xid")?,
        }),
        b'C' => PgOutputMessage::Commit(CommitMessage {
            flags: r.u8("flags")?,
            commit_lsn: r.u64("commit lsn")?,
            end_lsn: r.u64("end lsn")?,
            timestamp: r.i64("commit timestamp")?,
        }),
        b'R' => parse_relation(&mut r)?,
        b'Y' => PgOutputMessage::Type(TypeMessage {
            type_id: r.u32("type oid")?,
            namespace: r.cstr("type namespace")?,
            name: r.cstr("type name")?,
        }),
        b'I' => {
            let relation_id = r.u32("relation id")?;
            expect_marker(&mut r, b'N')?;
            PgOutputMessage::Insert(InsertMessage {
                relation_id,
                tuple: parse_tuple(&mut r)?,
            })
        }
        b'U' => parse_update(&mut r)?,
        b'D' => {
            let relation_id = r.u32("relation id")?;
            let image = match r.u8("tuple marker")? {
                b'K' => OldImage::Key,
                b'O' => OldImage::Full,
                other => {
                    return Err(PgError::PgOutput(format!(
                        "expected 'K' or 'O' for delete tuple, got '{}'",
                        other as char
                    )))
                }
            };
            PgOutputMessage::Delete(DeleteMessage {
                relation_id,
                image,
                old_tuple: parse_tuple(&mut r)?,
            })
        }
        b'T' => {
            let count = r.u32("relation count")? as usize;
            let options = r.u8("truncate options")?;
            let relation_ids = (0..count)
                .map(|_| r.u32("relation id"))
                .collect::<PgResult<Vec<_>>>()?;
            PgOutputMessage::Truncate(TruncateMessage {
                options,
                relation_ids,
            })
        }
        b'O' => PgOutputMessage::Origin(OriginMessage {
            origin_lsn: r.u64("origin lsn")?,
            origin_name: r.cstr("origin name")?,
        }),
        b'M' => {
            let flags = r.u8("flags")?;
            let lsn = r.u64("message lsn")?;
            let prefix = r.cstr("message prefix")?;
            let len = r.u32("content length")? as usize;
            let content = r.take(len, "message content")?.to_vec();
            PgOutputMessage::Message(LogicalMessage {
                flags,
                lsn,
                prefix,
                content,
            })
        }
        other => {
            return Err(PgError::PgOutput(format!(
                "unknown message type: {} (0x{:02X})",
                other as char, other
            )))
        }
    };

    Ok(msg)
}

fn parse_relation(r: &mut Reader<'_>) -> PgResult<PgOutputMessage> {
    let relation_id = r.u32("relation id")?;
    let namespace = r.cstr("namespace")?;
    let name = r.cstr("relation name")?;
    let replica_identity = ReplicaIdentity::try_from(r.u8("replica identity")?)?;
    let count = r.count("column count")?;

    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        columns.push(RelationColumn {
            flags: r.u8("column flags")?,
            name: r.cstr("column name")?,
            type_oid: r.u32("column type")?,
            type_modifier: r.i32("column type modifier")?,
        });
    }

    Ok(PgOutputMessage::Relation(RelationMessage {
        relation_id,
        namespace,
        name,
        replica_identity,
        columns,
    }))
}

fn parse_update(r: &mut Reader<'_>) -> PgResult<PgOutputMessage> {
    let relation_id = r.u32("relation id")?;

    let (old_tuple, new_tuple) = match r.u8("tuple marker")? {
        marker @ (b'K' | b'O') => {
            let image = if marker == b'K' {
                OldImage::Key
            } else {
                OldImage::Full
            };
            let old = parse_tuple(r)?;
            expect_marker(r, b'N')?;
            (Some((image, old)), parse_tuple(r)?)
        }
        b'N' => (None, parse_tuple(r)?),
        other => {
            return Err(PgError::PgOutput(format!(
                "unexpected tuple type in update: '{}'",
                other as char
            )))
        }
    };

    Ok(PgOutputMessage::Update(UpdateMessage {
        relation_id,
        old_tuple,
        new_tuple,
    }))
}

fn expect_marker(r: &mut Reader<'_>, expected: u8) -> PgResult<()> {
    let marker = r.u8("tuple marker")?;
    if marker != expected {
        return Err(PgError::PgOutput(format!(
            "expected '{}' tuple marker, got '{}'",
            expected as char, marker as char
        )));
    }
    Ok(())
}

fn parse_tuple(r: &mut Reader<'_>) -> PgResult<TupleData> {
    let count = r.count("tuple column count")?;
    let mut columns = Vec::with_capacity(count);

    for _ in 0..count {
        let value = match r.u8("column kind")? {
            b'n' => ColumnValue::Null,
            b'u' => ColumnValue::Unchanged,
            b't' => {
                let len = r.length("text length")?;
                ColumnValue::Text(r.take(len, "text value")?.to_vec())
            }
            b'b' => {
                let len = r.length("binary length")?;
                ColumnValue::Binary(r.take(len, "binary value")?.to_vec())
            }
            other => {
                return Err(PgError::PgOutput(format!(
                    "unknown column value type: '{}' (0x{:02X})",
                    other as char, other
                )))
            }
        };
        columns.push(value);
    }

    Ok(TupleData { columns })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_begin() {
        let mut data = vec![b'B'];
        data.extend_from_slice(&0x16B3748u64.to_be_bytes());
        data.extend_from_slice(&12345678i64.to_be_bytes());
        data.extend_from_slice(&123u32.to_be_bytes());

        match parse_message(&data).unwrap() {
            PgOutputMessage::Begin(b) => {
                assert_eq!(b.xid, 123);
                assert_eq!(b.final_lsn, 0x16B3748);
                assert_eq!(b.timestamp, 12345678);
            }
            other => panic!("expected Begin message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_commit() {
        let mut data = vec![b'C', 0];
        data.extend_from_slice(&100u64.to_be_bytes());
        data.extend_from_slice(&200u64.to_be_bytes());
        data.extend_from_slice(&12345i64.to_be_bytes());

        match parse_message(&data).unwrap() {
            PgOutputMessage::Commit(c) => {
                assert_eq!(c.commit_lsn, 100);
                assert_eq!(c.end_lsn, 200);
            }
            other => panic!("expected Commit message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_relation() {
        let mut data = vec![b'R'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.extend_from_slice(b"public\0");
        data.extend_from_slice(b"users\0");
        data.push(b'd');
        data.extend_from_slice(&2i16.to_be_bytes());
        data.push(1);
        data.extend_from_slice(b"id\0");
        data.extend_from_slice(&23u32.to_be_bytes());
        data.extend_from_slice(&(-1i32).to_be_bytes());
        data.push(0);
        data.extend_from_slice(b"name\0");
        data.extend_from_slice(&25u32.to_be_bytes());
        data.extend_from_slice(&(-1i32).to_be_bytes());

        match parse_message(&data).unwrap() {
            PgOutputMessage::Relation(r) => {
                assert_eq!(r.relation_id, 16384);
                assert_eq!(r.namespace, "public");
                assert_eq!(r.name, "users");
                assert_eq!(r.replica_identity, ReplicaIdentity::Default);
                assert_eq!(r.columns.len(), 2);
                assert!(r.columns[0].is_key());
                assert_eq!(r.columns[0].type_oid, 23);
                assert!(!r.columns[1].is_key());
                assert_eq!(r.columns[1].name, "name");
            }
            other => panic!("expected Relation message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_insert_with_null_and_unchanged() {
        let mut data = vec![b'I'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.push(b'N');
        data.extend_from_slice(&3i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&5i32.to_be_bytes());
        data.extend_from_slice(b"hello");
        data.push(b'n');
        data.push(b'u');

        match parse_message(&data).unwrap() {
            PgOutputMessage::Insert(i) => {
                assert_eq!(i.relation_id, 16384);
                assert_eq!(
                    i.tuple.columns,
                    vec![
                        ColumnValue::Text(b"hello".to_vec()),
                        ColumnValue::Null,
                        ColumnValue::Unchanged
                    ]
                );
            }
            other => panic!("expected Insert message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_update_with_key_image() {
        let mut data = vec![b'U'];
        data.extend_from_slice(&7u32.to_be_bytes());
        data.push(b'K');
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&1i32.to_be_bytes());
        data.push(b'1');
        data.push(b'N');
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&1i32.to_be_bytes());
        data.push(b'2');

        match parse_message(&data).unwrap() {
            PgOutputMessage::Update(u) => {
                let (image, old) = u.old_tuple.unwrap();
                assert_eq!(image, OldImage::Key);
                assert_eq!(old.columns, vec![ColumnValue::Text(b"1".to_vec())]);
                assert_eq!(u.new_tuple.columns, vec![ColumnValue::Text(b"2".to_vec())]);
            }
            other => panic!("expected Update message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_delete() {
        let mut data = vec![b'D'];
        data.extend_from_slice(&16384u32.to_be_bytes());
        data.push(b'O');
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&1i32.to_be_bytes());
        data.push(b'1');

        match parse_message(&data).unwrap() {
            PgOutputMessage::Delete(d) => {
                assert_eq!(d.relation_id, 16384);
                assert_eq!(d.image, OldImage::Full);
                assert_eq!(d.old_tuple.columns.len(), 1);
            }
            other => panic!("expected Delete message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_truncate() {
        let mut data = vec![b'T'];
        data.extend_from_slice(&2u32.to_be_bytes());
        data.push(1);
        data.extend_from_slice(&10u32.to_be_bytes());
        data.extend_from_slice(&11u32.to_be_bytes());

        match parse_message(&data).unwrap() {
            PgOutputMessage::Truncate(t) => {
                assert_eq!(t.options, 1);
                assert_eq!(t.relation_ids, vec![10, 11]);
            }
            other => panic!("expected Truncate message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_logical_message() {
        let mut data = vec![b'M', 1];
        data.extend_from_slice(&0x20u64.to_be_bytes());
        data.extend_from_slice(b"outbox\0");
        data.extend_from_slice(&3u32.to_be_bytes());
        data.extend_from_slice(b"abc");

        match parse_message(&data).unwrap() {
            PgOutputMessage::Message(m) => {
                assert_eq!(m.prefix, "outbox");
                assert_eq!(m.content, b"abc");
            }
            other => panic!("expected logical message, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_messages_are_errors() {
        assert!(parse_message(&[]).is_err());
        assert!(parse_message(&[b'B', 0, 0]).is_err());

        // Text value claims 10 bytes but carries 2.
        let mut data = vec![b'I'];
        data.extend_from_slice(&1u32.to_be_bytes());
        data.push(b'N');
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&10i32.to_be_bytes());
        data.extend_from_slice(b"ab");
        assert!(matches!(parse_message(&data), Err(PgError::PgOutput(_))));

        // Negative length.
        let mut data = vec![b'I'];
        data.extend_from_slice(&1u32.to_be_bytes());
        data.push(b'N');
        data.extend_from_slice(&1i16.to_be_bytes());
        data.push(b't');
        data.extend_from_slice(&(-5i32).to_be_bytes());
        assert!(parse_message(&data).is_err());
    }

    #[test]
    fn test_unknown_message_type() {
        let err = parse_message(&[b'Z', 1, 2, 3]).unwrap_err();
        assert!(err.to_string().contains("unknown message type"));
    }
}
