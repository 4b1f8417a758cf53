//! Builders for server-side bytes: pgoutput messages, CopyData payloads and
//! backend protocol frames.

/// pgoutput message builders.
pub mod pgoutput {
    /// One tuple column.
    #[derive(Debug, Clone, Copy)]
    pub enum Col<'a> {
        Null,
        Unchanged,
        Text(&'a str),
        Binary(&'a [u8]),
    }

    fn tuple(out: &mut Vec<u8>, columns: &[Col<'_>]) {
        out.extend_from_slice(&(columns.len() as i16).to_be_bytes());
        for column in columns {
            match column {
                Col::Null => out.push(b'n'),
                Col::Unchanged => out.push(b'u'),
                Col::Text(s) => {
                    out.push(b't');
                    out.extend_from_slice(&(s.len() as i32).to_be_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                Col::Binary(b) => {
                    out.push(b'b');
                    out.extend_from_slice(&(b.len() as i32).to_be_bytes());
                    out.extend_from_slice(b);
                }
            }
        }
    }

    fn cstr(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(s.as_bytes());
        out.push(0);
    }

    /// Relation message; columns are `(name, type oid, is key)`.
    pub fn relation(id: u32, namespace: &str, name: &str, columns: &[(&str, u32, bool)]) -> Vec<u8> {
        let mut out = vec![b'R'];
        out.extend_from_slice(&id.to_be_bytes());
        cstr(&mut out, namespace);
        cstr(&mut out, name);
        out.push(b'd');
        out.extend_from_slice(&(columns.len() as i16).to_be_bytes());
        for (column, type_oid, is_key) in columns {
            out.push(u8::from(*is_key));
            cstr(&mut out, column);
            out.extend_from_slice(&type_oid.to_be_bytes());
            out.extend_from_slice(&(-1i32).to_be_bytes());
        }
        out
    }

    pub fn begin(final_lsn: u64, timestamp: i64, xid: u32) -> Vec<u8> {
        let mut out = vec![b'B'];
        out.extend_from_slice(&final_lsn.to_be_bytes());
        out.extend_from_slice(&timestamp.to_be_bytes());
        out.extend_from_slice(&xid.to_be_bytes());
        out
    }

    pub fn commit(commit_lsn: u64, end_lsn: u64) -> Vec<u8> {
        let mut out = vec![b'C', 0];
        out.extend_from_slice(&commit_lsn.to_be_bytes());
        out.extend_from_slice(&end_lsn.to_be_bytes());
        out.extend_from_slice(&0i64.to_be_bytes());
        out
    }

    pub fn insert(relation_id: u32, columns: &[Col<'_>]) -> Vec<u8> {
        let mut out = vec![b'I'];
        out.extend_from_slice(&relation_id.to_be_bytes());
        out.push(b'N');
        tuple(&mut out, columns);
        out
    }

    /// Update; `old` is `(b'K' | b'O', columns)`.
    pub fn update(relation_id: u32, old: Option<(u8, &[Col<'_>])>, new: &[Col<'_>]) -> Vec<u8> {
        let mut out = vec![b'U'];
        out.extend_from_slice(&relation_id.to_be_bytes());
        if let Some((marker, columns)) = old {
            out.push(marker);
            tuple(&mut out, columns);
        }
        out.push(b'N');
        tuple(&mut out, new);
        out
    }

    pub fn delete_key(relation_id: u32, columns: &[Col<'_>]) -> Vec<u8> {
        let mut out = vec![b'D'];
        out.extend_from_slice(&relation_id.to_be_bytes());
        out.push(b'K');
        tuple(&mut out, columns);
        out
    }

    pub fn truncate(relation_ids: &[u32]) -> Vec<u8> {
        let mut out = vec![b'T'];
        out.extend_from_slice(&(relation_ids.len() as u32).to_be_bytes());
        out.push(0);
        for id in relation_ids {
            out.extend_from_slice(&id.to_be_bytes());
        }
        out
    }

    pub fn origin(name: &str) -> Vec<u8> {
        let mut out = vec![b'O'];
        out.extend_from_slice(&0u64.to_be_bytes());
        cstr(&mut out, name);
        out
    }
}

/// CopyData payloads sent by the server while streaming.
pub mod copy_data {
    use bytes::{BufMut, Bytes, BytesMut};

    pub fn xlog_data(wal_start: u64, data: &[u8]) -> Bytes {
        let mut out = BytesMut::with_capacity(25 + data.len());
        out.put_u8(b'w');
        out.put_u64(wal_start);
        out.put_u64(wal_start.saturating_add(data.len() as u64));
        out.put_i64(0);
        out.put_slice(data);
        out.freeze()
    }

    /// A Commit as the server frames it: at the transaction's end LSN.
    pub fn commit_frame(commit_lsn: u64, end_lsn: u64) -> Bytes {
        xlog_data(end_lsn, &super::pgoutput::commit(commit_lsn, end_lsn))
    }

    pub fn keepalive(wal_end: u64, reply_requested: bool) -> Bytes {
        let mut out = BytesMut::with_capacity(18);
        out.put_u8(b'k');
        out.put_u64(wal_end);
        out.put_i64(0);
        out.put_u8(u8::from(reply_requested));
        out.freeze()
    }
}

/// Backend (server to client) protocol frames.
pub mod backend {
    use bytes::{BufMut, BytesMut};

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(5 + body.len());
        out.put_u8(tag);
        out.put_i32(4 + body.len() as i32);
        out.put_slice(body);
        out.to_vec()
    }

    pub fn authentication(code: i32, extra: &[u8]) -> Vec<u8> {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(extra);
        frame(b'R', &body)
    }

    pub fn authentication_ok() -> Vec<u8> {
        authentication(0, &[])
    }

    pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(name.as_bytes());
        body.push(0);
        body.extend_from_slice(value.as_bytes());
        body.push(0);
        frame(b'S', &body)
    }

    pub fn backend_key_data(pid: i32, key: i32) -> Vec<u8> {
        let mut body = pid.to_be_bytes().to_vec();
        body.extend_from_slice(&key.to_be_bytes());
        frame(b'K', &body)
    }

    pub fn ready_for_query() -> Vec<u8> {
        frame(b'Z', b"I")
    }

    pub fn row_description(columns: &[&str]) -> Vec<u8> {
        let mut body = (columns.len() as i16).to_be_bytes().to_vec();
        for name in columns {
            body.extend_from_slice(name.as_bytes());
            body.push(0);
            body.extend_from_slice(&0i32.to_be_bytes()); // table oid
            body.extend_from_slice(&0i16.to_be_bytes()); // attnum
            body.extend_from_slice(&25i32.to_be_bytes()); // type oid
            body.extend_from_slice(&(-1i16).to_be_bytes()); // type size
            body.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
            body.extend_from_slice(&0i16.to_be_bytes()); // format
        }
        frame(b'T', &body)
    }

    pub fn data_row(values: &[Option<&str>]) -> Vec<u8> {
        let mut body = (values.len() as i16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(v) => {
                    body.extend_from_slice(&(v.len() as i32).to_be_bytes());
                    body.extend_from_slice(v.as_bytes());
                }
                None => body.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        frame(b'D', &body)
    }

    pub fn command_complete(tag: &str) -> Vec<u8> {
        let mut body = tag.as_bytes().to_vec();
        body.push(0);
        frame(b'C', &body)
    }

    pub fn error_response(code: &str, message: &str) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, value) in [(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', message)] {
            body.push(field);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
        body.push(0);
        frame(b'E', &body)
    }

    pub fn notice_response(message: &str) -> Vec<u8> {
        let mut body = vec![b'S'];
        body.extend_from_slice(b"NOTICE\0M");
        body.extend_from_slice(message.as_bytes());
        body.extend_from_slice(&[0, 0]);
        frame(b'N', &body)
    }

    pub fn copy_both_response() -> Vec<u8> {
        frame(b'W', &[0, 0, 0])
    }

    pub fn copy_data(payload: &[u8]) -> Vec<u8> {
        frame(b'd', payload)
    }

    pub fn copy_done() -> Vec<u8> {
        frame(b'c', &[])
    }
}
