//! CopyData payloads exchanged during streaming replication.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::error::{PgError, PgResult};

/// 2000-01-01T00:00:00Z in microseconds since the Unix epoch.
pub const PG_EPOCH_MICROS: i64 = 946_684_800_000_000;

const XLOG_HEADER_LEN: usize = 24;
const KEEPALIVE_LEN: usize = 17;
pub const STANDBY_STATUS_LEN: usize = 34;

/// A WAL record batch from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XLogData {
    pub wal_start: u64,
    pub wal_end: u64,
    pub server_time: i64,
    pub data: Bytes,
}

impl XLogData {
    /// Position just past this record.
    pub fn end_position(&self) -> u64 {
        self.wal_start.saturating_add(self.data.len() as u64)
    }
}

/// Primary keepalive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub wal_end: u64,
    pub server_time: i64,
    pub reply_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyDataMessage {
    XLogData(XLogData),
    Keepalive(Keepalive),
    /// A kind byte this client does not know; skipped by the caller.
    Unknown(u8),
}

/// Classify a CopyData payload received from the server.
pub fn parse_copy_data(mut payload: Bytes) -> PgResult<CopyDataMessage> {
    if payload.is_empty() {
        return Err(PgError::Protocol("empty CopyData payload".into()));
    }

    match payload.get_u8() {
        b'w' => {
            if payload.remaining() < XLOG_HEADER_LEN {
                return Err(PgError::Protocol(format!(
                    "XLogData too short: {} bytes",
                    payload.remaining()
                )));
            }
            let wal_start = payload.get_u64();
            let wal_end = payload.get_u64();
            let server_time = payload.get_i64();
            Ok(CopyDataMessage::XLogData(XLogData {
                wal_start,
                wal_end,
                server_time,
                data: payload,
            }))
        }
        b'k' => {
            if payload.remaining() < KEEPALIVE_LEN {
                return Err(PgError::Protocol(format!(
                    "keepalive too short: {} bytes",
                    payload.remaining()
                )));
            }
            Ok(CopyDataMessage::Keepalive(Keepalive {
                wal_end: payload.get_u64(),
                server_time: payload.get_i64(),
                reply_requested: payload.get_u8() != 0,
            }))
        }
        other => Ok(CopyDataMessage::Unknown(other)),
    }
}

/// Standby status update reporting `position` as written, flushed and applied.
pub fn encode_standby_status(position: u64, client_time: i64, reply_requested: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(STANDBY_STATUS_LEN);
    out.put_u8(b'r');
    out.put_u64(position);
    out.put_u64(position);
    out.put_u64(position);
    out.put_i64(client_time);
    out.put_u8(u8::from(reply_requested));
    out.freeze()
}

/// Current time as microseconds since 2000-01-01.
pub fn pg_timestamp_now() -> i64 {
    Utc::now().timestamp_micros() - PG_EPOCH_MICROS
}

pub fn pg_timestamp_to_utc(pg_micros: i64) -> Option<DateTime<Utc>> {
    let unix_micros = pg_micros.checked_add(PG_EPOCH_MICROS)?;
    let nanos = (unix_micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(unix_micros.div_euclid(1_000_000), nanos)
}
