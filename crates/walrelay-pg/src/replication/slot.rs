//! Replication slot inspection over the metadata connection.
//!
//! The streaming connection cannot run ordinary queries, so everything here
//! takes a regular `tokio_postgres::Client`.

use tokio_postgres::Client;
use walrelay_core::parse_lsn;

use super::position::SlotPosition;
use crate::error::PgResult;

/// Check if a replication slot exists.
pub async fn slot_exists(client: &Client, slot_name: &str) -> PgResult<bool> {
    let exists: bool = client
        .query_one(
            "SELECT EXISTS(SELECT 1 FROM pg_replication_slots WHERE slot_name = $1)",
            &[&slot_name],
        )
        .await?
        .get(0);

    Ok(exists)
}

/// Get the confirmed_flush_lsn for a slot, as text.
///
/// The outer `None` means no such slot; the inner one means the slot has not
/// confirmed anything yet.
pub async fn get_confirmed_flush_lsn(
    client: &Client,
    slot_name: &str,
) -> PgResult<Option<Option<String>>> {
    let row = client
        .query_opt(
            "SELECT confirmed_flush_lsn::text FROM pg_replication_slots WHERE slot_name = $1",
            &[&slot_name],
        )
        .await?;

    Ok(row.map(|r| r.get(0)))
}

pub(crate) async fn slot_position(client: &Client, slot_name: &str) -> PgResult<SlotPosition> {
    Ok(match get_confirmed_flush_lsn(client, slot_name).await? {
        None => SlotPosition::NotFound,
        Some(None) => SlotPosition::Unconfirmed,
        Some(Some(lsn)) => SlotPosition::Confirmed(lsn),
    })
}

/// Snapshot of a slot's row in `pg_replication_slots`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotInfo {
    pub slot_name: String,
    pub plugin: Option<String>,
    pub active: bool,
    pub restart_lsn: Option<String>,
    pub confirmed_flush_lsn: Option<String>,
    /// WAL retained on the server for this slot, in bytes.
    pub retained_wal_bytes: Option<i64>,
}

impl SlotInfo {
    pub fn confirmed_position(&self) -> PgResult<Option<u64>> {
        self.confirmed_flush_lsn
            .as_deref()
            .map(parse_lsn)
            .transpose()
            .map_err(Into::into)
    }
}

pub async fn slot_info(client: &Client, slot_name: &str) -> PgResult<Option<SlotInfo>> {
    let row = client
        .query_opt(
            r#"
            SELECT plugin::text,
                   active,
                   restart_lsn::text,
                   confirmed_flush_lsn::text,
                   pg_wal_lsn_diff(pg_current_wal_lsn(), restart_lsn)::bigint
            FROM pg_replication_slots
            WHERE slot_name = $1
            "#,
            &[&slot_name],
        )
        .await?;

    Ok(row.map(|r| SlotInfo {
        slot_name: slot_name.to_string(),
        plugin: r.get(0),
        active: r.get(1),
        restart_lsn: r.get(2),
        confirmed_flush_lsn: r.get(3),
        retained_wal_bytes: r.get(4),
    }))
}
