//! Start position resolution.
//!
//! A slot's confirmed flush position is the only safe resume point. The
//! stream tip is used solely for a slot that has never confirmed anything.

use std::future::Future;

use tokio_postgres::Client;
use tracing::{info, warn};
use walrelay_core::{format_lsn, parse_lsn, SubscriptionIdentity};

use crate::error::{PgError, PgResult};

/// What the upstream records for a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPosition {
    NotFound,
    /// The slot exists but `confirmed_flush_lsn` is NULL.
    Unconfirmed,
    /// Raw text as reported by the server.
    Confirmed(String),
}

/// Where streaming starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    Resume(u64),
    Tip(u64),
}

impl StartPosition {
    pub fn lsn(&self) -> u64 {
        match self {
            StartPosition::Resume(lsn) | StartPosition::Tip(lsn) => *lsn,
        }
    }

    pub fn is_resume(&self) -> bool {
        matches!(self, StartPosition::Resume(_))
    }
}

/// Source of confirmed slot positions (the metadata connection).
pub trait ConfirmedPositionSource: Send + Sync {
    fn confirmed_position(
        &self,
        slot_name: &str,
    ) -> impl Future<Output = PgResult<SlotPosition>> + Send;
}

impl ConfirmedPositionSource for Client {
    async fn confirmed_position(&self, slot_name: &str) -> PgResult<SlotPosition> {
        super::slot::slot_position(self, slot_name).await
    }
}

/// Resolve the start position for `identity`.
///
/// A confirmed position that does not parse is fatal. So is a query failure
/// or a missing slot: guessing the tip would silently skip committed changes.
pub async fn resolve_start_position<P>(
    source: &P,
    identity: &SubscriptionIdentity,
    tip: u64,
) -> PgResult<StartPosition>
where
    P: ConfirmedPositionSource,
{
    match source.confirmed_position(&identity.slot_name).await? {
        SlotPosition::Confirmed(text) => {
            let lsn = parse_lsn(&text).map_err(|_| {
                PgError::InvalidLsn(format!(
                    "slot {} reports unparseable confirmed_flush_lsn '{}'",
                    identity.slot_name, text
                ))
            })?;
            info!(slot = %identity.slot_name, lsn = %format_lsn(lsn), "Resuming from confirmed position");
            Ok(StartPosition::Resume(lsn))
        }
        SlotPosition::Unconfirmed => {
            warn!(
                slot = %identity.slot_name,
                lsn = %format_lsn(tip),
                "Slot has no confirmed position, starting from stream tip"
            );
            Ok(StartPosition::Tip(tip))
        }
        SlotPosition::NotFound => Err(PgError::SlotNotFound(identity.slot_name.clone())),
    }
}
