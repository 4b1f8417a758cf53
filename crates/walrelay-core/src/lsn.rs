//! LSN (Log Sequence Number) text codec.
//!
//! Postgres renders WAL positions as two hex halves separated by a slash
//! (`16/B374D848`). Internally positions are plain `u64`s.

use crate::error::{Error, Result};

/// Parse LSN from "X/Y" format to u64.
///
/// Both halves must be non-empty hex of at most 8 digits; anything else is
/// rejected rather than guessed at.
pub fn parse_lsn(lsn: &str) -> Result<u64> {
    let invalid = || Error::InvalidLsn(lsn.to_string());

    let (high, low) = lsn.trim().split_once('/').ok_or_else(invalid)?;
    if high.is_empty() || low.is_empty() || high.len() > 8 || low.len() > 8 {
        return Err(invalid());
    }

    let high = u64::from_str_radix(high, 16).map_err(|_| invalid())?;
    let low = u64::from_str_radix(low, 16).map_err(|_| invalid())?;

    Ok((high << 32) | low)
}

/// Format u64 LSN to "X/Y" format.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}
