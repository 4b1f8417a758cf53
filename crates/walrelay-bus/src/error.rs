use std::time::Duration;

use thiserror::Error;

/// Errors from the message broker.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("stream provisioning failed: {0}")]
    Provision(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("cannot build event: {0}")]
    Envelope(#[from] walrelay_core::Error),

    #[error("publish failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<BusError>,
    },
}

impl BusError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Connection(_) | BusError::Publish(_) | BusError::Timeout(_)
        )
    }

    /// Check if this error is permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(self, BusError::Envelope(_))
    }
}

pub type BusResult<T> = Result<T, BusError>;
