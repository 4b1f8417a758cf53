use thiserror::Error;

/// Errors that can occur in walrelay-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: String },

    #[error("invalid subject '{0}'")]
    InvalidSubject(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
