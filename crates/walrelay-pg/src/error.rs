use thiserror::Error;

/// SQLSTATE for "object already exists" (duplicate replication slot).
pub const DUPLICATE_OBJECT: &str = "42710";

#[derive(Debug, Error)]
pub enum PgError {
    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("{severity}: {message} (code: {code})")]
    Server {
        severity: String,
        code: String,
        message: String,
    },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("replication slot '{0}' does not exist")]
    SlotNotFound(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("pgoutput parse error: {0}")]
    PgOutput(String),

    #[error("relation {0} referenced before its relation message")]
    RelationNotFound(u32),

    #[error("cannot convert column '{column}' (type oid {type_oid}): {reason}")]
    InvalidValue {
        column: String,
        type_oid: u32,
        reason: String,
    },

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),
}

impl PgError {
    pub fn code(&self) -> Option<&str> {
        match self {
            PgError::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// The server refused to create an object because it already exists.
    pub fn is_duplicate_object(&self) -> bool {
        self.code() == Some(DUPLICATE_OBJECT)
    }

    /// A row change arrived for a relation the catalog has never seen.
    pub fn is_missing_relation(&self) -> bool {
        matches!(self, PgError::RelationNotFound(_))
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db_err) = e.as_db_error() {
            PgError::Server {
                severity: db_err.severity().to_string(),
                code: db_err.code().code().to_string(),
                message: db_err.message().to_string(),
            }
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

impl From<walrelay_core::Error> for PgError {
    fn from(e: walrelay_core::Error) -> Self {
        match e {
            walrelay_core::Error::InvalidLsn(s) => PgError::InvalidLsn(s),
            other => PgError::Protocol(other.to_string()),
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_object() {
        let err = PgError::Server {
            severity: "ERROR".into(),
            code: DUPLICATE_OBJECT.into(),
            message: "replication slot \"outbox_slot\" already exists".into(),
        };
        assert!(err.is_duplicate_object());
        assert!(!PgError::Connection("refused".into()).is_duplicate_object());
    }

    #[test]
    fn test_missing_relation() {
        assert!(PgError::RelationNotFound(16384).is_missing_relation());
        assert!(!PgError::PgOutput("short".into()).is_missing_relation());
    }

    #[test]
    fn test_lsn_error_conversion() {
        let err: PgError = walrelay_core::parse_lsn("garbage").unwrap_err().into();
        assert!(matches!(err, PgError::InvalidLsn(_)));
    }
}
