mod connect;
mod error;
pub mod replication;

pub use connect::{connect_postgres, query_connection_string, ConnectionParams, SslMode};
pub use error::{PgError, PgResult, DUPLICATE_OBJECT};
pub use replication::{
    check_replication_setup, slot_info, LogicalDecoder, ReplicationSession, ReplicationTransport,
    SessionHandle, SessionOptions, StartPosition,
};
