//! Logical replication over the streaming protocol with pgoutput.
//!
//! `wire` speaks the protocol, `protocol` classifies CopyData payloads,
//! `pgoutput` parses the plugin's messages and `decoder` turns them into
//! change events against the relation `catalog`.

pub mod catalog;
pub mod decoder;
pub mod pgoutput;
pub mod position;
pub mod protocol;
pub mod publication;
pub mod session;
pub mod slot;
pub mod tls;
pub mod transport;
pub mod validation;
pub mod wire;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use catalog::{ColumnDescriptor, RelationCatalog, RelationDescriptor};
pub use decoder::{Decoded, LogicalDecoder, TxnContext};
pub use pgoutput::{parse_message, PgOutputMessage};
pub use position::{
    resolve_start_position, ConfirmedPositionSource, SlotPosition, StartPosition,
};
pub use protocol::{
    encode_standby_status, parse_copy_data, CopyDataMessage, Keepalive, XLogData,
};
pub use publication::{publication_exists, publication_tables};
pub use session::{ReplicationSession, SessionHandle, SessionOptions};
pub use slot::{get_confirmed_flush_lsn, slot_exists, slot_info, SlotInfo};
pub use tls::WireStream;
pub use transport::ReplicationTransport;
pub use validation::{check_replication_setup, PublicationStatus, ReplicationStatus, SlotStatus};
pub use wire::{QueryResult, SlotCreation, SystemIdentity, WireConnection};
