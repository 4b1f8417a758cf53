pub mod cursor;
pub mod envelope;
pub mod error;
pub mod event;
pub mod lsn;
pub mod subscription;
pub mod types;

pub use cursor::SessionCursor;
pub use envelope::{event_id, subject_for, EventEnvelope};
pub use error::{Error, Result};
pub use event::{ChangeEvent, RelationRef};
pub use lsn::{format_lsn, parse_lsn};
pub use subscription::SubscriptionIdentity;
pub use types::{Operation, Row, Value};
