mod client;
mod error;
mod mock;
mod publisher;

pub use client::{Broker, JetStreamBroker, OutboundMessage, PublishAck, StreamSpec};
pub use error::{BusError, BusResult};
pub use mock::MockBroker;
pub use publisher::{PublishPolicy, PublishReceipt, Publisher};
