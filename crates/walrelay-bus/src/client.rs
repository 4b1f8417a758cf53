use std::future::Future;
use std::time::Duration;

use async_nats::jetstream::{self, stream};
use bytes::Bytes;
use tracing::{info, warn};

use crate::error::{BusError, BusResult};

/// Trait for message broker operations.
pub trait Broker: Send + Sync {
    /// Ensure the target stream exists. Idempotent.
    fn provision(&self, spec: &StreamSpec) -> impl Future<Output = BusResult<()>> + Send;

    /// Publish one message and wait for the broker's acknowledgement.
    fn publish(&self, message: OutboundMessage)
        -> impl Future<Output = BusResult<PublishAck>> + Send;

    /// Flush anything buffered on the connection.
    fn flush(&self) -> impl Future<Output = BusResult<()>> + Send;
}

/// The stream that captures published subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub duplicate_window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub subject: String,
    pub payload: Bytes,
    /// Sent as `Nats-Msg-Id` for broker-side deduplication.
    pub dedup_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// The broker already held a message with this dedup id.
    pub duplicate: bool,
}

/// Broker backed by NATS JetStream.
pub struct JetStreamBroker {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl JetStreamBroker {
    pub async fn connect(url: &str, connect_timeout: Duration) -> BusResult<Self> {
        let client = async_nats::ConnectOptions::new()
            .name("walrelay")
            .connection_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        info!(url = %url, "Connected to NATS");
        let context = jetstream::new(client.clone());
        Ok(Self { client, context })
    }
}

impl Broker for JetStreamBroker {
    async fn provision(&self, spec: &StreamSpec) -> BusResult<()> {
        let config = stream::Config {
            name: spec.name.clone(),
            subjects: spec.subjects.clone(),
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::Limits,
            duplicate_window: spec.duplicate_window,
            ..Default::default()
        };

        let stream = self
            .context
            .get_or_create_stream(config)
            .await
            .map_err(|e| BusError::Provision(e.to_string()))?;

        let existing = &stream.cached_info().config.subjects;
        let missing: Vec<&String> = spec
            .subjects
            .iter()
            .filter(|s| !existing.contains(s))
            .collect();
        if !missing.is_empty() {
            warn!(
                stream = %spec.name,
                missing = ?missing,
                "Existing stream does not capture all configured subjects"
            );
        }

        info!(
            stream = %spec.name,
            messages = stream.cached_info().state.messages,
            "Stream ready"
        );
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> BusResult<PublishAck> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, message.dedup_id.as_str());

        let ack = self
            .context
            .publish_with_headers(message.subject, headers, message.payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    async fn flush(&self) -> BusResult<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Connection(e.to_string()))
    }
}
