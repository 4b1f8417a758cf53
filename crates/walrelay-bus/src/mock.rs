use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::client::{Broker, OutboundMessage, PublishAck, StreamSpec};
use crate::error::{BusError, BusResult};

/// An in-memory broker for testing.
///
/// Honours dedup ids the way JetStream does within its duplicate window.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    /// Accepted messages in publish order.
    published: Vec<OutboundMessage>,
    seen_ids: HashSet<String>,
    streams: Vec<StreamSpec>,
    /// Number of publish attempts made, including failed ones.
    attempts: usize,
    /// Fail this many upcoming publishes.
    fail_next: u32,
    /// If set, every publish fails.
    fail_with: Option<String>,
    /// Each publish takes this long before answering.
    delay: Option<Duration>,
    flushes: usize,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock broker whose publishes always fail.
    pub fn failing(error_message: impl Into<String>) -> Self {
        let broker = Self::new();
        broker.state.lock().unwrap().fail_with = Some(error_message.into());
        broker
    }

    /// Fail the next `count` publishes with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().unwrap().fail_next = count;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn clear_delay(&self) {
        self.state.lock().unwrap().delay = None;
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn published_subjects(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.published.iter().map(|m| m.subject.clone()).collect()
    }

    pub fn total_published(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn streams(&self) -> Vec<StreamSpec> {
        self.state.lock().unwrap().streams.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().unwrap().flushes
    }
}

impl Broker for MockBroker {
    async fn provision(&self, spec: &StreamSpec) -> BusResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.streams.iter().any(|s| s.name == spec.name) {
            state.streams.push(spec.clone());
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> BusResult<PublishAck> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();

        if let Some(ref error) = state.fail_with {
            return Err(BusError::Publish(error.clone()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BusError::Publish("simulated failure".into()));
        }

        let stream = state
            .streams
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_default();

        if !state.seen_ids.insert(message.dedup_id.clone()) {
            return Ok(PublishAck {
                stream,
                sequence: state.published.len() as u64,
                duplicate: true,
            });
        }

        state.published.push(message);
        Ok(PublishAck {
            stream,
            sequence: state.published.len() as u64,
            duplicate: false,
        })
    }

    async fn flush(&self) -> BusResult<()> {
        self.state.lock().unwrap().flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn message(subject: &str, id: &str) -> OutboundMessage {
        OutboundMessage {
            subject: subject.into(),
            payload: Bytes::from_static(b"{}"),
            dedup_id: id.into(),
        }
    }

    #[tokio::test]
    async fn test_mock_broker_records_publishes() {
        let broker = MockBroker::new();
        broker
            .provision(&StreamSpec {
                name: "DOMAIN_EVENTS".into(),
                subjects: vec!["outbox.>".into()],
                duplicate_window: Duration::from_secs(120),
            })
            .await
            .unwrap();

        let ack = broker.publish(message("outbox.orders", "a")).await.unwrap();
        assert_eq!(ack.stream, "DOMAIN_EVENTS");
        assert_eq!(ack.sequence, 1);
        assert!(!ack.duplicate);

        broker.publish(message("outbox.users", "b")).await.unwrap();
        assert_eq!(broker.published_subjects(), vec!["outbox.orders", "outbox.users"]);
    }

    #[tokio::test]
    async fn test_mock_broker_deduplicates() {
        let broker = MockBroker::new();
        broker.publish(message("outbox.orders", "a")).await.unwrap();
        let ack = broker.publish(message("outbox.orders", "a")).await.unwrap();

        assert!(ack.duplicate);
        assert_eq!(broker.total_published(), 1);
        assert_eq!(broker.attempts(), 2);
    }

    #[tokio::test]
    async fn test_mock_broker_failures() {
        let broker = MockBroker::new();
        broker.fail_next(2);
        assert!(broker.publish(message("outbox.x", "1")).await.is_err());
        assert!(broker.publish(message("outbox.x", "1")).await.is_err());
        assert!(broker.publish(message("outbox.x", "1")).await.is_ok());

        let failing = MockBroker::failing("nats down");
        assert!(matches!(
            failing.publish(message("outbox.x", "1")).await,
            Err(BusError::Publish(ref m)) if m == "nats down"
        ));
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let broker = MockBroker::new();
        let spec = StreamSpec {
            name: "DOMAIN_EVENTS".into(),
            subjects: vec!["outbox.>".into()],
            duplicate_window: Duration::from_secs(120),
        };
        broker.provision(&spec).await.unwrap();
        broker.provision(&spec).await.unwrap();
        assert_eq!(broker.streams(), vec![spec]);
    }
}
