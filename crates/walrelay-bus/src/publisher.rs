//! Change event publishing with bounded retry.
//!
//! A publish either succeeds or fails for good after the configured attempts;
//! events are never dropped.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};
use walrelay_core::{format_lsn, subject_for, ChangeEvent, EventEnvelope, SubscriptionIdentity};

use crate::client::{Broker, OutboundMessage, StreamSpec};
use crate::error::{BusError, BusResult};

/// Timeout and backoff for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Limit on each attempt, including the wait for the ack.
    pub timeout: Duration,
    /// Attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl PublishPolicy {
    /// Delay before retry number `attempt` (0-based), doubling up to `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event_id: String,
    pub subject: String,
    pub sequence: u64,
    pub duplicate: bool,
    pub attempts: u32,
}

/// Serializes change events and submits them to a broker.
pub struct Publisher<B> {
    broker: B,
    identity: SubscriptionIdentity,
    subject_prefix: String,
    policy: PublishPolicy,
}

impl<B: Broker> Publisher<B> {
    pub fn new(
        broker: B,
        identity: SubscriptionIdentity,
        subject_prefix: impl Into<String>,
        policy: PublishPolicy,
    ) -> Self {
        Self {
            broker,
            identity,
            subject_prefix: subject_prefix.into(),
            policy,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn policy(&self) -> &PublishPolicy {
        &self.policy
    }

    pub async fn provision(&self, spec: &StreamSpec) -> BusResult<()> {
        self.broker.provision(spec).await
    }

    pub async fn flush(&self) -> BusResult<()> {
        self.broker.flush().await
    }

    /// Build the outbound message for `event`.
    pub fn prepare(&self, event: ChangeEvent) -> BusResult<OutboundMessage> {
        let subject = subject_for(&self.subject_prefix, &event.relation)?;
        let envelope = EventEnvelope::from_event(&self.identity, event);
        let payload = envelope.to_bytes()?;

        Ok(OutboundMessage {
            subject,
            payload: Bytes::from(payload),
            dedup_id: envelope.id,
        })
    }

    /// Publish `event`, retrying transient failures with capped backoff.
    pub async fn publish(&self, event: ChangeEvent) -> BusResult<PublishReceipt> {
        let wal_position = event.wal_position;
        let message = self.prepare(event)?;
        let mut attempt = 0u32;

        loop {
            let result = tokio::time::timeout(self.policy.timeout, self.broker.publish(message.clone()))
                .await
                .unwrap_or(Err(BusError::Timeout(self.policy.timeout)));

            let error = match result {
                Ok(ack) => {
                    debug!(
                        subject = %message.subject,
                        event_id = %message.dedup_id,
                        lsn = %format_lsn(wal_position),
                        sequence = ack.sequence,
                        duplicate = ack.duplicate,
                        "Published event"
                    );
                    return Ok(PublishReceipt {
                        event_id: message.dedup_id,
                        subject: message.subject,
                        sequence: ack.sequence,
                        duplicate: ack.duplicate,
                        attempts: attempt.saturating_add(1),
                    });
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if attempt == self.policy.max_retries {
                return Err(BusError::RetriesExhausted {
                    attempts: attempt.saturating_add(1),
                    last: Box::new(error),
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                subject = %message.subject,
                lsn = %format_lsn(wal_position),
                attempt = attempt.saturating_add(1),
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Publish failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
