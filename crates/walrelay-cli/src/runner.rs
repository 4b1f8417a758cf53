//! The streaming loop: read frames, decode, publish, acknowledge.
//!
//! Everything runs on one task. The only suspension points are the frame
//! read (raced against shutdown and the status timer) and the publish, so
//! WAL order and publish order are the same by construction.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use walrelay_bus::{Broker, BusError, Publisher};
use walrelay_core::{format_lsn, SessionCursor};
use walrelay_pg::replication::protocol::{CopyDataMessage, XLogData};
use walrelay_pg::replication::{Decoded, LogicalDecoder, ReplicationTransport};
use walrelay_pg::PgError;

const PROGRESS_EVERY: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Attached,
    Streaming,
    ShuttingDown,
    Faulted,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Attached => "attached",
            LoopState::Streaming => "streaming",
            LoopState::ShuttingDown => "shutting_down",
            LoopState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Conditions that end the session with a non-zero exit.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("upstream error: {0}")]
    Upstream(#[from] PgError),

    #[error("server ended the replication stream")]
    StreamEnded,

    #[error("change for relation {relation_id} arrived before its schema")]
    OrderingViolation { relation_id: u32 },

    #[error("failed to publish change at {lsn}: {source}")]
    Publish {
        lsn: String,
        #[source]
        source: BusError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub events_published: u64,
    /// Publishes the broker already held (replays after a restart).
    pub duplicates: u64,
    /// Records that failed to decode and were skipped.
    pub decode_failures: u64,
    pub statuses_sent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub state: LoopState,
    pub stats: LoopStats,
    pub last_applied: u64,
    pub last_acknowledged: u64,
}

pub struct StreamingLoop<T, B> {
    transport: T,
    publisher: Publisher<B>,
    decoder: LogicalDecoder,
    cursor: SessionCursor,
    status_interval: Duration,
    state: LoopState,
    stats: LoopStats,
}

impl<T, B> StreamingLoop<T, B>
where
    T: ReplicationTransport,
    B: Broker,
{
    /// `start` is the position streaming was started from; it is the first
    /// position reported back upstream.
    pub fn new(transport: T, publisher: Publisher<B>, start: u64, status_interval: Duration) -> Self {
        Self {
            transport,
            publisher,
            decoder: LogicalDecoder::new(),
            cursor: SessionCursor::new(start),
            status_interval,
            state: LoopState::Attached,
            stats: LoopStats::default(),
        }
    }

    /// Stream until shutdown is requested or a fatal error occurs.
    ///
    /// The connection is closed on every exit path. On shutdown the applied
    /// position is acknowledged one last time first.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<LoopSummary, StreamError> {
        self.state = LoopState::Streaming;
        info!(
            lsn = %format_lsn(self.cursor.last_applied()),
            status_interval_ms = self.status_interval.as_millis() as u64,
            "Streaming changes"
        );

        match self.stream(&mut shutdown).await {
            Ok(()) => {
                self.state = LoopState::ShuttingDown;
                info!(
                    lsn = %format_lsn(self.cursor.last_applied()),
                    "Shutdown requested, acknowledging applied position"
                );

                let result = self.send_status(false).await;
                self.release().await;
                result?;

                if let Err(e) = self.publisher.flush().await {
                    warn!(error = %e, "Failed to flush broker connection");
                }
                Ok(self.summary())
            }
            Err(e) => {
                self.state = LoopState::Faulted;
                error!(
                    error = %e,
                    lsn = %format_lsn(self.cursor.last_applied()),
                    acknowledged = %format_lsn(self.cursor.last_acknowledged()),
                    "Streaming failed"
                );
                self.release().await;
                Err(e)
            }
        }
    }

    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            state: self.state,
            stats: self.stats,
            last_applied: self.cursor.last_applied(),
            last_acknowledged: self.cursor.last_acknowledged(),
        }
    }

    async fn stream(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), StreamError> {
        let mut status_deadline = Instant::now() + self.status_interval;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            if Instant::now() >= status_deadline {
                self.send_status(false).await?;
                status_deadline = Instant::now() + self.status_interval;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // A dropped sender counts as a shutdown request.
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep_until(status_deadline) => {}
                message = self.transport.recv() => match message? {
                    Some(CopyDataMessage::XLogData(frame)) => self.handle_xlog(frame).await?,
                    Some(CopyDataMessage::Keepalive(keepalive)) => {
                        debug!(
                            wal_end = %format_lsn(keepalive.wal_end),
                            reply_requested = keepalive.reply_requested,
                            "Keepalive"
                        );
                        if keepalive.reply_requested {
                            status_deadline = Instant::now();
                        }
                    }
                    Some(CopyDataMessage::Unknown(kind)) => {
                        warn!(kind = %(kind as char), "Ignoring unknown CopyData message");
                    }
                    None => return Err(StreamError::StreamEnded),
                },
            }
        }
    }

    async fn handle_xlog(&mut self, frame: XLogData) -> Result<(), StreamError> {
        // A change frame starts at the change's LSN; acknowledging past it
        // could skip a later transaction whose commit begins there.
        let position = frame.wal_start;

        let decoded = match self.decoder.decode(&frame.data, position) {
            Ok(decoded) => decoded,
            Err(PgError::RelationNotFound(relation_id)) => {
                return Err(StreamError::OrderingViolation { relation_id })
            }
            Err(e) => {
                self.stats.decode_failures += 1;
                warn!(
                    lsn = %format_lsn(position),
                    error = %e,
                    "Skipping record that failed to decode"
                );
                return Ok(());
            }
        };

        let applied = match decoded {
            Decoded::Change(event) => {
                let receipt = self
                    .publisher
                    .publish(event)
                    .await
                    .map_err(|source| StreamError::Publish {
                        lsn: format_lsn(position),
                        source,
                    })?;

                self.stats.events_published += 1;
                if receipt.duplicate {
                    self.stats.duplicates += 1;
                }
                if self.stats.events_published % PROGRESS_EVERY == 0 {
                    info!(
                        events = self.stats.events_published,
                        lsn = %format_lsn(position),
                        "Progress"
                    );
                }
                position
            }
            Decoded::Relation(relation) => {
                debug!(relation = %relation, lsn = %format_lsn(position), "Relation schema updated");
                position
            }
            Decoded::Truncate(relations) => {
                warn!(
                    relations = ?relations.iter().map(|r| r.qualified_name()).collect::<Vec<_>>(),
                    lsn = %format_lsn(position),
                    "Truncate is not published"
                );
                position
            }
            // Commits are framed at the transaction's end.
            Decoded::Commit { end_lsn } => end_lsn,
            Decoded::Begin { .. } | Decoded::Skipped(_) => position,
        };

        self.cursor.advance_applied(applied);
        Ok(())
    }

    async fn send_status(&mut self, reply_requested: bool) -> Result<(), StreamError> {
        let position = self.cursor.last_applied();
        self.transport.send_status(position, reply_requested).await?;
        self.cursor.acknowledge();
        self.stats.statuses_sent += 1;
        debug!(lsn = %format_lsn(position), "Sent standby status");
        Ok(())
    }

    async fn release(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "Error closing replication connection");
        }
    }
}
