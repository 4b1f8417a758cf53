//! Replication session bootstrap.
//!
//! Create the slot, identify the system, resolve the start position and
//! enter streaming. Any failure closes the connection and is returned to the
//! caller; there is no internal retry.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};
use walrelay_core::{format_lsn, SubscriptionIdentity};

use super::position::{resolve_start_position, ConfirmedPositionSource, StartPosition};
use super::tls::WireStream;
use super::wire::{SlotCreation, SystemIdentity, WireConnection};
use crate::connect::ConnectionParams;
use crate::error::PgResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub output_plugin: String,
    pub proto_version: u32,
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            output_plugin: "pgoutput".to_string(),
            proto_version: 2,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// An attached session, already in CopyBoth mode.
pub struct SessionHandle<S> {
    pub connection: WireConnection<S>,
    pub identity: SubscriptionIdentity,
    pub system: SystemIdentity,
    pub slot: SlotCreation,
    pub start: StartPosition,
}

pub struct ReplicationSession {
    identity: SubscriptionIdentity,
    options: SessionOptions,
}

impl ReplicationSession {
    pub fn new(identity: SubscriptionIdentity, options: SessionOptions) -> Self {
        Self { identity, options }
    }

    pub fn identity(&self) -> &SubscriptionIdentity {
        &self.identity
    }

    /// Connect to the replication endpoint and attach.
    pub async fn open<P>(
        &self,
        params: &ConnectionParams,
        positions: &P,
    ) -> PgResult<SessionHandle<WireStream>>
    where
        P: ConfirmedPositionSource,
    {
        let connection = WireConnection::connect(params, self.options.connect_timeout).await?;
        self.attach(connection, positions).await
    }

    /// Attach over an already started connection.
    pub async fn attach<S, P>(
        &self,
        mut connection: WireConnection<S>,
        positions: &P,
    ) -> PgResult<SessionHandle<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        P: ConfirmedPositionSource,
    {
        match self.bootstrap(&mut connection, positions).await {
            Ok((slot, system, start)) => Ok(SessionHandle {
                connection,
                identity: self.identity.clone(),
                system,
                slot,
                start,
            }),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "Failed to close connection after bootstrap error");
                }
                Err(e)
            }
        }
    }

    async fn bootstrap<S, P>(
        &self,
        connection: &mut WireConnection<S>,
        positions: &P,
    ) -> PgResult<(SlotCreation, SystemIdentity, StartPosition)>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        P: ConfirmedPositionSource,
    {
        let slot_name = &self.identity.slot_name;

        let slot = connection
            .create_replication_slot(slot_name, &self.options.output_plugin)
            .await?;
        match slot {
            SlotCreation::Created { consistent_point } => info!(
                slot = %slot_name,
                consistent_point = %format_lsn(consistent_point),
                "Created replication slot"
            ),
            SlotCreation::AlreadyExists => info!(slot = %slot_name, "Using existing replication slot"),
        }

        let system = connection.identify_system().await?;
        info!(
            system_id = %system.system_id,
            timeline = system.timeline,
            tip = %format_lsn(system.xlog_pos),
            "Identified upstream"
        );

        let start = resolve_start_position(positions, &self.identity, system.xlog_pos).await?;

        connection
            .start_replication(
                slot_name,
                start.lsn(),
                &self.identity.publication_name,
                self.options.proto_version,
            )
            .await?;
        info!(
            slot = %slot_name,
            publication = %self.identity.publication_name,
            lsn = %format_lsn(start.lsn()),
            "Replication started"
        );

        Ok((slot, system, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PgError, DUPLICATE_OBJECT};
    use crate::replication::fixtures::backend;
    use crate::replication::position::SlotPosition;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct FixedPosition(SlotPosition);

    impl ConfirmedPositionSource for FixedPosition {
        async fn confirmed_position(&self, _slot_name: &str) -> PgResult<SlotPosition> {
            Ok(self.0.clone())
        }
    }

    async fn read_message(server: &mut DuplexStream) -> (u8, String) {
        let tag = server.read_u8().await.unwrap();
        let len = server.read_i32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        server.read_exact(&mut body).await.unwrap();
        (tag, String::from_utf8_lossy(&body).trim_end_matches('\0').to_string())
    }

    async fn reply(server: &mut DuplexStream, frames: Vec<Vec<u8>>) {
        for frame in frames {
            server.write_all(&frame).await.unwrap();
        }
    }

    fn identify_reply() -> Vec<Vec<u8>> {
        vec![
            backend::row_description(&["systemid", "timeline", "xlogpos", "dbname"]),
            backend::data_row(&[Some("7301"), Some("1"), Some("0/3000148"), Some("app")]),
            backend::command_complete("IDENTIFY_SYSTEM"),
            backend::ready_for_query(),
        ]
    }

    fn session() -> ReplicationSession {
        ReplicationSession::new(
            SubscriptionIdentity::new("outbox_slot", "outbox_pub").unwrap(),
            SessionOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_attach_new_slot_starts_at_tip() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            let (_, sql) = read_message(&mut server).await;
            assert!(sql.starts_with("CREATE_REPLICATION_SLOT \"outbox_slot\""));
            reply(
                &mut server,
                vec![
                    backend::row_description(&["slot_name", "consistent_point"]),
                    backend::data_row(&[Some("outbox_slot"), Some("0/3000110")]),
                    backend::command_complete("CREATE_REPLICATION_SLOT"),
                    backend::ready_for_query(),
                ],
            )
            .await;

            let (_, sql) = read_message(&mut server).await;
            assert_eq!(sql, "IDENTIFY_SYSTEM");
            reply(&mut server, identify_reply()).await;

            let (_, sql) = read_message(&mut server).await;
            assert!(sql.contains("LOGICAL 0/3000148"), "{}", sql);
            assert!(sql.contains("publication_names 'outbox_pub'"));
            reply(&mut server, vec![backend::copy_both_response()]).await;
            server
        });

        let handle = session()
            .attach(
                WireConnection::new(client),
                &FixedPosition(SlotPosition::Unconfirmed),
            )
            .await
            .unwrap();

        assert_eq!(handle.start, StartPosition::Tip(0x3000148));
        assert_eq!(
            handle.slot,
            SlotCreation::Created {
                consistent_point: 0x3000110
            }
        );
        assert!(handle.connection.is_streaming());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_attach_existing_slot_resumes() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            read_message(&mut server).await;
            reply(
                &mut server,
                vec![
                    backend::error_response(DUPLICATE_OBJECT, "already exists"),
                    backend::ready_for_query(),
                ],
            )
            .await;

            read_message(&mut server).await;
            reply(&mut server, identify_reply()).await;

            let (_, sql) = read_message(&mut server).await;
            assert!(sql.contains("LOGICAL 0/16B3748"), "{}", sql);
            reply(&mut server, vec![backend::copy_both_response()]).await;
            server
        });

        let handle = session()
            .attach(
                WireConnection::new(client),
                &FixedPosition(SlotPosition::Confirmed("0/16B3748".into())),
            )
            .await
            .unwrap();

        assert_eq!(handle.slot, SlotCreation::AlreadyExists);
        assert_eq!(handle.start, StartPosition::Resume(0x16B3748));
        assert_eq!(handle.system.timeline, 1);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_failure_closes_connection() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            read_message(&mut server).await;
            reply(
                &mut server,
                vec![
                    backend::error_response(DUPLICATE_OBJECT, "already exists"),
                    backend::ready_for_query(),
                ],
            )
            .await;

            read_message(&mut server).await;
            reply(&mut server, identify_reply()).await;

            // Position resolution fails, so the next message is Terminate.
            let (tag, _) = read_message(&mut server).await;
            assert_eq!(tag, b'X');
        });

        let result = session()
            .attach(
                WireConnection::new(client),
                &FixedPosition(SlotPosition::Confirmed("not-an-lsn".into())),
            )
            .await;

        assert!(matches!(result, Err(PgError::InvalidLsn(_))));
        server_task.await.unwrap();
    }
}
