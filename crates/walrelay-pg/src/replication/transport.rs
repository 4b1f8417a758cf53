//! The frame-level seam between the streaming loop and the wire.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use super::protocol::{parse_copy_data, CopyDataMessage};
use super::wire::WireConnection;
use crate::error::PgResult;

/// A replication stream in CopyBoth mode.
pub trait ReplicationTransport: Send {
    /// Next classified CopyData message, or `None` when the server ends the
    /// copy. Must be cancel safe: dropping the future loses no data.
    fn recv(&mut self) -> impl Future<Output = PgResult<Option<CopyDataMessage>>> + Send;

    /// Send a standby status update acknowledging `position`.
    fn send_status(
        &mut self,
        position: u64,
        reply_requested: bool,
    ) -> impl Future<Output = PgResult<()>> + Send;

    /// Leave CopyBoth and release the connection.
    fn close(&mut self) -> impl Future<Output = PgResult<()>> + Send;
}

impl<S> ReplicationTransport for WireConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> PgResult<Option<CopyDataMessage>> {
        match self.recv_copy_data().await? {
            Some(payload) => Ok(Some(parse_copy_data(payload)?)),
            None => Ok(None),
        }
    }

    async fn send_status(&mut self, position: u64, reply_requested: bool) -> PgResult<()> {
        self.send_standby_status(position, reply_requested).await
    }

    async fn close(&mut self) -> PgResult<()> {
        WireConnection::close(self).await
    }
}
