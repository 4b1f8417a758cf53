//! SSLRequest negotiation for the replication connection.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::BytesMut;
use postgres_protocol::message::frontend;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::connect::{tls_client_config, ConnectionParams, SslMode};
use crate::error::{PgError, PgResult};

/// A TCP stream, optionally wrapped in TLS.
pub enum WireStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl WireStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, WireStream::Tls(_))
    }
}

impl AsyncRead for WireStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WireStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_flush(cx),
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WireStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            WireStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Upgrade `tcp` to TLS according to the sslmode.
///
/// `prefer` falls back to plaintext only when the server declines TLS; a
/// failed handshake is always an error.
pub async fn negotiate_tls(mut tcp: TcpStream, params: &ConnectionParams) -> PgResult<WireStream> {
    if params.ssl_mode == SslMode::Disable {
        return Ok(WireStream::Plain(tcp));
    }

    let mut request = BytesMut::with_capacity(8);
    frontend::ssl_request(&mut request);
    tcp.write_all(&request).await?;
    tcp.flush().await?;

    let mut answer = [0u8; 1];
    tcp.read_exact(&mut answer).await?;
    match answer[0] {
        b'S' => {}
        b'N' if !params.ssl_mode.requires_tls() => {
            debug!(host = %params.host, "Server declined TLS, continuing in plaintext");
            return Ok(WireStream::Plain(tcp));
        }
        b'N' => {
            return Err(PgError::Tls(format!(
                "server at {} does not support TLS",
                params.host
            )))
        }
        other => {
            return Err(PgError::Protocol(format!(
                "unexpected SSLRequest response 0x{:02X}",
                other
            )))
        }
    }

    let connector = TlsConnector::from(Arc::new(tls_client_config()?));
    let server_name = ServerName::try_from(params.host.clone())
        .map_err(|e| PgError::Tls(format!("invalid server name '{}': {}", params.host, e)))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| PgError::Tls(e.to_string()))?;

    debug!(host = %params.host, "TLS established");
    Ok(WireStream::Tls(Box::new(stream)))
}
