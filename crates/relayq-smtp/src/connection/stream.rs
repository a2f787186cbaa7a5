//! Transport layer: opening the byte stream to the relay.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    rustls::{ClientConfig, RootCertStore},
};
use tracing::debug;

use crate::config::{Security, SmtpSettings};
use crate::error::{Error, Result};

/// Opens byte streams to `host:port` addresses.
pub trait Transport: Send + Sync + 'static {
    /// Stream produced by a successful connect.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Connects to `address` (`host:port`).
    fn connect(&self, address: &str) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// SMTP stream (TCP or TLS).
#[derive(Debug)]
pub enum SmtpStream {
    /// Plain TCP connection.
    Tcp(TcpStream),
    /// TLS-encrypted connection.
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// TCP transport with optional implicit TLS and connect timeout.
#[derive(Clone)]
pub struct TcpTransport {
    security: Security,
    connect_timeout: Option<Duration>,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("security", &self.security)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Creates a transport. A zero timeout disables the deadline.
    #[must_use]
    pub fn new(security: Security, connect_timeout: Duration) -> Self {
        let tls = match security {
            Security::None => None,
            Security::Implicit => Some(create_tls_connector()),
        };
        Self {
            security,
            connect_timeout: (!connect_timeout.is_zero()).then_some(connect_timeout),
            tls,
        }
    }

    /// Creates a transport matching the settings' security and timeout.
    #[must_use]
    pub fn from_settings(settings: &SmtpSettings) -> Self {
        Self::new(settings.security, settings.connect_timeout)
    }

    async fn open(&self, address: &str) -> Result<SmtpStream> {
        let tcp_stream = TcpStream::connect(address).await?;
        let Some(connector) = &self.tls else {
            return Ok(SmtpStream::Tcp(tcp_stream));
        };

        let hostname = host_part(address);
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|_| Error::connection(format!("Invalid hostname: {hostname}")))?;
        let tls_stream = connector.connect(server_name, tcp_stream).await?;
        Ok(SmtpStream::Tls(Box::new(tls_stream)))
    }
}

impl Transport for TcpTransport {
    type Stream = SmtpStream;

    async fn connect(&self, address: &str) -> Result<SmtpStream> {
        debug!(address, security = ?self.security, "opening transport");
        connect_within(self.connect_timeout, self.open(address)).await
    }
}

/// Runs `connect`, failing with [`Error::ConnectionTimeout`] once `limit`
/// elapses. `None` waits indefinitely.
pub(crate) async fn connect_within<T>(
    limit: Option<Duration>,
    connect: impl Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| Error::ConnectionTimeout(limit))?,
        None => connect.await,
    }
}

/// Extracts the host from `host:port`, unwrapping IPv6 brackets.
fn host_part(address: &str) -> &str {
    let host = address.rsplit_once(':').map_or(address, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Creates a TLS connector with the bundled web PKI roots.
fn create_tls_connector() -> TlsConnector {
    let root_store = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_host_part() {
        assert_eq!(host_part("smtp.example.com:587"), "smtp.example.com");
        assert_eq!(host_part("[::1]:25"), "::1");
        assert_eq!(host_part("localhost"), "localhost");
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let transport = TcpTransport::new(Security::None, Duration::ZERO);
        assert!(transport.connect_timeout.is_none());
        let transport = TcpTransport::new(Security::None, Duration::from_secs(3));
        assert_eq!(transport.connect_timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_past_deadline_times_out() {
        let limit = Duration::from_secs(3);
        let err = connect_within(Some(limit), std::future::pending::<Result<()>>())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionTimeout(after) if after == limit));
        assert!(err.is_timeout());
        assert!(err.is_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_within_deadline_passes_through() {
        let connect = async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(7)
        };
        assert_eq!(connect_within(Some(Duration::from_secs(3)), connect).await.unwrap(), 7);

        let refused = async {
            Err::<(), _>(Error::from(io::Error::from(io::ErrorKind::ConnectionRefused)))
        };
        let err = connect_within(Some(Duration::from_secs(3)), refused)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n").await.unwrap();
        });

        let transport = TcpTransport::new(Security::None, Duration::from_secs(3));
        let stream = transport.connect(&address).await.unwrap();
        assert!(matches!(stream, SmtpStream::Tcp(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_passes_through_as_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(Security::None, Duration::from_secs(3));
        let err = transport.connect(&address).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
