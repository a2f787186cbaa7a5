//! Connection management: transport, protocol writer, SMTP handshake and
//! the shared connection lifecycle.

mod connector;
mod manager;
mod stream;
mod writer;

use std::future::Future;

pub use connector::SmtpConnector;
pub use manager::{
    Connection, ConnectionManager, ConnectionResult, ConnectionState, Disconnection,
    DisconnectionResult,
};
pub use stream::{SmtpStream, TcpTransport, Transport};
pub(crate) use stream::connect_within;
pub use writer::{CLOSED_MESSAGE, ENDED_MESSAGE, FAILED_MESSAGE, SmtpWriter};

use crate::error::Result;

/// Handle to a live connection.
pub trait ConnectionWriter: Send + Sync + 'static {
    /// Returns true until the peer closes the stream or it fails.
    fn is_valid(&self) -> bool;
}

/// Establishes and tears down sessions for a [`ConnectionManager`].
pub trait Connector: Send + Sync + 'static {
    /// Writer produced by a successful connect.
    type Writer: ConnectionWriter;

    /// Opens a ready-to-use session.
    fn connect(&self) -> impl Future<Output = Result<Self::Writer>> + Send;

    /// Closes the session behind `writer`.
    fn disconnect(&self, writer: &Self::Writer) -> impl Future<Output = Result<()>> + Send;
}
