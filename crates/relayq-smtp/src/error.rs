//! Error types for relay operations.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::types::ReplyCode;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Relay error types.
///
/// Errors are cheap to clone so that one failed connect can be reported to
/// every caller that attached to it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport I/O error (DNS failure, connection refused, ...).
    #[error("I/O error: {0}")]
    Io(#[from] Arc<io::Error>),

    /// The connection was lost or could not be established.
    #[error("{message}")]
    Connection {
        /// Human readable reason.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Arc<io::Error>>,
    },

    /// Connecting took longer than the configured deadline.
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// The stream is no longer readable or writable.
    #[error("SMTP connection is no longer valid")]
    InvalidConnection,

    /// The server answered with an unexpected reply code.
    #[error("{message}")]
    Protocol {
        /// Description naming the command, expected and actual codes.
        message: String,
        /// Reply code received from the server.
        code: ReplyCode,
    },

    /// The server replied with a line that does not start with a reply code.
    #[error("Unexpected response format: {0}.")]
    MalformedReply(String),

    /// The server throttled the client.
    #[error("{message}")]
    TooManyMessages {
        /// Description naming the command, expected and actual codes.
        message: String,
        /// Reply code received from the server.
        code: ReplyCode,
    },

    /// The message has no envelope recipients.
    #[error("Message has no recipients")]
    MissingRecipients,

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// The queue worker is gone and can no longer deliver.
    #[error("Message queue is shut down")]
    QueueClosed,
}

impl Error {
    /// Creates a connection error without an underlying cause.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection error caused by an I/O failure.
    #[must_use]
    pub fn connection_caused_by(message: impl Into<String>, source: io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Returns true for reply-level failures, including throttling and
    /// malformed replies.
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::TooManyMessages { .. } | Self::MalformedReply(_)
        )
    }

    /// Returns true if the server signaled rate limiting.
    #[must_use]
    pub const fn is_too_many_messages(&self) -> bool {
        matches!(self, Self::TooManyMessages { .. })
    }

    /// Returns true if connecting exceeded its deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout(_))
    }

    /// Returns true for connection-level failures, timeouts included.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionTimeout(_) | Self::InvalidConnection
        )
    }

    /// Returns the server reply code attached to a protocol failure.
    #[must_use]
    pub const fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Self::Protocol { code, .. } | Self::TooManyMessages { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
