//! SMTP commands and the replies they wait for.
//!
//! A [`Command`] is what the client wants to say; an [`SmtpMessage`] is the
//! wire text plus the [`Expectation`] the protocol writer uses to correlate
//! server replies with it.

use base64::Engine;

use crate::types::{Address, ReplyCode};

/// Label shown instead of base64 credential lines.
pub const CREDENTIALS_LABEL: &str = "credentials";

/// Line terminator used on the wire.
pub const CRLF: &str = "\r\n";

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// EHLO - Extended greeting, answered together with the server banner
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// HELO - Plain greeting, sent after the banner was already read
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// AUTH LOGIN - Start the LOGIN exchange
    AuthLogin,
    /// Base64 encoded username
    Username(String),
    /// Base64 encoded password
    Password(String),
    /// MAIL FROM - Start mail transaction (`None` is the null reverse path)
    MailFrom {
        /// Sender address
        from: Option<Address>,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// Dot-stuffed message content
    Body(String),
    /// Lone `.` closing the message content
    EndOfData,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Renders the command text without the line terminator.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::AuthLogin => "AUTH LOGIN".to_string(),
            Self::Username(value) | Self::Password(value) => {
                base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
            }
            Self::MailFrom { from } => match from {
                Some(from) => format!("MAIL FROM:<{from}>"),
                None => "MAIL FROM:<>".to_string(),
            },
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Body(content) => content.clone(),
            Self::EndOfData => ".".to_string(),
            Self::Quit => "QUIT".to_string(),
        }
    }

    /// Reply codes that count as success for this command.
    #[must_use]
    pub fn expectation(&self) -> Expectation {
        match self {
            Self::Ehlo { .. } => Expectation::Two(vec![ReplyCode::SERVICE_READY], vec![ReplyCode::OK]),
            Self::Helo { .. } | Self::MailFrom { .. } | Self::EndOfData => {
                Expectation::One(vec![ReplyCode::OK])
            }
            Self::AuthLogin | Self::Username(_) => Expectation::One(vec![ReplyCode::AUTH_CONTINUE]),
            Self::Password(_) => Expectation::One(vec![ReplyCode::AUTH_OK]),
            Self::RcptTo { .. } => Expectation::One(vec![ReplyCode::OK, ReplyCode::FORWARD]),
            Self::Data => Expectation::One(vec![ReplyCode::START_MAIL]),
            Self::Body(_) => Expectation::Nothing,
            Self::Quit => Expectation::One(vec![ReplyCode::DISCONNECTING]),
        }
    }

    /// Text used in logs and errors in place of the command itself.
    #[must_use]
    pub fn redacted(&self) -> Option<String> {
        match self {
            Self::Username(_) | Self::Password(_) => Some(CREDENTIALS_LABEL.to_string()),
            _ => None,
        }
    }
}

/// Replies the protocol writer waits for after writing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Written blob, no reply follows.
    Nothing,
    /// One reply with any of these codes.
    One(Vec<ReplyCode>),
    /// Two consecutive replies, each with its own accepted codes.
    Two(Vec<ReplyCode>, Vec<ReplyCode>),
}

/// One unit written to the server: text plus the expected replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpMessage {
    text: String,
    expectation: Expectation,
    redacted: Option<String>,
}

impl SmtpMessage {
    /// Creates a message expecting a single reply.
    #[must_use]
    pub fn single(text: impl Into<String>, codes: Vec<ReplyCode>) -> Self {
        Self {
            text: text.into(),
            expectation: Expectation::One(codes),
            redacted: None,
        }
    }

    /// Creates a message expecting two consecutive replies.
    #[must_use]
    pub fn double(text: impl Into<String>, first: Vec<ReplyCode>, second: Vec<ReplyCode>) -> Self {
        Self {
            text: text.into(),
            expectation: Expectation::Two(first, second),
            redacted: None,
        }
    }

    /// Creates a message that is written without waiting for a reply.
    #[must_use]
    pub fn blob(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expectation: Expectation::Nothing,
            redacted: None,
        }
    }

    /// Replaces the text shown in logs and error messages.
    #[must_use]
    pub fn redact_as(mut self, label: impl Into<String>) -> Self {
        self.redacted = Some(label.into());
        self
    }

    /// Returns the wire text without the line terminator.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the replies this message waits for.
    #[must_use]
    pub const fn expectation(&self) -> &Expectation {
        &self.expectation
    }

    /// Returns the redacted label, if any.
    #[must_use]
    pub fn redacted(&self) -> Option<&str> {
        self.redacted.as_deref()
    }

    /// Text that is safe to log.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.redacted.as_deref().unwrap_or(&self.text)
    }

    /// Serializes the message with its line terminator.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.text.len() + CRLF.len());
        buf.extend_from_slice(self.text.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
        buf
    }
}

impl From<Command> for SmtpMessage {
    fn from(command: Command) -> Self {
        Self {
            text: command.text(),
            expectation: command.expectation(),
            redacted: command.redacted(),
        }
    }
}
