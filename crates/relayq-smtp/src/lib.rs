//! # relayq-smtp
//!
//! An asynchronous SMTP client engine that keeps one long-lived connection to
//! a mail relay and pushes messages through it in order.
//!
//! ## Features
//!
//! - **Queued delivery**: every [`MessageQueueManager::send`] is settled exactly
//!   once, in the order the messages were queued
//! - **Connection recycling**: reconnects after an idle period, after a number
//!   of messages, or after any failure
//! - **Coalesced connects**: concurrent callers share one in-flight connect or
//!   disconnect
//! - **Protocol writer**: replies are matched to commands strictly FIFO;
//!   credentials never appear in errors or logs
//! - **Handshake**: EHLO with HELO fallback, optional AUTH LOGIN, implicit TLS
//!
//! ## Quick Start
//!
//! ```ignore
//! use relayq_smtp::{Mailbox, OutgoingMessage, QueueSettings, SmtpQueue, SmtpSettings};
//!
//! #[tokio::main]
//! async fn main() -> relayq_smtp::Result<()> {
//!     let smtp = SmtpSettings::builder("smtp.example.com")
//!         .port(587)
//!         .credentials("user@example.com", "password")
//!         .build();
//!     let queue = SmtpQueue::for_relay(smtp, QueueSettings::default());
//!
//!     let message = OutgoingMessage::new()
//!         .from(Mailbox::new("sender@example.com")?)
//!         .to(Mailbox::new("recipient@example.com")?)
//!         .subject("Test")
//!         .body("Hello, World!");
//!
//!     queue.send(message).await?;
//!     queue.connection().disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! ```text
//! MessageQueueManager ──→ ConnectionManager ──→ SmtpConnector ──→ Transport
//!         │                                          │
//!         └──────────→ SmtpMessageSender ──→ SmtpWriter ←┘
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP commands and the replies they expect
//! - [`config`]: Relay and queue settings
//! - [`connection`]: Transport, protocol writer, handshake and lifecycle
//! - [`message`]: Mail messages accepted by the queue
//! - [`parser`]: Reply line parser
//! - [`queue`]: The message queue
//! - [`sender`]: Mail transactions
//! - [`types`]: Addresses and reply codes

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod config;
pub mod connection;
mod error;
pub mod message;
pub mod parser;
pub mod queue;
pub mod sender;
#[cfg(test)]
mod testing;
pub mod types;

pub use config::{QueueSettings, Security, SmtpSettings};
pub use connection::{
    Connection, ConnectionManager, ConnectionState, ConnectionWriter, Connector, Disconnection,
    SmtpConnector, SmtpWriter, TcpTransport, Transport,
};
pub use error::{Error, Result};
pub use message::{MailMessage, OutgoingMessage};
pub use queue::{MessageQueueManager, SendHandle, SmtpQueue};
pub use sender::{MessageSender, SmtpMessageSender};
pub use types::{Address, Mailbox, Reply, ReplyCode};
