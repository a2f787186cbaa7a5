//! One SMTP mail transaction per message.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;

use crate::command::Command;
use crate::connection::{ConnectionWriter, SmtpWriter};
use crate::error::{Error, Result};
use crate::message::MailMessage;
use crate::types::Address;

/// Transmits one message over an established connection.
pub trait MessageSender: Send + Sync + 'static {
    /// Writer the messages are sent through.
    type Writer: ConnectionWriter;
    /// Message type accepted by the queue.
    type Message: Send + Sync + 'static;

    /// Sends `message`, resolving once the server accepted it.
    fn send_message(
        &self,
        writer: &Self::Writer,
        message: &Self::Message,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Sends [`MailMessage`]s with MAIL FROM, RCPT TO and DATA, strictly one
/// command at a time.
pub struct SmtpMessageSender<M> {
    _message: PhantomData<fn() -> M>,
}

impl<M> SmtpMessageSender<M> {
    /// Creates a sender.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _message: PhantomData,
        }
    }
}

impl<M> Default for SmtpMessageSender<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for SmtpMessageSender<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SmtpMessageSender")
    }
}

impl<M: MailMessage> MessageSender for SmtpMessageSender<M> {
    type Writer = SmtpWriter;
    type Message = M;

    async fn send_message(&self, writer: &SmtpWriter, message: &M) -> Result<()> {
        let recipients = envelope_recipients(message);
        if recipients.is_empty() {
            return Err(Error::MissingRecipients);
        }

        let from = envelope_sender(message).cloned();
        writer.write(&Command::MailFrom { from }.into()).await?;
        for to in recipients {
            writer.write(&Command::RcptTo { to: to.clone() }.into()).await?;
        }
        writer.write(&Command::Data.into()).await?;

        let content = message.generate();
        let content = content
            .strip_suffix('\n')
            .map_or(content.as_str(), |rest| rest.strip_suffix('\r').unwrap_or(rest));
        writer.write(&Command::Body(dot_stuff(content)).into()).await?;
        writer.write(&Command::EndOfData.into()).await
    }
}

/// Envelope sender: the return path if set, else the first `From` address.
pub fn envelope_sender<M: MailMessage + ?Sized>(message: &M) -> Option<&Address> {
    message
        .return_path()
        .or_else(|| message.from_list().first().map(|mailbox| &mailbox.address))
}

/// Union of To, Cc and Bcc in that order, without case-insensitive
/// duplicates. The first spelling of an address is kept.
pub fn envelope_recipients<M: MailMessage + ?Sized>(message: &M) -> Vec<&Address> {
    let mut seen = HashSet::new();
    message
        .to_list()
        .iter()
        .chain(message.cc_list())
        .chain(message.bcc_list())
        .map(|mailbox| &mailbox.address)
        .filter(|address| seen.insert(address.dedup_key()))
        .collect()
}

/// Normalizes line endings to CRLF and doubles a leading `.` on every line.
#[must_use]
pub fn dot_stuff(content: &str) -> String {
    let mut stuffed = String::with_capacity(content.len() + 16);
    for (index, line) in content.split('\n').enumerate() {
        if index > 0 {
            stuffed.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            stuffed.push('.');
        }
        stuffed.push_str(line);
    }
    stuffed
}
