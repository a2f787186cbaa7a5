//! Mail messages handed to the queue.

use std::fmt::Write as _;

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::types::{Address, Mailbox};

/// A message the SMTP sender can deliver.
///
/// The envelope is derived from the header lists; [`generate`](Self::generate)
/// produces the RFC 5322 content written after `DATA`.
pub trait MailMessage: Send + Sync + 'static {
    /// Explicit envelope sender, overriding the first `From` address.
    fn return_path(&self) -> Option<&Address> {
        None
    }

    /// `From` mailboxes.
    fn from_list(&self) -> &[Mailbox];

    /// `To` mailboxes.
    fn to_list(&self) -> &[Mailbox];

    /// `Cc` mailboxes.
    fn cc_list(&self) -> &[Mailbox] {
        &[]
    }

    /// `Bcc` mailboxes; never rendered into the content.
    fn bcc_list(&self) -> &[Mailbox] {
        &[]
    }

    /// Renders headers and body, lines separated by CRLF.
    fn generate(&self) -> String;
}

/// A plain text email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    return_path: Option<Address>,
    from: Vec<Mailbox>,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    bcc: Vec<Mailbox>,
    subject: String,
    headers: Vec<(String, String)>,
    date: Option<DateTime<Utc>>,
    body: String,
}

impl OutgoingMessage {
    /// Creates an empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sender.
    #[must_use]
    pub fn from(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.from.push(mailbox.into());
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.to.push(mailbox.into());
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.cc.push(mailbox.into());
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, mailbox: impl Into<Mailbox>) -> Self {
        self.bcc.push(mailbox.into());
        self
    }

    /// Sets the envelope sender.
    #[must_use]
    pub fn with_return_path(mut self, address: Address) -> Self {
        self.return_path = Some(address);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds a header rendered after the standard ones.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Fixes the `Date` header instead of using the time of rendering.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Builds the RFC 5322 formatted message.
    fn to_rfc5322(&self) -> String {
        let mut message = String::new();

        if !self.from.is_empty() {
            let _ = write!(message, "From: {}\r\n", mailbox_list(&self.from));
        }
        if !self.to.is_empty() {
            let _ = write!(message, "To: {}\r\n", mailbox_list(&self.to));
        }
        if !self.cc.is_empty() {
            let _ = write!(message, "Cc: {}\r\n", mailbox_list(&self.cc));
        }
        let _ = write!(message, "Subject: {}\r\n", header_text(&self.subject));
        let date = self.date.unwrap_or_else(Utc::now);
        let _ = write!(message, "Date: {}\r\n", date.to_rfc2822());
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: 8bit\r\n");
        for (name, value) in &self.headers {
            let name: String = name
                .chars()
                .filter(|c| c.is_ascii_graphic() && *c != ':')
                .collect();
            if name.is_empty() {
                continue;
            }
            let _ = write!(message, "{name}: {}\r\n", header_text(value));
        }

        // Empty line between headers and body
        message.push_str("\r\n");
        message.push_str(&self.body);

        message
    }
}

impl MailMessage for OutgoingMessage {
    fn return_path(&self) -> Option<&Address> {
        self.return_path.as_ref()
    }

    fn from_list(&self) -> &[Mailbox] {
        &self.from
    }

    fn to_list(&self) -> &[Mailbox] {
        &self.to
    }

    fn cc_list(&self) -> &[Mailbox] {
        &self.cc
    }

    fn bcc_list(&self) -> &[Mailbox] {
        &self.bcc
    }

    fn generate(&self) -> String {
        self.to_rfc5322()
    }
}

/// Header text on a single line, encoded when it is not ASCII.
///
/// CR and LF would start a new header, so each run of them becomes a space.
fn header_text(text: &str) -> String {
    let mut line = String::with_capacity(text.len());
    let mut in_break = false;
    for c in text.chars() {
        if matches!(c, '\r' | '\n') {
            if !in_break {
                line.push(' ');
            }
            in_break = true;
        } else {
            line.push(c);
            in_break = false;
        }
    }
    encode_word(&line)
}

/// RFC 2047 base64 encoded word for non-ASCII header text.
fn encode_word(text: &str) -> String {
    if text.is_ascii() {
        text.to_string()
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
        )
    }
}

fn mailbox_list(mailboxes: &[Mailbox]) -> String {
    mailboxes
        .iter()
        .map(|mailbox| match &mailbox.name {
            Some(name) if !name.is_ascii() => {
                format!("{} <{}>", header_text(name), mailbox.address)
            }
            Some(name) if name.contains(['\r', '\n']) => {
                format!("\"{}\" <{}>", header_text(name).replace('"', "'"), mailbox.address)
            }
            _ => mailbox.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
