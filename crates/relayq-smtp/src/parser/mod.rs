//! SMTP reply line parser.
//!
//! Replies are CRLF-terminated lines starting with a three digit code:
//! - Single: `250 OK`
//! - Multi: `250-First line`, `250-Second line`, `250 Last line`
//!
//! A multi-line reply answers a single command, so continuation lines are
//! gathered by [`ReplyAssembler`] until the final line arrives.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Reply text some relays use to signal per-second rate limiting.
pub const TOO_MANY_MESSAGES_REPLIES: &[&str] =
    &["550 5.7.0 Requested action not taken: too many emails per second"];

/// Parses the leading reply code of a line.
///
/// The line must be exactly three digits, or three digits followed by a
/// non-digit character.
///
/// # Errors
///
/// Returns [`Error::MalformedReply`] if the line does not start with a code.
pub fn parse_code(line: &str) -> Result<ReplyCode> {
    let bytes = line.as_bytes();
    let well_formed = bytes.len() >= 3
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && bytes.get(3).is_none_or(|b| !b.is_ascii_digit());

    if !well_formed {
        return Err(Error::MalformedReply(line.to_string()));
    }

    line[..3]
        .parse::<u16>()
        .map(ReplyCode::new)
        .map_err(|_| Error::MalformedReply(line.to_string()))
}

/// Checks if a line continues a multi-line reply (`250-...`).
#[must_use]
pub fn is_continuation_line(line: &str) -> bool {
    parse_code(line).is_ok() && line.as_bytes().get(3) == Some(&b'-')
}

/// Checks if a reply line is the server's rate limit notice.
#[must_use]
pub fn is_too_many_messages(line: &str) -> bool {
    let line = line.trim();
    TOO_MANY_MESSAGES_REPLIES.contains(&line)
}

/// Gathers reply lines into complete replies.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    lines: Vec<String>,
}

impl ReplyAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without terminator).
    ///
    /// Returns `None` while a multi-line reply is still open, the complete
    /// reply once its last line arrives, or an error for a line without a
    /// reply code. A malformed line discards any partially gathered reply.
    pub fn push(&mut self, line: &str) -> Option<Result<Reply>> {
        let code = match parse_code(line) {
            Ok(code) => code,
            Err(err) => {
                self.lines.clear();
                return Some(Err(err));
            }
        };

        self.lines.push(line.to_string());
        if is_continuation_line(line) {
            return None;
        }

        Some(Ok(Reply::new(code, std::mem::take(&mut self.lines))))
    }

    /// Returns true if a multi-line reply is partially gathered.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.lines.is_empty()
    }
}
