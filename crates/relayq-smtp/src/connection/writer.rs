//! Protocol writer: command/reply correlation over one stream.
//!
//! Every written [`SmtpMessage`] registers the replies it expects in a FIFO
//! queue. A background task reads reply lines from the stream and settles
//! the oldest expected response with each complete reply. SMTP servers never
//! reorder replies, so no other matching is attempted. Replies that arrive
//! before the first message is written (the server banner) are held for it;
//! later replies with nothing waiting are dropped.
//!
//! When the stream ends, is closed by the peer or fails, every response still
//! waiting is failed with a connection error once the reply being processed
//! (if any) has been settled.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::ConnectionWriter;
use crate::command::{Expectation, SmtpMessage};
use crate::error::{Error, Result};
use crate::parser::{self, ReplyAssembler};
use crate::types::{Reply, ReplyCode};

/// Reason reported when the peer ends the stream.
pub const ENDED_MESSAGE: &str = "SMTP server unexpectedly ended connection.";

/// Reason reported when the peer resets or closes the stream.
pub const CLOSED_MESSAGE: &str = "SMTP server unexpectedly closed connection.";

/// Reason reported for any other stream failure.
pub const FAILED_MESSAGE: &str = "SMTP server connection error.";

type Completion = oneshot::Sender<Result<()>>;

/// A reply the writer is waiting for.
struct ExpectedResponse {
    completion: Completion,
    codes: Vec<ReplyCode>,
    command: String,
    redacted: Option<String>,
}

impl ExpectedResponse {
    fn label(&self) -> String {
        self.redacted
            .clone()
            .unwrap_or_else(|| format!("message {}", self.command))
    }

    fn settle(self, reply: &Reply) {
        if self.codes.contains(&reply.code) {
            debug!(code = %reply.code, "code OK");
            let _ = self.completion.send(Ok(()));
            return;
        }

        debug!(code = %reply.code, "code WRONG");
        let expected = self
            .codes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("|");
        let message = format!(
            "SMTP server did not accept {}. Expected code: {expected}. Actual code: {}.",
            self.label(),
            reply.code
        );
        let err = if parser::is_too_many_messages(reply.last_line()) {
            Error::TooManyMessages {
                message,
                code: reply.code,
            }
        } else {
            Error::Protocol {
                message,
                code: reply.code,
            }
        };
        let _ = self.completion.send(Err(err));
    }

    fn fail(self, err: Error) {
        let _ = self.completion.send(Err(err));
    }
}

/// How the read side of the stream stopped.
#[derive(Debug)]
enum StreamEvent {
    Ended,
    Closed,
    Failed(io::Error),
}

impl StreamEvent {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Failed(err),
        }
    }

    fn into_error(self) -> Error {
        match self {
            Self::Ended => Error::connection(ENDED_MESSAGE),
            Self::Closed => Error::connection(CLOSED_MESSAGE),
            Self::Failed(err) => Error::connection_caused_by(FAILED_MESSAGE, err),
        }
    }
}

/// Reply bookkeeping guarded by one lock.
#[derive(Default)]
struct Pending {
    expected: VecDeque<ExpectedResponse>,
    /// Replies read before the first message was written (the banner).
    early: VecDeque<Result<Reply>>,
    started: bool,
}

/// State shared between the writer and its reply reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
    terminated: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_valid(&self) -> bool {
        !self.terminated.load(Ordering::Acquire)
    }

    /// Registers the replies `message` waits for.
    fn expect(&self, message: &SmtpMessage) -> Result<Vec<oneshot::Receiver<Result<()>>>> {
        let mut pending = self.lock();
        if !self.is_valid() {
            return Err(Error::InvalidConnection);
        }

        let code_sets = match message.expectation() {
            Expectation::Nothing => Vec::new(),
            Expectation::One(codes) => vec![codes.clone()],
            Expectation::Two(first, second) => vec![first.clone(), second.clone()],
        };

        let receivers = code_sets
            .into_iter()
            .map(|codes| {
                let (completion, receiver) = oneshot::channel();
                pending.expected.push_back(ExpectedResponse {
                    completion,
                    codes,
                    command: message.text().to_string(),
                    redacted: message.redacted().map(str::to_string),
                });
                receiver
            })
            .collect();

        pending.started = true;
        while !pending.early.is_empty() && !pending.expected.is_empty() {
            if let (Some(outcome), Some(expected)) =
                (pending.early.pop_front(), pending.expected.pop_front())
            {
                resolve(expected, outcome);
            }
        }
        Ok(receivers)
    }

    fn dispatch(&self, outcome: Result<Reply>) {
        let mut pending = self.lock();
        let Some(expected) = pending.expected.pop_front() else {
            if pending.started {
                warn!("reply received while no response was expected; ignoring it");
            } else {
                pending.early.push_back(outcome);
            }
            return;
        };
        drop(pending);

        resolve(expected, outcome);
    }

    /// Marks the stream dead and fails everything still waiting.
    fn terminate(&self, event: StreamEvent) {
        let drained: Vec<_> = {
            let mut pending = self.lock();
            self.terminated.store(true, Ordering::Release);
            pending.expected.drain(..).collect()
        };

        if drained.is_empty() {
            debug!(?event, "stream stopped while idle");
            return;
        }

        debug!(?event, waiting = drained.len(), "stream stopped with replies outstanding");
        let err = event.into_error();
        for expected in drained {
            expected.fail(err.clone());
        }
    }
}

fn resolve(expected: ExpectedResponse, outcome: Result<Reply>) {
    match outcome {
        Ok(reply) => expected.settle(&reply),
        Err(err) => expected.fail(err),
    }
}

/// Writer bound to one SMTP stream.
pub struct SmtpWriter {
    sink: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for SmtpWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpWriter")
            .field("valid", &self.is_valid())
            .field("pending_responses", &self.pending_responses())
            .finish_non_exhaustive()
    }
}

impl SmtpWriter {
    /// Wraps `stream` and starts reading replies from it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_replies(read_half, Arc::clone(&shared)));

        Self {
            sink: tokio::sync::Mutex::new(Box::new(write_half)),
            shared,
            reader,
        }
    }

    /// Writes `message` and waits for the replies it expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConnection`] without writing if the stream is
    /// gone, a protocol error if a reply carries an unexpected code, or a
    /// connection error if the stream stops before the replies arrive.
    pub async fn write(&self, message: &SmtpMessage) -> Result<()> {
        self.write_tracked(message).await.map_err(|(_, err)| err)
    }

    /// Like [`write`](Self::write), but also reports the position of the
    /// expected reply that failed.
    pub(crate) async fn write_tracked(
        &self,
        message: &SmtpMessage,
    ) -> std::result::Result<(), (usize, Error)> {
        debug!(command = message.display_text(), "sending");

        let receivers = {
            let mut sink = self.sink.lock().await;
            let receivers = self
                .shared
                .expect(message)
                .inspect_err(|_| error!("stream not valid"))
                .map_err(|err| (0, err))?;

            let written = async {
                sink.write_all(&message.serialize()).await?;
                sink.flush().await
            }
            .await;
            if let Err(err) = written {
                self.shared.terminate(StreamEvent::from_io(err));
                if receivers.is_empty() {
                    return Err((0, Error::InvalidConnection));
                }
            }
            receivers
        };

        for (index, receiver) in receivers.into_iter().enumerate() {
            receiver
                .await
                .unwrap_or_else(|_| Err(Error::connection(CLOSED_MESSAGE)))
                .map_err(|err| (index, err))?;
        }
        Ok(())
    }

    /// Number of replies still expected.
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.shared.lock().expected.len()
    }

    /// Shuts down the write side of the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn shutdown(&self) -> Result<()> {
        self.sink.lock().await.shutdown().await?;
        Ok(())
    }
}

impl ConnectionWriter for SmtpWriter {
    fn is_valid(&self) -> bool {
        self.shared.is_valid() && !self.reader.is_finished()
    }
}

impl Drop for SmtpWriter {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_replies<R>(reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut assembler = ReplyAssembler::new();
    let mut buf = Vec::new();

    let event = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break StreamEvent::Ended,
            Ok(_) => {
                // Reply text is not guaranteed to be UTF-8.
                let line = String::from_utf8_lossy(trim_line_ending(&buf));
                debug!(line = %line, "received");
                if let Some(outcome) = assembler.push(&line) {
                    shared.dispatch(outcome);
                }
            }
            Err(err) => break StreamEvent::from_io(err),
        }
    };

    shared.terminate(event);
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;
    use crate::command::Command;

    fn pair() -> (SmtpWriter, BufReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(4096);
        (SmtpWriter::new(client), BufReader::new(server))
    }

    async fn next_line(server: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        line
    }

    async fn wait_for_pending(writer: &SmtpWriter, count: usize) {
        while writer.pending_responses() != count {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_reply_resolves() {
        let (writer, mut server) = pair();
        let client = tokio::spawn(async move {
            writer
                .write(&SmtpMessage::single("NOOP", vec![ReplyCode::OK]))
                .await
        });

        assert_eq!(next_line(&mut server).await, "NOOP\r\n");
        server.get_mut().write_all(b"250 OK\r\n").await.unwrap();
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_non_utf8_reply_text_is_accepted() {
        let (writer, mut server) = pair();
        let writer = Arc::new(writer);
        let task_writer = Arc::clone(&writer);
        let client = tokio::spawn(async move {
            task_writer
                .write(&SmtpMessage::single("NOOP", vec![ReplyCode::OK]))
                .await
        });

        assert_eq!(next_line(&mut server).await, "NOOP\r\n");
        server.get_mut().write_all(b"250 caf\xe9 ok\r\n").await.unwrap();
        client.await.unwrap().unwrap();
        assert!(writer.is_valid());

        let client = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                writer
                    .write(&SmtpMessage::single("NOOP", vec![ReplyCode::OK]))
                    .await
            })
        };
        assert_eq!(next_line(&mut server).await, "NOOP\r\n");
        server.get_mut().write_all(b"250 OK\r\n").await.unwrap();
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_double_reply_waits_for_both() {
        let (writer, mut server) = pair();
        let writer = Arc::new(writer);
        let task_writer = Arc::clone(&writer);
        let client = tokio::spawn(async move {
            task_writer
                .write(&SmtpMessage::from(Command::Ehlo {
                    hostname: "client.example.com".into(),
                }))
                .await
        });

        assert_eq!(next_line(&mut server).await, "EHLO client.example.com\r\n");
        server.get_mut().write_all(b"220 mx ESMTP\r\n").await.unwrap();
        wait_for_pending(&writer, 1).await;
        assert!(!client.is_finished());

        server
            .get_mut()
            .write_all(b"250-mx.example.com\r\n250-SIZE 1000\r\n250 AUTH LOGIN\r\n")
            .await
            .unwrap();
        client.await.unwrap().unwrap();
        assert_eq!(writer.pending_responses(), 0);
    }

    #[tokio::test]
    async fn test_wire_exchange_with_scripted_stream() {
        use tokio_test::io::Builder;

        let mock = Builder::new()
            .read(b"220 mx.example.com ESMTP\r\n")
            .write(b"EHLO client.example.com\r\n")
            .read(b"250-mx.example.com\r\n250 AUTH LOGIN\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let writer = SmtpWriter::new(mock);

        writer
            .write(&SmtpMessage::from(Command::Ehlo {
                hostname: "client.example.com".into(),
            }))
            .await
            .unwrap();
        writer.write(&SmtpMessage::from(Command::Quit)).await.unwrap();
        assert_eq!(writer.pending_responses(), 0);
    }

    #[tokio::test]
    async fn test_blob_resolves_without_reply() {
        let (writer, mut server) = pair();
        writer
            .write(&SmtpMessage::blob("line one\r\nline two"))
            .await
            .unwrap();
        assert_eq!(writer.pending_responses(), 0);
        assert_eq!(next_line(&mut server).await, "line one\r\n");
        assert_eq!(next_line(&mut server).await, "line two\r\n");
    }

    #[tokio::test]
    async fn test_unexpected_code_names_command() {
        let (writer, mut server) = pair();
        let client = tokio::spawn(async move {
            writer
                .write(&SmtpMessage::single("MAIL FROM:<a@b.c>", vec![ReplyCode::OK]))
                .await
        });

        next_line(&mut server).await;
        server
            .get_mut()
            .write_all(b"421 Service not available\r\n")
            .await
            .unwrap();

        let err = client.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol { code, .. } if code == ReplyCode::SERVICE_NOT_AVAILABLE));
        assert_eq!(
            err.to_string(),
            "SMTP server did not accept message MAIL FROM:<a@b.c>. Expected code: 250. Actual code: 421."
        );
    }

    #[tokio::test]
    async fn test_credentials_are_not_leaked() {
        let (writer, mut server) = pair();
        let client = tokio::spawn(async move {
            writer
                .write(&SmtpMessage::from(Command::Password("secret".into())))
                .await
        });

        assert_eq!(next_line(&mut server).await, "c2VjcmV0\r\n");
        server
            .get_mut()
            .write_all(b"535 Authentication failed\r\n")
            .await
            .unwrap();

        let message = client.await.unwrap().unwrap_err().to_string();
        assert_eq!(
            message,
            "SMTP server did not accept credentials. Expected code: 235. Actual code: 535."
        );
        assert!(!message.contains("c2VjcmV0"));
    }

    #[tokio::test]
    async fn test_rate_limit_reply_is_classified() {
        let (writer, mut server) = pair();
        let client = tokio::spawn(async move {
            writer
                .write(&SmtpMessage::from(Command::EndOfData))
                .await
        });

        next_line(&mut server).await;
        server
            .get_mut()
            .write_all(b"550 5.7.0 Requested action not taken: too many emails per second\r\n")
            .await
            .unwrap();

        let err = client.await.unwrap().unwrap_err();
        assert!(err.is_too_many_messages());
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_entry() {
        let (writer, mut server) = pair();
        let client = tokio::spawn(async move {
            writer.write(&SmtpMessage::from(Command::Data)).await
        });

        next_line(&mut server).await;
        server.get_mut().write_all(b"hello there\r\n").await.unwrap();

        let err = client.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Unexpected response format: hello there.");
    }

    #[tokio::test]
    async fn test_end_fails_all_pending() {
        let (writer, mut server) = pair();
        let writer = Arc::new(writer);
        let task_writer = Arc::clone(&writer);
        let client = tokio::spawn(async move {
            task_writer
                .write(&SmtpMessage::double("EHLO x", vec![ReplyCode::SERVICE_READY], vec![ReplyCode::OK]))
                .await
        });

        next_line(&mut server).await;
        wait_for_pending(&writer, 2).await;
        drop(server);

        let err = client.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), ENDED_MESSAGE);
        assert_eq!(writer.pending_responses(), 0);
        assert!(!writer.is_valid());
    }

    #[tokio::test]
    async fn test_end_while_idle_only_invalidates() {
        let (writer, server) = pair();
        drop(server);
        while writer.is_valid() {
            tokio::task::yield_now().await;
        }

        let err = writer
            .write(&SmtpMessage::single("NOOP", vec![ReplyCode::OK]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConnection));
    }

    #[tokio::test]
    async fn test_banner_before_first_write_is_kept() {
        let (writer, mut server) = pair();
        server.get_mut().write_all(b"220 mx ESMTP\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let writer = Arc::new(writer);
        let task_writer = Arc::clone(&writer);
        let client = tokio::spawn(async move {
            task_writer
                .write(&SmtpMessage::from(Command::Ehlo {
                    hostname: "client.example.com".into(),
                }))
                .await
        });
        next_line(&mut server).await;
        wait_for_pending(&writer, 1).await;
        server.get_mut().write_all(b"250 mx.example.com\r\n").await.unwrap();
        client.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unsolicited_reply_is_ignored() {
        let (writer, mut server) = pair();
        let writer = Arc::new(writer);

        let task_writer = Arc::clone(&writer);
        let client = tokio::spawn(async move {
            task_writer
                .write(&SmtpMessage::single("NOOP", vec![ReplyCode::OK]))
                .await
        });
        next_line(&mut server).await;
        server.get_mut().write_all(b"250 OK\r\n").await.unwrap();
        client.await.unwrap().unwrap();

        server
            .get_mut()
            .write_all(b"500 nobody asked\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let task_writer = Arc::clone(&writer);
        let client = tokio::spawn(async move {
            task_writer
                .write(&SmtpMessage::single("NOOP", vec![ReplyCode::OK]))
                .await
        });
        next_line(&mut server).await;
        server.get_mut().write_all(b"250 OK\r\n").await.unwrap();
        client.await.unwrap().unwrap();
        assert!(writer.is_valid());
    }

    #[test]
    fn test_stream_failure_keeps_cause() {
        let err = StreamEvent::from_io(io::Error::other("boom")).into_error();
        assert_eq!(err.to_string(), FAILED_MESSAGE);
        assert_eq!(err.source().unwrap().to_string(), "boom");

        let err =
            StreamEvent::from_io(io::Error::from(io::ErrorKind::ConnectionReset)).into_error();
        assert_eq!(err.to_string(), CLOSED_MESSAGE);
    }
}
