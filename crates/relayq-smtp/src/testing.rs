//! Scripted SMTP peers for unit tests.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use crate::connection::{Transport, connect_within};
use crate::error::Result;

/// Lines received by a scripted server.
pub type ServerLog = Arc<Mutex<Vec<String>>>;

/// Transport handing out in-memory streams, one per scripted server.
#[derive(Default)]
pub struct MockTransport {
    streams: Mutex<VecDeque<DuplexStream>>,
    addresses: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a server that greets with `greeting` and answers each line
    /// with whatever `responder` returns.
    pub fn add_server<F>(&self, greeting: &str, mut responder: F) -> ServerLog
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.streams.lock().unwrap().push_back(client);

        let log = ServerLog::default();
        let task_log = Arc::clone(&log);
        let greeting = format!("{greeting}\r\n");
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            if write.write_all(greeting.as_bytes()).await.is_err() {
                return;
            }
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                task_log.lock().unwrap().push(line.clone());
                for reply in responder(&line) {
                    if write.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        });
        log
    }

    /// Addresses passed to `connect`, in order.
    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    type Stream = DuplexStream;

    async fn connect(&self, address: &str) -> Result<DuplexStream> {
        self.addresses.lock().unwrap().push(address.to_string());
        let stream = self.streams.lock().unwrap().pop_front();
        stream.ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused).into())
    }
}

/// Transport whose peer never answers the TCP handshake.
pub struct StalledTransport {
    pub timeout: Duration,
}

impl Transport for StalledTransport {
    type Stream = DuplexStream;

    async fn connect(&self, _address: &str) -> Result<DuplexStream> {
        connect_within(Some(self.timeout), std::future::pending()).await
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Command,
    Username,
    Password,
    Data,
}

/// Responder behaving like a well-mannered relay.
pub fn relay() -> impl FnMut(&str) -> Vec<String> + Send + 'static {
    relay_with(|_| None)
}

/// Relay whose answers can be overridden per command line.
pub fn relay_with<O>(mut overrides: O) -> impl FnMut(&str) -> Vec<String> + Send + 'static
where
    O: FnMut(&str) -> Option<Vec<String>> + Send + 'static,
{
    let mut phase = Phase::Command;
    move |line: &str| {
        let reply = |text: &str| vec![text.to_string()];
        match phase {
            Phase::Data => {
                if line == "." {
                    phase = Phase::Command;
                    return overrides(line).unwrap_or_else(|| reply("250 2.0.0 queued"));
                }
                return Vec::new();
            }
            Phase::Username => {
                phase = Phase::Password;
                return overrides(line).unwrap_or_else(|| reply("334 UGFzc3dvcmQ6"));
            }
            Phase::Password => {
                phase = Phase::Command;
                return overrides(line).unwrap_or_else(|| reply("235 2.7.0 accepted"));
            }
            Phase::Command => {}
        }

        if let Some(answer) = overrides(line) {
            if line == "DATA" && answer.iter().any(|a| a.starts_with("354")) {
                phase = Phase::Data;
            }
            return answer;
        }

        let verb = line.split([' ', ':']).next().unwrap_or_default();
        match verb {
            "EHLO" => vec!["250-mx.example.com".to_string(), "250 AUTH LOGIN".to_string()],
            "HELO" | "MAIL" | "RCPT" => reply("250 OK"),
            "AUTH" => {
                phase = Phase::Username;
                reply("334 VXNlcm5hbWU6")
            }
            "DATA" => {
                phase = Phase::Data;
                reply("354 end with <CRLF>.<CRLF>")
            }
            "QUIT" => reply("221 bye"),
            _ => reply("500 unrecognized"),
        }
    }
}
