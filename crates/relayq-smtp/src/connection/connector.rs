//! SMTP session setup (greeting, AUTH LOGIN) and teardown (QUIT).

use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use super::{Connector, SmtpWriter, TcpTransport, Transport};
use crate::command::{Command, SmtpMessage};
use crate::config::SmtpSettings;
use crate::error::Result;

/// Opens authenticated SMTP sessions over a [`Transport`].
#[derive(Debug)]
pub struct SmtpConnector<T = TcpTransport> {
    transport: T,
    settings: RwLock<SmtpSettings>,
}

impl SmtpConnector<TcpTransport> {
    /// Creates a connector using TCP (and TLS, if configured).
    #[must_use]
    pub fn tcp(settings: SmtpSettings) -> Self {
        Self::new(TcpTransport::from_settings(&settings), settings)
    }
}

impl<T: Transport> SmtpConnector<T> {
    /// Creates a connector over `transport`.
    #[must_use]
    pub const fn new(transport: T, settings: SmtpSettings) -> Self {
        Self {
            transport,
            settings: RwLock::new(settings),
        }
    }

    /// Returns a snapshot of the current settings.
    #[must_use]
    pub fn settings(&self) -> SmtpSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the username used by the next connect.
    pub fn update_username(&self, username: Option<String>) {
        self.update(|settings| settings.username = username);
    }

    /// Replaces the password used by the next connect.
    pub fn update_password(&self, password: Option<String>) {
        self.update(|settings| settings.password = password);
    }

    /// Replaces the relay host used by the next connect.
    pub fn update_host(&self, host: impl Into<String>) {
        let host = host.into();
        self.update(|settings| settings.host = host);
    }

    fn update(&self, change: impl FnOnce(&mut SmtpSettings)) {
        change(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
    }

    /// Sends EHLO, falling back to HELO when the server rejects it.
    ///
    /// EHLO is answered by both the banner (220) and the EHLO reply (250).
    /// Only a protocol error on the second of those triggers the fallback: the
    /// banner has been read by then, so HELO waits for a single 250. A
    /// rejected banner means the server refuses the session and fails the
    /// connect without a HELO attempt.
    async fn greet(writer: &SmtpWriter, hello: &str) -> Result<()> {
        let ehlo = SmtpMessage::from(Command::Ehlo {
            hostname: hello.to_string(),
        });

        match writer.write_tracked(&ehlo).await {
            Ok(()) => Ok(()),
            // The banner was accepted and only the EHLO reply was refused.
            Err((1, err)) if err.is_protocol() => {
                debug!(error = %err, "EHLO rejected, falling back to HELO");
                let helo = SmtpMessage::from(Command::Helo {
                    hostname: hello.to_string(),
                });
                writer.write(&helo).await
            }
            Err((_, err)) => Err(err),
        }
    }

    /// Runs the AUTH LOGIN exchange.
    async fn login(writer: &SmtpWriter, username: &str, password: &str) -> Result<()> {
        writer.write(&Command::AuthLogin.into()).await?;
        writer
            .write(&Command::Username(username.to_string()).into())
            .await?;
        writer
            .write(&Command::Password(password.to_string()).into())
            .await
    }
}

impl<T: Transport> Connector for SmtpConnector<T> {
    type Writer = SmtpWriter;

    async fn connect(&self) -> Result<SmtpWriter> {
        let settings = self.settings();
        let address = settings.address();

        let stream = self.transport.connect(&address).await?;
        let writer = SmtpWriter::new(stream);

        Self::greet(&writer, settings.hello_name()).await?;
        if let Some((username, password)) = settings.credentials() {
            Self::login(&writer, username, password).await?;
        }

        info!(address, "SMTP session ready");
        Ok(writer)
    }

    async fn disconnect(&self, writer: &SmtpWriter) -> Result<()> {
        writer.write(&Command::Quit.into()).await?;
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "shutdown after QUIT failed");
        }
        Ok(())
    }
}
