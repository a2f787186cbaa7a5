//! `relayq` - send one message through an SMTP relay.
//!
//! Relay and queue settings come from a JSON settings file; the body is
//! read from standard input unless given with `--body`.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relayq_smtp::{Mailbox, OutgoingMessage, SmtpQueue};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "relayq")]
#[command(about = "Send mail through an SMTP relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to <config dir>/relayq/settings.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sender, e.g. "Alice <alice@example.com>"
    #[arg(short, long)]
    from: String,

    /// Recipient (repeatable)
    #[arg(short, long, required = true)]
    to: Vec<String>,

    /// Carbon copy recipient (repeatable)
    #[arg(long)]
    cc: Vec<String>,

    /// Blind carbon copy recipient (repeatable)
    #[arg(long)]
    bcc: Vec<String>,

    /// Subject line
    #[arg(short, long, default_value = "")]
    subject: String,

    /// Message body; read from stdin when omitted
    #[arg(short, long)]
    body: Option<String>,
}

impl Cli {
    fn message(&self, body: String) -> Result<OutgoingMessage> {
        let mut message = OutgoingMessage::new()
            .from(Mailbox::parse(&self.from).context("Invalid --from")?)
            .subject(&self.subject)
            .body(body);
        for to in &self.to {
            message = message.to(Mailbox::parse(to).context("Invalid --to")?);
        }
        for cc in &self.cc {
            message = message.cc(Mailbox::parse(cc).context("Invalid --cc")?);
        }
        for bcc in &self.bcc {
            message = message.bcc(Mailbox::parse(bcc).context("Invalid --bcc")?);
        }
        Ok(message)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayq=info,relayq_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = settings::load(cli.config.as_deref()).await?;

    let body = match &cli.body {
        Some(body) => body.clone(),
        None => {
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("Failed to read message body from stdin")?;
            body
        }
    };
    let message = cli.message(body)?;

    info!(relay = %settings.smtp.address(), "Sending message");
    let queue = SmtpQueue::for_relay(settings.smtp, settings.queue);
    let outcome = queue.send(message).await;

    if let Err(err) = queue.connection().disconnect().await {
        warn!(error = %err, "Failed to close relay session");
    }
    outcome.context("Relay did not accept the message")?;

    info!("Message sent");
    Ok(())
}
