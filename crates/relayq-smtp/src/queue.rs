//! FIFO message queue over one shared relay connection.
//!
//! [`MessageQueueManager::send`] only enqueues. A single worker task takes
//! entries in order and, for each one:
//!
//! 1. recycles the connection when it idled past the maximum interval, carried
//!    the maximum number of messages, or the previous entry failed;
//! 2. connects (reusing the live connection when possible);
//! 3. waits until the minimum interval since the last successful send passed;
//! 4. hands the message to the [`MessageSender`].
//!
//! Every entry settles exactly once, in enqueue order.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{QueueSettings, SmtpSettings};
use crate::connection::{ConnectionManager, Connector, SmtpConnector};
use crate::error::{Error, Result};
use crate::message::MailMessage;
use crate::sender::{MessageSender, SmtpMessageSender};

/// Queue sending mail through an SMTP relay.
pub type SmtpQueue<M> = MessageQueueManager<SmtpMessageSender<M>, SmtpConnector>;

/// Resolves when the message it was returned for has been sent or failed.
#[derive(Debug)]
#[must_use = "a send handle does nothing unless awaited"]
pub struct SendHandle {
    request: u64,
    outcome: oneshot::Receiver<Result<()>>,
}

impl SendHandle {
    /// Sequence number assigned to the message.
    #[must_use]
    pub const fn request(&self) -> u64 {
        self.request
    }
}

impl Future for SendHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(Error::QueueClosed)))
    }
}

struct Request<M> {
    id: u64,
    message: Arc<M>,
    completion: oneshot::Sender<Result<()>>,
}

/// State readable from any handle while the worker runs.
struct QueueState<M> {
    queued: Mutex<BTreeMap<u64, Arc<M>>>,
    sent_messages: AtomicUsize,
    sequence: AtomicU64,
}

impl<M> QueueState<M> {
    fn queued(&self) -> MutexGuard<'_, BTreeMap<u64, Arc<M>>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes messages through one connection with a reconnect policy.
pub struct MessageQueueManager<S, C>
where
    S: MessageSender,
    C: Connector<Writer = S::Writer>,
{
    state: Arc<QueueState<S::Message>>,
    requests: mpsc::UnboundedSender<Request<S::Message>>,
    connection: ConnectionManager<C>,
}

impl<S, C> std::fmt::Debug for MessageQueueManager<S, C>
where
    S: MessageSender,
    C: Connector<Writer = S::Writer>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueueManager")
            .field("queued", &self.queued_messages_count())
            .field("sent", &self.sent_messages_count())
            .field("connection", &self.connection)
            .finish()
    }
}

impl<M: MailMessage> SmtpQueue<M> {
    /// Creates a queue relaying through the server in `smtp`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn for_relay(smtp: SmtpSettings, settings: QueueSettings) -> Self {
        Self::new(
            SmtpMessageSender::new(),
            ConnectionManager::new(SmtpConnector::tcp(smtp)),
            settings,
        )
    }
}

impl<S, C> MessageQueueManager<S, C>
where
    S: MessageSender,
    C: Connector<Writer = S::Writer>,
{
    /// Creates the queue and starts its worker.
    ///
    /// Must be called from within a Tokio runtime. The worker finishes the
    /// entries already queued once the manager is dropped.
    #[must_use]
    pub fn new(sender: S, connection: ConnectionManager<C>, settings: QueueSettings) -> Self {
        let state = Arc::new(QueueState {
            queued: Mutex::new(BTreeMap::new()),
            sent_messages: AtomicUsize::new(0),
            sequence: AtomicU64::new(0),
        });
        let (requests, inbox) = mpsc::unbounded_channel();

        let worker = Worker {
            sender,
            connection: connection.clone(),
            state: Arc::clone(&state),
            settings,
            force_reconnect: false,
            last_sent: None,
            not_before: None,
        };
        tokio::spawn(worker.run(inbox));

        Self {
            state,
            requests,
            connection,
        }
    }

    /// Queues `message` behind every message sent before it.
    pub fn send(&self, message: S::Message) -> SendHandle {
        let id = self.state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Arc::new(message);
        let (completion, outcome) = oneshot::channel();

        let previous = {
            let mut queued = self.state.queued();
            queued.insert(id, Arc::clone(&message));
            queued.len() - 1
        };
        debug!(request = id, previous, "queued");

        let request = Request {
            id,
            message,
            completion,
        };
        if self.requests.send(request).is_err() {
            warn!(request = id, "queue worker is gone");
            self.state.queued().remove(&id);
        }

        SendHandle {
            request: id,
            outcome,
        }
    }

    /// Messages sent over the current connection.
    #[must_use]
    pub fn sent_messages_count(&self) -> usize {
        self.state.sent_messages.load(Ordering::SeqCst)
    }

    /// Sets the per-connection counter back to zero.
    pub fn reset_sent_messages_counter(&self) {
        self.state.sent_messages.store(0, Ordering::SeqCst);
    }

    /// Messages not yet settled, the one being sent included.
    #[must_use]
    pub fn queued_messages_count(&self) -> usize {
        self.state.queued().len()
    }

    /// Snapshot of unsettled messages with their sequence numbers, oldest
    /// first.
    #[must_use]
    pub fn queued_messages(&self) -> Vec<(u64, Arc<S::Message>)> {
        self.state
            .queued()
            .iter()
            .map(|(id, message)| (*id, Arc::clone(message)))
            .collect()
    }

    /// The connection the queue sends through.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }
}

struct Worker<S, C>
where
    S: MessageSender,
    C: Connector<Writer = S::Writer>,
{
    sender: S,
    connection: ConnectionManager<C>,
    state: Arc<QueueState<S::Message>>,
    settings: QueueSettings,
    force_reconnect: bool,
    last_sent: Option<Instant>,
    not_before: Option<Instant>,
}

impl<S, C> Worker<S, C>
where
    S: MessageSender,
    C: Connector<Writer = S::Writer>,
{
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Request<S::Message>>) {
        while let Some(request) = inbox.recv().await {
            let outcome = self.process(request.id, &request.message).await;
            self.state.queued().remove(&request.id);
            let _ = request.completion.send(outcome);
        }
        debug!("queue closed");
    }

    async fn process(&mut self, id: u64, message: &S::Message) -> Result<()> {
        if self.should_reconnect() {
            self.reconnect(id).await;
        }

        debug!(request = id, "started");
        let connection = match self.connection.connect().await {
            Ok(connection) => connection,
            Err(err) => {
                debug!(request = id, error = %err, "connection failed");
                self.mark_failed();
                return Err(err);
            }
        };
        debug!(request = id, "connected");

        if let Some(deadline) = self.not_before {
            tokio::time::sleep_until(deadline).await;
        }

        match self.sender.send_message(&connection.writer, message).await {
            Ok(()) => {
                if connection.new_server_request_was_sent {
                    self.state.sent_messages.store(1, Ordering::SeqCst);
                } else {
                    self.state.sent_messages.fetch_add(1, Ordering::SeqCst);
                }
                let now = Instant::now();
                self.last_sent = Some(now);
                self.not_before = Some(now + self.settings.min_interval_between_messages);
                debug!(request = id, "sending ok");
                Ok(())
            }
            Err(err) => {
                debug!(request = id, error = %err, "sending failed");
                self.mark_failed();
                Err(err)
            }
        }
    }

    fn should_reconnect(&self) -> bool {
        let idle = self
            .last_sent
            .is_some_and(|at| at.elapsed() >= self.settings.max_interval_between_messages);
        let exhausted = self.state.sent_messages.load(Ordering::SeqCst)
            >= self.settings.max_messages_per_connection;

        idle || exhausted || self.force_reconnect
    }

    async fn reconnect(&mut self, id: u64) {
        debug!(request = id, "reconnecting started");
        self.force_reconnect = false;

        match self.connection.disconnect().await {
            Ok(_) => self.state.sent_messages.store(0, Ordering::SeqCst),
            Err(err) => warn!(request = id, error = %err, "disconnect before reconnect failed"),
        }
    }

    fn mark_failed(&mut self) {
        self.force_reconnect = true;
        self.not_before = None;
    }
}
