//! Connection lifecycle shared by every user of one relay connection.
//!
//! At most one connect and one disconnect run at a time. Callers arriving
//! while one is in flight attach to it and receive the same outcome. Both
//! operations run on their own task, so a caller that gives up waiting never
//! strands the others.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{ConnectionWriter, Connector};
use crate::error::{Error, Result};

/// An established connection.
#[derive(Debug)]
pub struct Connection<W> {
    /// Writer bound to the live stream.
    pub writer: Arc<W>,
    /// True when this call (or the in-flight call it joined) opened a new
    /// session instead of reusing the current one.
    pub new_server_request_was_sent: bool,
}

impl<W> Clone for Connection<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            new_server_request_was_sent: self.new_server_request_was_sent,
        }
    }
}

/// Outcome of [`ConnectionManager::connect`].
pub type ConnectionResult<W> = Result<Connection<W>>;

/// How a disconnect completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnection {
    /// Nothing was connected; no QUIT was sent.
    NotConnected,
    /// The session was closed with QUIT.
    Closed,
}

/// Outcome of [`ConnectionManager::disconnect`].
pub type DisconnectionResult = Result<Disconnection>;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No writer.
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// A writer is held (it may have become invalid since).
    Connected,
    /// A disconnect is in flight.
    Disconnecting,
}

type InFlight<T> = watch::Receiver<Option<T>>;

enum Slot<W> {
    Disconnected,
    Connecting(InFlight<ConnectionResult<W>>),
    Connected(Arc<W>),
    Disconnecting(InFlight<DisconnectionResult>, Arc<W>),
}

impl<W> Slot<W> {
    const fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting(_) => ConnectionState::Connecting,
            Self::Connected(_) => ConnectionState::Connected,
            Self::Disconnecting(..) => ConnectionState::Disconnecting,
        }
    }
}

/// What a caller does after inspecting the slot.
enum Step<W> {
    JoinConnect(InFlight<ConnectionResult<W>>),
    JoinDisconnect(InFlight<DisconnectionResult>),
}

struct Inner<C: Connector> {
    connector: C,
    slot: Mutex<Slot<C::Writer>>,
}

impl<C: Connector> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Slot<C::Writer>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the writer of one relay connection.
///
/// Cloning is cheap and yields a handle to the same connection.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a disconnected manager.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                slot: Mutex::new(Slot::Disconnected),
            }),
        }
    }

    /// Returns the connector used to open sessions.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state()
    }

    /// Returns true if a writer is held and still valid.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        match &*self.inner.lock() {
            Slot::Connected(writer) | Slot::Disconnecting(_, writer) => writer.is_valid(),
            Slot::Disconnected | Slot::Connecting(_) => false,
        }
    }

    /// Returns a usable connection, opening one if needed.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the session could not be opened.
    pub async fn connect(&self) -> ConnectionResult<C::Writer> {
        loop {
            let step = {
                let mut slot = self.inner.lock();
                match &*slot {
                    Slot::Connected(writer) if writer.is_valid() => {
                        debug!("Already connected");
                        return Ok(Connection {
                            writer: Arc::clone(writer),
                            new_server_request_was_sent: false,
                        });
                    }
                    Slot::Connecting(in_flight) => {
                        debug!("Already connecting");
                        Step::JoinConnect(in_flight.clone())
                    }
                    Slot::Disconnecting(in_flight, _) => {
                        debug!("Waiting for disconnect before connecting");
                        Step::JoinDisconnect(in_flight.clone())
                    }
                    Slot::Connected(_) | Slot::Disconnected => {
                        Step::JoinConnect(self.start_connect(&mut slot))
                    }
                }
            };

            match step {
                Step::JoinConnect(in_flight) => {
                    return settled(in_flight)
                        .await
                        .unwrap_or_else(|| Err(abandoned("connect")));
                }
                Step::JoinDisconnect(in_flight) => {
                    let _ = settled(in_flight).await;
                }
            }
        }
    }

    /// Closes the connection if one is open or being opened.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if QUIT failed. The writer is released
    /// either way.
    pub async fn disconnect(&self) -> DisconnectionResult {
        loop {
            let step = {
                let mut slot = self.inner.lock();
                match &*slot {
                    Slot::Disconnected => {
                        debug!("Not connected");
                        return Ok(Disconnection::NotConnected);
                    }
                    Slot::Connected(writer) if !writer.is_valid() => {
                        debug!("Dropping connection closed by the server");
                        *slot = Slot::Disconnected;
                        return Ok(Disconnection::NotConnected);
                    }
                    Slot::Connected(writer) => {
                        let writer = Arc::clone(writer);
                        Step::JoinDisconnect(self.start_disconnect(&mut slot, writer))
                    }
                    Slot::Disconnecting(in_flight, _) => {
                        debug!("Already disconnecting");
                        Step::JoinDisconnect(in_flight.clone())
                    }
                    Slot::Connecting(in_flight) => {
                        debug!("Waiting for connect before disconnecting");
                        Step::JoinConnect(in_flight.clone())
                    }
                }
            };

            match step {
                Step::JoinDisconnect(in_flight) => {
                    return settled(in_flight)
                        .await
                        .unwrap_or_else(|| Err(abandoned("disconnect")));
                }
                Step::JoinConnect(in_flight) => {
                    let _ = settled(in_flight).await;
                }
            }
        }
    }

    fn start_connect(
        &self,
        slot: &mut Slot<C::Writer>,
    ) -> InFlight<ConnectionResult<C::Writer>> {
        debug!("Connecting");
        let (done, in_flight) = watch::channel(None);
        *slot = Slot::Connecting(in_flight.clone());

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner.connector.connect().await.map(|writer| Connection {
                writer: Arc::new(writer),
                new_server_request_was_sent: true,
            });

            *inner.lock() = match &outcome {
                Ok(connection) => {
                    info!("Connected");
                    Slot::Connected(Arc::clone(&connection.writer))
                }
                Err(err) => {
                    error!(error = %err, "Connection failed");
                    Slot::Disconnected
                }
            };
            let _ = done.send(Some(outcome));
        });

        in_flight
    }

    fn start_disconnect(
        &self,
        slot: &mut Slot<C::Writer>,
        writer: Arc<C::Writer>,
    ) -> InFlight<DisconnectionResult> {
        debug!("Disconnecting");
        let (done, in_flight) = watch::channel(None);
        *slot = Slot::Disconnecting(in_flight.clone(), Arc::clone(&writer));

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = inner
                .connector
                .disconnect(&writer)
                .await
                .map(|()| Disconnection::Closed);

            match &outcome {
                Ok(_) => info!("Disconnected"),
                Err(err) => error!(error = %err, "Disconnect failed, dropping connection"),
            }
            *inner.lock() = Slot::Disconnected;
            let _ = done.send(Some(outcome));
        });

        in_flight
    }
}

/// Waits for an in-flight operation; `None` if its task died first.
async fn settled<T: Clone>(mut in_flight: InFlight<T>) -> Option<T> {
    let value = in_flight.wait_for(Option::is_some).await.ok()?;
    (*value).clone()
}

fn abandoned(operation: &str) -> Error {
    Error::connection(format!("SMTP {operation} was abandoned before completing."))
}
