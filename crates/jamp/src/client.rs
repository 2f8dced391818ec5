//! `JampClient`: a cloneable handle to a client task.
//!
//! The task owns the [`ClientCore`] and its transport. Everything that
//! touches the pending or listener tables (caller commands, transport
//! events, the expiry sweep) is serialized through one `tokio::select!`
//! loop, so the tables have a single writer without any locks.
//!
//! ```text
//! JampClient ──Command──▶ ┌──────────────┐ ──submit──▶ Transport
//!                         │ client task  │
//!   sweep timer ─tick───▶ │  ClientCore  │ ◀─TransportEvent── Transport
//!                         └──────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jamp_client::{Arg, CallOptions, ClientCore, ClientError, Completion, RequestError};
use jamp_protocol::QueryId;
use jamp_transport::{EventReceiver, Transport, TransportEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{JampClientBuilder, JampError, ServiceRef};

/// Snapshot of the client's bookkeeping, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStats {
    /// Requests still waiting for an outcome.
    pub pending: usize,
    /// Registered listeners. Never shrinks.
    pub listeners: usize,
    /// Whether the transport is closed.
    pub closed: bool,
}

type Ack = oneshot::Sender<Result<QueryId, ClientError>>;

/// Commands sent to the client task.
///
/// Variants that carry a `oneshot::Sender` are request/response: the
/// handle waits for the task to answer on it.
enum Command {
    Send {
        address: String,
        method: String,
        args: Vec<Value>,
        options: CallOptions,
        ack: Ack,
    },
    Query {
        address: String,
        method: String,
        args: Vec<Arg>,
        options: CallOptions,
        completion: Completion,
        ack: Ack,
    },
    Close {
        done: oneshot::Sender<()>,
    },
    Reconnect {
        done: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<ClientStats>,
    },
    Shutdown,
}

/// Handle to a running JAMP client.
///
/// Cheap to clone; every clone talks to the same task. The task stops when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped,
/// failing whatever is still pending with [`RequestError::Aborted`].
#[derive(Clone)]
pub struct JampClient {
    commands: mpsc::UnboundedSender<Command>,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for JampClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JampClient")
            .field("connected", &self.is_connected())
            .field("running", &!self.commands.is_closed())
            .finish()
    }
}

impl JampClient {
    /// Starts configuring a client.
    pub fn builder() -> JampClientBuilder {
        JampClientBuilder::new()
    }

    /// Fire-and-forget call. Resolves once the message is handed to the
    /// transport, not when the server processes it.
    ///
    /// # Errors
    /// [`JampError::Transport`] with [`TransportError::Closed`](jamp_transport::TransportError::Closed)
    /// if the client is closed, or [`JampError::Shutdown`] if the task has
    /// stopped.
    pub async fn send(
        &self,
        address: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<QueryId, JampError> {
        self.send_with(address, method, args, CallOptions::default())
            .await
    }

    /// [`send`](Self::send) with headers or a custom timeout.
    pub async fn send_with(
        &self,
        address: &str,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<QueryId, JampError> {
        let (ack, rx) = oneshot::channel();
        self.command(Command::Send {
            address: address.to_string(),
            method: method.to_string(),
            args,
            options,
            ack,
        })?;
        Ok(rx.await.map_err(|_| JampError::Shutdown)??)
    }

    /// Issues a query and routes its outcome to `completion`.
    ///
    /// Returns as soon as the query is submitted; `completion` runs on the
    /// client task when a reply, error or expiry arrives, so it should be
    /// quick.
    ///
    /// # Errors
    /// Same as [`send`](Self::send). On error `completion` is never called.
    pub async fn query(
        &self,
        address: &str,
        method: &str,
        args: Vec<Arg>,
        options: CallOptions,
        completion: impl FnOnce(Result<Value, RequestError>) + Send + 'static,
    ) -> Result<QueryId, JampError> {
        let (ack, rx) = oneshot::channel();
        self.command(Command::Query {
            address: address.to_string(),
            method: method.to_string(),
            args,
            options,
            completion: Box::new(completion),
            ack,
        })?;
        Ok(rx.await.map_err(|_| JampError::Shutdown)??)
    }

    /// Issues a query and waits for its result.
    ///
    /// # Errors
    /// Submission errors as for [`send`](Self::send), plus
    /// [`JampError::Request`] for a remote error, an expiry or a transport
    /// failure.
    pub async fn call(
        &self,
        address: &str,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Value, JampError> {
        self.call_with(address, method, args, CallOptions::default())
            .await
    }

    /// [`call`](Self::call) with headers or a custom timeout.
    pub async fn call_with(
        &self,
        address: &str,
        method: &str,
        args: Vec<Arg>,
        options: CallOptions,
    ) -> Result<Value, JampError> {
        let (tx, rx) = oneshot::channel();
        self.query(address, method, args, options, move |result| {
            let _ = tx.send(result);
        })
        .await?;
        Ok(rx.await.map_err(|_| JampError::Shutdown)??)
    }

    /// [`call`](Self::call), deserializing the result into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        address: &str,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<T, JampError> {
        let value = self.call(address, method, args).await?;
        serde_json::from_value(value).map_err(JampError::Decode)
    }

    /// A stub for the service at `address`.
    pub fn service(&self, address: impl Into<String>) -> ServiceRef {
        ServiceRef::new(self.clone(), address.into())
    }

    /// Closes the transport. Later calls fail with
    /// [`TransportError::Closed`](jamp_transport::TransportError::Closed)
    /// until [`reconnect`](Self::reconnect). Pending requests are kept and
    /// may still settle or expire.
    pub async fn close(&self) -> Result<(), JampError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Close { done })?;
        rx.await.map_err(|_| JampError::Shutdown)
    }

    /// Reopens a closed transport.
    pub async fn reconnect(&self) -> Result<(), JampError> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Reconnect { done })?;
        rx.await.map_err(|_| JampError::Shutdown)
    }

    pub async fn stats(&self) -> Result<ClientStats, JampError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Stats { reply })?;
        rx.await.map_err(|_| JampError::Shutdown)
    }

    /// Whether the transport is currently usable. For the WebSocket
    /// transport this tracks the socket; HTTP transports are connected
    /// unless closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stops the client task. Pending requests fail with
    /// [`RequestError::Aborted`].
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn command(&self, cmd: Command) -> Result<(), JampError> {
        self.commands.send(cmd).map_err(|_| JampError::Shutdown)
    }
}

// ---------------------------------------------------------------------------
// Client task
// ---------------------------------------------------------------------------

/// Spawns the client task around `core` and returns a handle to it.
pub(crate) fn spawn_client(
    core: ClientCore<Box<dyn Transport>>,
    events: EventReceiver,
    duplex: bool,
) -> (JampClient, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let connected = Arc::new(AtomicBool::new(!duplex));

    let actor = ClientActor {
        sweep_interval: core.config().sweep_interval,
        core,
        commands: rx,
        events,
        connected: Arc::clone(&connected),
        duplex,
    };
    let task = tokio::spawn(actor.run());

    (
        JampClient {
            commands: tx,
            connected,
        },
        task,
    )
}

struct ClientActor {
    core: ClientCore<Box<dyn Transport>>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventReceiver,
    connected: Arc<AtomicBool>,
    duplex: bool,
    sweep_interval: Duration,
}

impl ClientActor {
    async fn run(mut self) {
        info!(transport = self.core.transport().name(), "client task started");

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                _ = sweep.tick() => {
                    let now = self.core.now();
                    let expired = self.core.expire_requests(now);
                    if expired > 0 {
                        debug!(expired, "expiry sweep");
                    }
                }
            }
        }

        self.core.close();
        let aborted = self.core.abort_all();
        info!(aborted, "client task stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send {
                address,
                method,
                args,
                options,
                ack,
            } => {
                let _ = ack.send(self.core.send(&address, &method, args, options));
            }
            Command::Query {
                address,
                method,
                args,
                options,
                completion,
                ack,
            } => {
                let result = self
                    .core
                    .query(&address, &method, args, options, completion);
                let _ = ack.send(result);
            }
            Command::Close { done } => {
                self.core.close();
                self.connected.store(false, Ordering::SeqCst);
                info!("client closed");
                let _ = done.send(());
            }
            Command::Reconnect { done } => {
                self.core.reconnect();
                if !self.duplex {
                    self.connected.store(true, Ordering::SeqCst);
                }
                info!("client reconnecting");
                let _ = done.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(ClientStats {
                    pending: self.core.pending_len(),
                    listeners: self.core.listener_count(),
                    closed: self.core.is_closed(),
                });
            }
            Command::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Sent(id) => self.core.on_sent(id),
            TransportEvent::Failed(id, error) => self.core.on_failed(id, error),
            TransportEvent::Inbound(data) => {
                let errors = self.core.on_inbound_batch(&data);
                if !errors.is_empty() {
                    debug!(dropped = errors.len(), "inbound batch partially dispatched");
                }
            }
            TransportEvent::Connected => {
                self.connected.store(true, Ordering::SeqCst);
                info!("transport connected");
            }
            TransportEvent::Disconnected => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(pending = self.core.pending_len(), "transport disconnected");
            }
        }
    }
}
