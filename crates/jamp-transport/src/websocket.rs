//! Persistent duplex transport over a WebSocket, using `tokio-tungstenite`.
//!
//! A single controller task owns the socket and an outbound FIFO. The
//! public [`WebSocketTransport`] handle only sends it commands.
//!
//! # Lifecycle
//!
//! ```text
//!            open ok                      socket lost / open failed
//! Connecting ───────▶ Open ──────────────────────────────▶ Waiting
//!     ▲                │ close()                              │
//!     │                ▼                                      │ backoff elapsed
//!     │             Closed ◀──── close() ─────────────────────┤ or reconnect()
//!     │                │ reconnect()                          │
//!     └────────────────┴──────────────────────────────────────┘
//! ```
//!
//! - On open the backoff resets and the FIFO drains in submission order.
//!   If a send fails the entry stays at the head for the next open.
//! - Each unexpected close (or failed open) waits the current backoff
//!   interval, then grows it.
//! - An explicit close never schedules a reconnect. Submits fail with
//!   [`TransportError::Closed`] until [`Transport::reconnect`] is called.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, info, trace, warn};

use crate::{
    Backoff, EventSender, OutboundRequest, ReconnectConfig, Transport, TransportError,
    TransportEvent,
};

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    /// An open attempt is in progress.
    Connecting = 0,
    /// The socket is open and the FIFO is being drained.
    Open = 1,
    /// The socket was lost; waiting out the backoff interval.
    Waiting = 2,
    /// Closed on request. Stays here until reconnected.
    Closed = 3,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Waiting,
            _ => Self::Closed,
        }
    }
}

enum Command {
    Submit(OutboundRequest),
    Close,
    Reconnect,
}

/// Handle to a duplex WebSocket channel with automatic reconnect.
pub struct WebSocketTransport {
    commands: mpsc::UnboundedSender<Command>,
    closing: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl WebSocketTransport {
    /// Starts the controller and begins opening `url`.
    ///
    /// Returns immediately; submits made before the socket opens are
    /// queued. Must be called inside a Tokio runtime.
    pub fn connect(url: impl Into<String>, config: ReconnectConfig, events: EventSender) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let closing = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(LinkState::Connecting as u8));

        let controller = Controller {
            url: url.into(),
            backoff: Backoff::new(config),
            queue: VecDeque::new(),
            commands: rx,
            events,
            closing: Arc::clone(&closing),
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(controller.run());

        Self {
            commands,
            closing,
            state,
            task,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

impl Transport for WebSocketTransport {
    fn submit(&self, request: OutboundRequest) -> Result<(), TransportError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.commands
            .send(Command::Submit(request))
            .map_err(|_| TransportError::Shutdown)
    }

    fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Close);
    }

    fn reconnect(&self) {
        self.closing.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Reconnect);
    }

    fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Why a connection attempt or open socket ended.
enum Outcome {
    /// Lost without being asked: schedule a reconnect.
    Lost,
    /// `close()` was called.
    Closed,
    /// `reconnect()` was called while open: reopen immediately.
    Reopen,
    /// The handle was dropped.
    Shutdown,
}

struct Controller {
    url: String,
    backoff: Backoff,
    queue: VecDeque<OutboundRequest>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender,
    closing: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
}

impl Controller {
    async fn run(mut self) {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                self.set_state(LinkState::Closed);
                if !self.park().await {
                    break;
                }
                continue;
            }

            match self.connect_and_serve().await {
                Outcome::Shutdown => break,
                Outcome::Closed | Outcome::Reopen => continue,
                Outcome::Lost => {
                    if self.closing.load(Ordering::SeqCst) {
                        continue;
                    }
                    let delay = self.backoff.next_delay();
                    warn!(
                        url = %self.url,
                        delay_ms = delay.as_millis() as u64,
                        queued = self.queue.len(),
                        "connection lost, scheduling reconnect"
                    );
                    self.set_state(LinkState::Waiting);
                    if !self.wait(delay).await {
                        break;
                    }
                }
            }
        }
        debug!(url = %self.url, "connection controller stopped");
    }

    fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Sits in the closed state until a reconnect arrives. Returns
    /// `false` if the handle was dropped.
    async fn park(&mut self) -> bool {
        while self.closing.load(Ordering::SeqCst) {
            match self.commands.recv().await {
                // Raced with close(): keep it for the next open.
                Some(Command::Submit(request)) => self.queue.push_back(request),
                Some(Command::Close) | Some(Command::Reconnect) => {}
                None => return false,
            }
        }
        true
    }

    /// Waits out the backoff interval while still accepting submits.
    /// Returns `false` if the handle was dropped.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Submit(request)) => self.queue.push_back(request),
                    Some(Command::Close) | Some(Command::Reconnect) => return true,
                    None => return false,
                },
            }
        }
    }

    async fn connect_and_serve(&mut self) -> Outcome {
        self.set_state(LinkState::Connecting);
        debug!(url = %self.url, "opening WebSocket");

        let connect = tokio_tungstenite::connect_async(self.url.clone());
        tokio::pin!(connect);

        let ws = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok((ws, _response)) => break ws,
                    Err(e) => {
                        let error = TransportError::ConnectFailed(into_io(e));
                        warn!(url = %self.url, error = %error, "WebSocket open failed");
                        return Outcome::Lost;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Submit(request)) => self.queue.push_back(request),
                    Some(Command::Close) => return Outcome::Closed,
                    Some(Command::Reconnect) => {}
                    None => return Outcome::Shutdown,
                },
            }
        };

        self.set_state(LinkState::Open);
        self.backoff.reset();
        info!(url = %self.url, queued = self.queue.len(), "WebSocket open");
        let _ = self.events.send(TransportEvent::Connected);

        let outcome = self.serve(ws).await;

        let _ = self.events.send(TransportEvent::Disconnected);
        outcome
    }

    async fn serve<S>(&mut self, ws: S) -> Outcome
    where
        S: Sink<WsMessage, Error = tungstenite::Error>
            + futures_util::Stream<Item = Result<WsMessage, tungstenite::Error>>
            + Unpin,
    {
        let (mut sink, mut stream) = ws.split();

        if let Err(e) = self.drain(&mut sink).await {
            warn!(url = %self.url, error = %e, "send failed while draining queue");
            return Outcome::Lost;
        }

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        self.deliver(text.as_bytes().to_vec());
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        self.deliver(data.into());
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!(url = %self.url, "WebSocket closed by peer");
                        return Outcome::Lost;
                    }
                    Some(Ok(_)) => continue, // ping/pong/frame
                    Some(Err(e)) => {
                        let error = TransportError::ReceiveFailed(into_io(e));
                        warn!(url = %self.url, error = %error, "WebSocket receive failed");
                        return Outcome::Lost;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Submit(request)) => {
                        self.queue.push_back(request);
                        if let Err(e) = self.drain(&mut sink).await {
                            warn!(url = %self.url, error = %e, "WebSocket send failed");
                            return Outcome::Lost;
                        }
                    }
                    Some(Command::Close) => {
                        let _ = sink.close().await;
                        info!(url = %self.url, "WebSocket closed");
                        return Outcome::Closed;
                    }
                    Some(Command::Reconnect) => {
                        let _ = sink.close().await;
                        return Outcome::Reopen;
                    }
                    None => {
                        let _ = sink.close().await;
                        return Outcome::Shutdown;
                    }
                },
            }
        }
    }

    /// Sends queued requests in order. Stops at the first send failure,
    /// leaving that request at the head of the queue.
    async fn drain<S>(&mut self, sink: &mut S) -> Result<(), TransportError>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        while let Some(request) = self.queue.front() {
            let frame = match request.message.to_json() {
                Ok(frame) => frame,
                Err(e) => {
                    if let Some(request) = self.queue.pop_front() {
                        let _ = self
                            .events
                            .send(TransportEvent::Failed(request.id, e.into()));
                    }
                    continue;
                }
            };

            sink.send(WsMessage::Text(frame.into()))
                .await
                .map_err(|e| TransportError::SendFailed(into_io(e)))?;

            if let Some(request) = self.queue.pop_front() {
                trace!(id = %request.id, "frame sent");
                let _ = self.events.send(TransportEvent::Sent(request.id));
            }
        }
        Ok(())
    }

    fn deliver(&self, data: Vec<u8>) {
        trace!(bytes = data.len(), "frame received");
        let _ = self.events.send(TransportEvent::Inbound(data));
    }
}

/// Unwraps socket errors; anything tungstenite raised itself is wrapped.
fn into_io(e: tungstenite::Error) -> std::io::Error {
    match e {
        tungstenite::Error::Io(io) => io,
        other => std::io::Error::other(other),
    }
}
