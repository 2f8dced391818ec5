//! Transport layer for JAMP clients.
//!
//! A transport moves encoded messages between the client and a JAMP
//! server. Three are provided:
//!
//! - [`HttpRpcTransport`]: one HTTP POST per outbound message; the reply
//!   batch comes back in the response body.
//! - [`LongPollTransport`]: outbound messages are pushed with one POST
//!   each while a background task keeps a pull request open for
//!   server-initiated messages.
//! - [`WebSocketTransport`]: one persistent duplex socket with an outbound
//!   FIFO and automatic reconnect (see [`Backoff`]).
//!
//! # Events
//!
//! Transports never call back into the client. Everything they observe is
//! reported as a [`TransportEvent`] on an unbounded channel the client
//! owns, so the client can process outcomes on its own task in order:
//!
//! ```text
//! client ──submit(OutboundRequest)──▶ transport ──bytes──▶ server
//! client ◀──TransportEvent────────── transport ◀──bytes── server
//! ```
//!
//! # Feature Flags
//!
//! - `websocket` (default): duplex transport via `tokio-tungstenite`
//! - `http` (default): RPC and long-poll transports via `reqwest`

mod backoff;
mod error;
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
mod long_poll;
#[cfg(feature = "websocket")]
mod websocket;

pub use backoff::{Backoff, ReconnectConfig};
pub use error::TransportError;
#[cfg(feature = "http")]
pub use http::{HttpConfig, HttpRpcTransport};
#[cfg(feature = "http")]
pub use long_poll::LongPollTransport;
#[cfg(feature = "websocket")]
pub use websocket::{LinkState, WebSocketTransport};

use jamp_protocol::{Message, QueryId};
use tokio::sync::mpsc;

/// Whether the client expects a reply for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Fire-and-forget. Settled once the bytes leave the client.
    Send,
    /// Settled by a matching reply or error from the server.
    Query,
}

/// One message handed to a transport, tagged with the id the client uses
/// to settle its pending entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub id: QueryId,
    pub kind: RequestKind,
    pub message: Message,
}

/// What a transport reports back to the client.
#[derive(Debug)]
pub enum TransportEvent {
    /// The request's bytes were handed to the network.
    Sent(QueryId),
    /// The request could not be delivered.
    Failed(QueryId, TransportError),
    /// A batch (or a single bare message) arrived from the server.
    Inbound(Vec<u8>),
    /// The duplex channel opened.
    Connected,
    /// The duplex channel closed, expectedly or not.
    Disconnected,
}

/// The sending half of a transport's event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// The receiving half of a transport's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the channel a transport reports its [`TransportEvent`]s on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Moves outbound requests to a JAMP server.
///
/// Methods are synchronous: each transport hands work to its own Tokio
/// tasks and reports the outcome as [`TransportEvent`]s. That keeps the
/// trait object-safe so the client can hold any of them as
/// `Box<dyn Transport>`.
pub trait Transport: Send + 'static {
    /// Queues `request` for delivery.
    ///
    /// # Errors
    /// - [`TransportError::Closed`] if [`close`](Self::close) was called
    ///   and the transport has not been reconnected since.
    /// - [`TransportError::Protocol`] if the message cannot be encoded.
    fn submit(&self, request: OutboundRequest) -> Result<(), TransportError>;

    /// Stops delivery. Later submits fail with [`TransportError::Closed`].
    fn close(&self);

    /// Undoes [`close`](Self::close) and reopens any underlying channel.
    fn reconnect(&self);

    /// Returns `true` between [`close`](Self::close) and
    /// [`reconnect`](Self::reconnect).
    fn is_closed(&self) -> bool;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&self, request: OutboundRequest) -> Result<(), TransportError> {
        (**self).submit(request)
    }

    fn close(&self) {
        (**self).close()
    }

    fn reconnect(&self) {
        (**self).reconnect()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
