//! Error types for the client layer.

use std::time::Duration;

use jamp_protocol::{ProtocolError, QueryId};
use jamp_transport::TransportError;
use serde_json::Value;

/// Errors raised by [`ClientCore`](crate::ClientCore) itself.
///
/// None of these fail an unrelated pending request. Inbound problems are
/// reported per message and the rest of the batch is still dispatched.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An inbound send targeted an address with no registered listener.
    #[error("no listener registered at {address} (method {method})")]
    Dispatch { address: String, method: String },

    /// A registered listener rejected an inbound send.
    #[error("listener at {address} failed on {method}: {source}")]
    Listener {
        address: String,
        method: String,
        #[source]
        source: ListenerError,
    },

    /// The server sent a query. This client only issues queries.
    #[error("unexpected inbound query {method} on {address}")]
    UnexpectedQuery { address: String, method: String },

    /// The id is already in flight.
    #[error("request id {0} is already pending")]
    DuplicateId(QueryId),

    /// An inbound batch or message could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The transport refused an outbound request.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The failure half of a request's completion.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// No reply arrived before the request's deadline.
    #[error("request {id} expired after {timeout:?}")]
    Expired { id: QueryId, timeout: Duration },

    /// The server answered with an error message. Carries its result
    /// payload (an array when the server sent several values).
    #[error("remote error: {0}")]
    Remote(Value),

    /// The transport could not deliver the request.
    #[error("transport failed: {0}")]
    Transport(#[source] TransportError),

    /// The client shut down while the request was in flight.
    #[error("client shut down before request {0} completed")]
    Aborted(QueryId),
}

impl RequestError {
    /// The server's error payload, if this is a remote error.
    pub fn remote_result(&self) -> Option<&Value> {
        match self {
            Self::Remote(value) => Some(value),
            _ => None,
        }
    }
}

/// Returned by a [`Listener`](crate::Listener) that cannot handle an
/// inbound call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ListenerError {
    /// The listener has no method with this name.
    #[error("unknown method {0}")]
    UnknownMethod(String),

    /// The method exists but could not process the call.
    #[error("{0}")]
    Failed(String),
}
