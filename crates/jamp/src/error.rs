//! Unified error type for the JAMP client.

use jamp_client::{ClientError, RequestError};
use jamp_protocol::ProtocolError;
use jamp_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `jamp` facade you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attributes generate the `From` impls, so `?` converts sub-crate errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum JampError {
    /// A transport-level error. [`TransportError::Closed`] lands here when
    /// submitting on a closed client.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, malformed message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A client-level error (dispatch, duplicate id).
    #[error(transparent)]
    Client(ClientError),

    /// A request finished with a failure: remote error, expiry, transport
    /// failure or shutdown.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// A reply could not be deserialized into the requested type.
    #[error("unexpected reply shape: {0}")]
    Decode(#[source] serde_json::Error),

    /// The builder was given something it cannot use.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The client task has stopped.
    #[error("client shut down")]
    Shutdown,
}

impl From<ClientError> for JampError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Transport(e) => Self::Transport(e),
            ClientError::Protocol(e) => Self::Protocol(e),
            other => Self::Client(other),
        }
    }
}

impl JampError {
    /// The server's error payload, if the request failed remotely.
    pub fn remote_result(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Request(e) => e.remote_result(),
            _ => None,
        }
    }

    /// Returns `true` if the request failed because the transport is
    /// closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }
}
