use jamp_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport was closed by the client; nothing can be submitted
    /// until it is reconnected.
    #[error("transport closed")]
    Closed,

    /// Opening the underlying channel failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The HTTP request itself failed (DNS, connect, timeout, body read).
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    /// The outbound message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The background task driving the transport has stopped.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns `true` for [`TransportError::Closed`].
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
