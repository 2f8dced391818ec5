//! Error types for the protocol layer.
//!
//! Each crate in the JAMP workspace defines its own error enum. A
//! `ProtocolError` always means "these bytes or values are not a valid
//! JAMP message"; it never says anything about the network or about
//! which requests are in flight.

/// Errors that can occur while encoding or decoding JAMP messages.
///
/// A decode error is fatal to the single message it was raised for. The
/// client keeps dispatching the rest of the batch.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The message array is shorter than its variant requires.
    ///
    /// `tag` is the message type read from position 0 (empty when the
    /// array itself was empty), `len` the number of values received and
    /// `min` the minimum for that type.
    #[error("incomplete message for JAMP type {tag:?}: {len} values, need at least {min}")]
    Malformed {
        tag: String,
        len: usize,
        min: usize,
    },

    /// The type tag at position 0 is not one of
    /// `send`, `query`, `reply` or `error`.
    #[error("unknown JAMP type: {0}")]
    UnknownType(String),

    /// A positional field holds a value of the wrong JSON type, e.g. a
    /// query id that is not a non-negative integer.
    #[error("invalid field {field} at position {index}: expected {expected}")]
    InvalidField {
        field: &'static str,
        index: usize,
        expected: &'static str,
    },

    /// A message (or a batch) was not a JSON array.
    #[error("expected a JSON array")]
    NotAnArray,

    /// Serialization to JSON text failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// The input was not valid JSON.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Returns `true` for errors raised because a message array was too
    /// short for its type.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}
