//! Wire protocol for JAMP.
//!
//! This crate defines the "language" a JAMP client and server speak:
//!
//! - **Types** ([`Message`] and its four variants, [`QueryId`],
//!   [`Headers`]): the messages that travel on the wire, each one an
//!   ordered array of values tagged `send`, `query`, `reply` or `error`.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how ordered batches of
//!   those messages are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and client
//! (request correlation). It doesn't know about connections or pending
//! requests; it only knows how to serialize and deserialize messages.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Client (pending table, listeners)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use types::{
    CALLBACK_PREFIX, DEFAULT_FROM_ADDRESS, ErrorMessage, Headers, Message, MessageKind,
    QueryId, QueryMessage, ReplyMessage, SendMessage,
};

/// HTTP content types a JAMP server routes on.
///
/// A push delivers outbound messages; a pull asks for whatever the server
/// has queued for this client.
pub mod content_type {
    /// Request/response RPC: the body is a batch, the response is a batch.
    pub const RPC: &str = "x-application/jamp-rpc";
    /// Long-poll push: outbound messages only.
    pub const PUSH: &str = "x-application/jamp-push";
    /// Long-poll pull: held open by the server until messages are queued.
    pub const PULL: &str = "x-application/jamp-pull";
}
