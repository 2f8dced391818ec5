//! Client-side request bookkeeping for JAMP.
//!
//! This crate is the part of a JAMP client that remembers things:
//!
//! 1. **Pending requests**: which ids are in flight, who is waiting on
//!    them and when they expire ([`PendingTable`]).
//! 2. **Listeners**: which client-side objects the server may call back,
//!    by callback address ([`ListenerTable`], [`Listener`],
//!    [`MethodTable`]).
//! 3. **The state machine** tying them to one transport ([`ClientCore`]):
//!    send, query, inbound dispatch, expiry.
//!
//! # How it fits in the stack
//!
//! ```text
//! Facade (above)      ← owns a ClientCore on one task, drives expiry
//!     ↕
//! Client (this crate) ← pending table, listener table, dispatch
//!     ↕
//! Transport / Protocol (below) ← moves and encodes messages
//! ```

mod config;
mod core;
mod error;
mod listener;
mod pending;

pub use config::ClientConfig;
pub use self::core::{CallOptions, ClientCore};
pub use error::{ClientError, ListenerError, RequestError};
pub use listener::{Arg, Listener, ListenerTable, MethodTable};
pub use pending::{Completion, PendingRequest, PendingTable};
