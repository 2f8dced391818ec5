//! # JAMP
//!
//! Asynchronous client for JAMP, a JSON array messaging protocol for
//! calling remote services.
//!
//! A [`JampClient`] sends four kinds of messages over one transport:
//! fire-and-forget *sends*, *queries* that expect exactly one *reply* or
//! *error*, and server-initiated sends to client-side listeners. Requests
//! are correlated by id, expire after a timeout, and survive WebSocket
//! reconnects.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jamp::prelude::*;
//!
//! # async fn demo() -> Result<(), JampError> {
//! let client = JampClient::builder()
//!     .url("ws://localhost:8080/jamp")
//!     .build()?;
//!
//! // Await a result...
//! let sum = client.call("/calculator", "add", vec![2i64.into(), 3i64.into()]).await?;
//!
//! // ...or pass a listener the server can call back later.
//! let feed = MethodTable::new().on("update", |args| println!("update: {args:?}"));
//! client.call("/feed", "subscribe", vec![feed.into()]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crates
//!
//! - `jamp-protocol`: message types and the JSON codec
//! - `jamp-transport`: HTTP RPC, long-poll and WebSocket transports
//! - `jamp-client`: pending requests, listeners, dispatch and expiry

mod builder;
mod client;
mod error;
mod service;

pub use builder::{JampClientBuilder, TransportKind};
pub use client::{ClientStats, JampClient};
pub use error::JampError;
pub use service::ServiceRef;

pub use jamp_client as client_core;
pub use jamp_protocol as protocol;
pub use jamp_transport as transport;

/// The types most programs need.
pub mod prelude {
    pub use crate::{ClientStats, JampClient, JampClientBuilder, JampError, ServiceRef, TransportKind};
    pub use jamp_client::{
        Arg, CallOptions, ClientConfig, Listener, ListenerError, MethodTable, RequestError,
    };
    pub use jamp_protocol::{Headers, QueryId};
    pub use jamp_transport::{HttpConfig, ReconnectConfig};
}
