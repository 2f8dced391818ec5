//! Configuring and starting a [`JampClient`].

use std::fmt;
use std::str::FromStr;

use jamp_client::{ClientConfig, ClientCore};
use jamp_transport::{
    EventSender, HttpConfig, HttpRpcTransport, LongPollTransport, ReconnectConfig, Transport,
    TransportError, WebSocketTransport, event_channel,
};
use tracing::info;

use crate::client::spawn_client;
use crate::{JampClient, JampError};

/// Which transport a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// One HTTP POST per message, reply in the response body.
    Rpc,
    /// HTTP push per message plus a continuous pull for inbound messages.
    LongPoll,
    /// One persistent WebSocket with reconnect.
    WebSocket,
}

impl TransportKind {
    /// The kind implied by a URL scheme: `ws`/`wss` → WebSocket,
    /// `http`/`https` → RPC.
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "ws" | "wss" => Some(Self::WebSocket),
            "http" | "https" => Some(Self::Rpc),
            _ => None,
        }
    }

    fn is_duplex(self) -> bool {
        matches!(self, Self::WebSocket)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rpc => "rpc",
            Self::LongPoll => "long-poll",
            Self::WebSocket => "websocket",
        })
    }
}

impl FromStr for TransportKind {
    type Err = JampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rpc" | "http" => Ok(Self::Rpc),
            "long-poll" | "poll" => Ok(Self::LongPoll),
            "websocket" | "ws" => Ok(Self::WebSocket),
            other => Err(JampError::Config(format!("unknown transport {other:?}"))),
        }
    }
}

/// Builder for a [`JampClient`].
///
/// # Example
///
/// ```rust,no_run
/// use jamp::prelude::*;
///
/// # async fn demo() -> Result<(), JampError> {
/// let client = JampClient::builder()
///     .url("ws://localhost:8080/jamp")
///     .build()?;
///
/// let sum = client.call("/calculator", "add", vec![2i64.into(), 3i64.into()]).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct JampClientBuilder {
    url: Option<String>,
    transport: Option<TransportKind>,
    client_config: ClientConfig,
    reconnect_config: ReconnectConfig,
    http_config: HttpConfig,
}

impl JampClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Picks the transport explicitly instead of inferring it from the URL.
    pub fn transport(mut self, kind: TransportKind) -> Self {
        self.transport = Some(kind);
        self
    }

    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    /// Reconnect timing for the WebSocket transport.
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_config = config;
        self
    }

    /// Timeouts for the HTTP transports.
    pub fn http_config(mut self, config: HttpConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Creates the transport and starts the client task.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    /// [`JampError::Config`] if no URL was given or its transport cannot
    /// be inferred, [`JampError::Transport`] if the transport cannot be
    /// created.
    pub fn build(self) -> Result<JampClient, JampError> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| JampError::Config("no url given".into()))?;
        let kind = match self.transport {
            Some(kind) => kind,
            None => TransportKind::from_url(&url).ok_or_else(|| {
                JampError::Config(format!("cannot infer transport from {url:?}"))
            })?,
        };
        info!(url = %url, transport = %kind, "starting JAMP client");

        let reconnect = self.reconnect_config.clone();
        let http = self.http_config.clone();
        self.spawn(kind.is_duplex(), move |events| {
            let transport: Box<dyn Transport> = match kind {
                TransportKind::Rpc => Box::new(HttpRpcTransport::new(url, http, events)?),
                TransportKind::LongPoll => Box::new(LongPollTransport::new(url, http, events)?),
                TransportKind::WebSocket => {
                    Box::new(WebSocketTransport::connect(url, reconnect, events))
                }
            };
            Ok(transport)
        })
    }

    /// Starts the client task over a caller-supplied transport.
    ///
    /// `make` receives the sender the transport must report its events on.
    /// The URL and transport kind settings are ignored.
    pub fn build_with<F>(self, make: F) -> Result<JampClient, JampError>
    where
        F: FnOnce(EventSender) -> Result<Box<dyn Transport>, TransportError>,
    {
        self.spawn(false, make)
    }

    fn spawn<F>(self, duplex: bool, make: F) -> Result<JampClient, JampError>
    where
        F: FnOnce(EventSender) -> Result<Box<dyn Transport>, TransportError>,
    {
        let (events_tx, events_rx) = event_channel();
        let transport = make(events_tx)?;
        let core = ClientCore::with_clock(transport, self.client_config, || {
            tokio::time::Instant::now().into_std()
        });
        let (client, _task) = spawn_client(core, events_rx, duplex);
        Ok(client)
    }
}
