//! HTTP request/response transport.
//!
//! Each outbound message is POSTed on its own as a one-element batch with
//! the RPC content type. Whatever batch the server answers with is handed
//! back to the client as inbound bytes, so a query's reply arrives
//! through the same path as any other inbound message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jamp_protocol::{Codec, JsonCodec, content_type};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use crate::{EventSender, OutboundRequest, Transport, TransportError, TransportEvent};

/// Timing for the HTTP transports.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    /// Upper bound for an RPC or push round trip. Default: 60 s.
    pub request_timeout: Duration,
    /// How long a pull request may be held open by the server before the
    /// client gives up and re-issues it. Default: 30 s.
    pub pull_timeout: Duration,
    /// Base delay after a failed pull; multiplied by the number of
    /// consecutive failures. Default: 1 s.
    pub error_backoff: Duration,
    /// Cap for that multiplier. Default: 5.
    pub max_error_steps: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            pull_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(1),
            max_error_steps: 5,
        }
    }
}

impl HttpConfig {
    /// Fix out-of-range values so the config is safe to use.
    ///
    /// Zero timeouts fall back to their defaults; `max_error_steps` is at
    /// least 1.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.request_timeout.is_zero() {
            warn!("request_timeout is zero, using default");
            self.request_timeout = defaults.request_timeout;
        }
        if self.pull_timeout.is_zero() {
            warn!("pull_timeout is zero, using default");
            self.pull_timeout = defaults.pull_timeout;
        }
        if self.max_error_steps == 0 {
            warn!("max_error_steps is zero, clamping to 1");
            self.max_error_steps = 1;
        }
        self
    }

    /// Delay before the next pull after `consecutive` failures in a row.
    pub(crate) fn error_delay(&self, consecutive: u32) -> Duration {
        self.error_backoff * consecutive.min(self.max_error_steps)
    }
}

/// Builds the `reqwest` client shared by a transport's tasks.
pub(crate) fn build_client(config: &HttpConfig) -> Result<reqwest::Client, TransportError> {
    Ok(reqwest::Client::builder()
        .connect_timeout(config.request_timeout)
        .build()?)
}

/// POSTs `body` and returns the response bytes, mapping non-success
/// statuses to [`TransportError::Status`].
pub(crate) async fn post_batch(
    client: &reqwest::Client,
    url: &str,
    kind: &'static str,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    let response = client
        .post(url)
        .header(CONTENT_TYPE, kind)
        .timeout(timeout)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("unknown status");
        let text = response.text().await.unwrap_or_default();
        let message = if text.is_empty() {
            reason.to_string()
        } else {
            format!("{reason}: {text}")
        };
        return Err(TransportError::Status {
            status: status.as_u16(),
            message,
        });
    }

    Ok(response.bytes().await?.to_vec())
}

/// Reports the outcome of one POST on the event channel.
///
/// On success the request is marked sent before the response batch is
/// delivered, so a fire-and-forget entry is settled even when the server
/// answers with an empty body.
pub(crate) fn report(
    events: &EventSender,
    request: &OutboundRequest,
    outcome: Result<Vec<u8>, TransportError>,
) {
    match outcome {
        Ok(body) => {
            let _ = events.send(TransportEvent::Sent(request.id));
            if !body.is_empty() {
                let _ = events.send(TransportEvent::Inbound(body));
            }
        }
        Err(e) => {
            warn!(id = %request.id, error = %e, "HTTP request failed");
            let _ = events.send(TransportEvent::Failed(request.id, e));
        }
    }
}

// ---------------------------------------------------------------------------
// HttpRpcTransport
// ---------------------------------------------------------------------------

/// Request/response transport: one POST per outbound message.
///
/// Round trips run on spawned tasks, so several can be in flight at once
/// and their replies may arrive in any order.
pub struct HttpRpcTransport {
    client: reqwest::Client,
    url: Arc<str>,
    config: HttpConfig,
    events: EventSender,
    closed: Arc<AtomicBool>,
}

impl HttpRpcTransport {
    /// Creates a transport that POSTs to `url`.
    ///
    /// # Errors
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        config: HttpConfig,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        let config = config.validated();
        let client = build_client(&config)?;
        let url: Arc<str> = Arc::from(url.into());
        debug!(url = %url, "HTTP RPC transport ready");
        Ok(Self {
            client,
            url,
            config,
            events,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Transport for HttpRpcTransport {
    fn submit(&self, request: OutboundRequest) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let body = JsonCodec.encode_batch(std::slice::from_ref(&request.message))?;
        let client = self.client.clone();
        let url = Arc::clone(&self.url);
        let events = self.events.clone();
        let timeout = self.config.request_timeout;

        tokio::spawn(async move {
            let outcome = post_batch(&client, &url, content_type::RPC, body, timeout).await;
            report(&events, &request, outcome);
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn reconnect(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "http-rpc"
    }
}
