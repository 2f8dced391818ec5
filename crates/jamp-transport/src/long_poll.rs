//! HTTP long-poll transport.
//!
//! Two request flavours share one endpoint:
//!
//! - **push**: one POST per outbound message, carrying a one-element
//!   batch. Any batch in the response body is delivered as inbound.
//! - **pull**: a background task keeps exactly one request open. The
//!   server holds it until it has messages for this client, then answers
//!   with a batch; the task delivers it and immediately pulls again.
//!
//! A pull that times out is not an error: the task simply re-issues it.
//! Real failures back off linearly (`error_backoff * consecutive`) up to
//! a fixed cap, and the loop keeps going until the transport is closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jamp_protocol::{Codec, JsonCodec, content_type};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::http::{HttpConfig, build_client, post_batch, report};
use crate::{EventSender, OutboundRequest, Transport, TransportError, TransportEvent};

/// Body of a pull request: an empty batch.
const PULL_BODY: &[u8] = b"[]";

/// Long-poll transport: push per message plus a continuous pull loop.
pub struct LongPollTransport {
    client: reqwest::Client,
    url: Arc<str>,
    config: HttpConfig,
    events: EventSender,
    closed: Arc<AtomicBool>,
    pull: Mutex<Option<JoinHandle<()>>>,
}

impl LongPollTransport {
    /// Creates the transport and starts pulling from `url`.
    ///
    /// Must be called inside a Tokio runtime.
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
        let transport = Self {
            client,
            url: Arc::from(url.into()),
            config,
            events,
            closed: Arc::new(AtomicBool::new(false)),
            pull: Mutex::new(None),
        };
        transport.start_pull();
        Ok(transport)
    }

    fn start_pull(&self) {
        let Ok(mut slot) = self.pull.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(pull_loop(
            self.client.clone(),
            Arc::clone(&self.url),
            self.config.clone(),
            self.events.clone(),
            Arc::clone(&self.closed),
        )));
    }

    fn stop_pull(&self) {
        let task = match self.pull.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Transport for LongPollTransport {
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
            let outcome = post_batch(&client, &url, content_type::PUSH, body, timeout).await;
            report(&events, &request, outcome);
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_pull();
        debug!(url = %self.url, "long-poll transport closed");
    }

    fn reconnect(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.start_pull();
        debug!(url = %self.url, "long-poll transport reopened");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "long-poll"
    }
}

impl Drop for LongPollTransport {
    fn drop(&mut self) {
        self.stop_pull();
    }
}

/// Keeps one pull request outstanding until the transport closes or the
/// client stops listening.
async fn pull_loop(
    client: reqwest::Client,
    url: Arc<str>,
    config: HttpConfig,
    events: EventSender,
    closed: Arc<AtomicBool>,
) {
    info!(url = %url, "starting pull loop");
    let mut consecutive_errors = 0u32;

    loop {
        if closed.load(Ordering::SeqCst) || events.is_closed() {
            break;
        }

        let outcome = post_batch(
            &client,
            &url,
            content_type::PULL,
            PULL_BODY.to_vec(),
            config.pull_timeout,
        )
        .await;

        match outcome {
            Ok(body) => {
                consecutive_errors = 0;
                if !body.is_empty() {
                    trace!(bytes = body.len(), "pull delivered batch");
                    if events.send(TransportEvent::Inbound(body)).is_err() {
                        break;
                    }
                }
            }
            Err(TransportError::Http(e)) if e.is_timeout() => {
                trace!("pull timed out, re-issuing");
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let delay = config.error_delay(consecutive_errors);
                warn!(
                    error = %e,
                    consecutive_errors,
                    delay_ms = delay.as_millis() as u64,
                    "pull failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    info!(url = %url, "pull loop exited");
}
