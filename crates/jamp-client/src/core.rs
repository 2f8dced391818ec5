//! The client state machine.
//!
//! [`ClientCore`] owns one transport plus the two tables a JAMP client
//! needs: pending requests (by id) and listeners (by callback address).
//! It performs no I/O and spawns nothing. Whoever drives it, normally the
//! `jamp` crate's client task, feeds it transport events and calls
//! [`expire_requests`](ClientCore::expire_requests) on a timer.
//!
//! All methods take `&mut self`, so the tables have exactly one writer.

use std::time::{Duration, Instant};

use jamp_protocol::{
    Codec, ErrorMessage, Headers, JsonCodec, Message, QueryId, QueryMessage, ReplyMessage,
    SendMessage,
};
use jamp_transport::{OutboundRequest, RequestKind, Transport, TransportError};
use tracing::{debug, warn};

use crate::{
    Arg, ClientConfig, ClientError, Completion, ListenerTable, PendingRequest, PendingTable,
    RequestError,
};

/// Per-call options for [`ClientCore::query`] and [`ClientCore::send`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Message headers. `None` sends an empty object.
    pub headers: Option<Headers>,
    /// Overrides [`ClientConfig::default_timeout`] for this request.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Request correlation, listener dispatch and expiry over one transport.
pub struct ClientCore<T> {
    transport: T,
    config: ClientConfig,
    clock: fn() -> Instant,
    next_id: u64,
    pending: PendingTable,
    listeners: ListenerTable,
}

impl<T: Transport> ClientCore<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_clock(transport, config, Instant::now)
    }

    /// Like [`new`](Self::new), reading the time from `clock` when
    /// computing deadlines. Lets a driver run on a paused test clock.
    pub fn with_clock(transport: T, config: ClientConfig, clock: fn() -> Instant) -> Self {
        Self {
            transport,
            config: config.validated(),
            clock,
            next_id: 0,
            pending: PendingTable::new(),
            listeners: ListenerTable::new(),
        }
    }

    /// Skips ids still in flight, so a wrapped counter cannot collide.
    fn allocate_id(&mut self) -> QueryId {
        loop {
            let id = QueryId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.pending.contains(id) {
                return id;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Fire-and-forget call of `method` on `address`.
    ///
    /// The pending entry is removed once the transport reports the
    /// message sent.
    ///
    /// # Errors
    /// [`ClientError::Transport`] if the transport refuses the request;
    /// nothing stays pending in that case.
    pub fn send(
        &mut self,
        address: &str,
        method: &str,
        args: Vec<serde_json::Value>,
        options: CallOptions,
    ) -> Result<QueryId, ClientError> {
        let id = self.allocate_id();
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let message = SendMessage::new(options.headers, address, method, args);

        self.pending
            .insert(PendingRequest::send(id, address, method, (self.clock)(), timeout))
            .map_err(|_| ClientError::DuplicateId(id))?;

        self.submit(id, RequestKind::Send, message.into())?;
        debug!(%id, address, method, "send submitted");
        Ok(id)
    }

    /// Calls `method` on `address` and routes the terminal outcome to
    /// `completion`.
    ///
    /// Listener arguments are replaced by this query's callback address
    /// and registered there, so the server can call them back later.
    ///
    /// # Errors
    /// [`ClientError::Transport`] if the transport refuses the request.
    /// `completion` is dropped without being called and the listeners
    /// registered for this query are removed again.
    pub fn query(
        &mut self,
        address: &str,
        method: &str,
        args: Vec<Arg>,
        options: CallOptions,
        completion: Completion,
    ) -> Result<QueryId, ClientError> {
        let id = self.allocate_id();
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let mut message = QueryMessage::new(
            options.headers,
            Some(self.config.from_address.clone()),
            id,
            address,
            method,
            Vec::with_capacity(args.len()),
        );

        let mut registered = Vec::new();
        for arg in args {
            match arg {
                Arg::Value(value) => message.args.push(value),
                Arg::Listener(listener) => {
                    let callback = message.push_listener_arg();
                    if !registered.contains(&callback) {
                        registered.push(callback.clone());
                    }
                    self.listeners.register(callback, listener);
                }
            }
        }

        let request = PendingRequest::query(id, address, method, (self.clock)(), timeout, completion);
        self.pending
            .insert(request)
            .map_err(|_| ClientError::DuplicateId(id))?;

        if let Err(e) = self.submit(id, RequestKind::Query, message.into()) {
            for callback in &registered {
                self.listeners.remove(callback);
            }
            return Err(e);
        }
        debug!(%id, address, method, listeners = registered.len(), "query submitted");
        Ok(id)
    }

    fn submit(&mut self, id: QueryId, kind: RequestKind, message: Message) -> Result<(), ClientError> {
        let request = OutboundRequest { id, kind, message };
        if let Err(e) = self.transport.submit(request) {
            self.pending.remove(id);
            warn!(%id, transport = self.transport.name(), error = %e, "submit refused");
            return Err(e.into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transport events
    // -----------------------------------------------------------------------

    /// The transport put request `id` on the wire. Settles send-kind
    /// entries; queries keep waiting for their reply.
    pub fn on_sent(&mut self, id: QueryId) {
        let is_send = self
            .pending
            .get(id)
            .is_some_and(|entry| entry.kind == RequestKind::Send);
        if is_send {
            self.pending.remove(id);
            debug!(%id, "send acknowledged");
        }
    }

    /// The transport gave up on request `id`.
    pub fn on_failed(&mut self, id: QueryId, error: TransportError) {
        let Some(entry) = self.pending.remove(id) else {
            debug!(%id, error = %error, "failure for request no longer pending");
            return;
        };
        warn!(%id, address = %entry.address, method = %entry.method, error = %error, "request failed");
        entry.complete(Err(RequestError::Transport(error)));
    }

    /// Decodes `data` and dispatches each message in wire order.
    ///
    /// Returns what could not be dispatched. A bad message never stops
    /// the rest of the batch, and a reply or error that matches no pending
    /// request is dropped silently: it may simply have arrived after its
    /// request expired.
    pub fn on_inbound_batch(&mut self, data: &[u8]) -> Vec<ClientError> {
        let batch = match JsonCodec.decode_batch(data) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, bytes = data.len(), "inbound batch rejected");
                return vec![e.into()];
            }
        };

        let mut errors = Vec::new();
        for entry in batch {
            let result = match entry {
                Ok(message) => self.dispatch(message),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                warn!(error = %e, "inbound message dropped");
                errors.push(e);
            }
        }
        errors
    }

    fn dispatch(&mut self, message: Message) -> Result<(), ClientError> {
        match message {
            Message::Reply(ReplyMessage {
                query_id, result, ..
            }) => {
                self.settle(query_id, Ok(result));
                Ok(())
            }
            Message::Error(ErrorMessage {
                query_id, result, ..
            }) => {
                self.settle(query_id, Err(RequestError::Remote(result)));
                Ok(())
            }
            Message::Send(SendMessage {
                address,
                method,
                parameters,
                ..
            }) => {
                let Some(listener) = self.listeners.get(&address) else {
                    return Err(ClientError::Dispatch { address, method });
                };
                debug!(address = %address, method = %method, "dispatching to listener");
                listener
                    .invoke(&method, parameters)
                    .map_err(|source| ClientError::Listener {
                        address,
                        method,
                        source,
                    })
            }
            Message::Query(QueryMessage {
                address, method, ..
            }) => Err(ClientError::UnexpectedQuery { address, method }),
        }
    }

    fn settle(&mut self, id: QueryId, result: Result<serde_json::Value, RequestError>) {
        match self.pending.remove(id) {
            Some(entry) => {
                debug!(%id, ok = result.is_ok(), "query settled");
                entry.complete(result);
            }
            None => warn!(%id, "no pending request for reply, dropping"),
        }
    }

    // -----------------------------------------------------------------------
    // Expiry and lifecycle
    // -----------------------------------------------------------------------

    /// Fails every request whose deadline is at or before `now` with
    /// [`RequestError::Expired`]. Returns how many expired.
    pub fn expire_requests(&mut self, now: Instant) -> usize {
        let expired = self.pending.expired_ids(now);
        for id in &expired {
            if let Some(entry) = self.pending.remove(*id) {
                warn!(%id, address = %entry.address, method = %entry.method, "request expired");
                let timeout = entry.timeout;
                entry.complete(Err(RequestError::Expired { id: *id, timeout }));
            }
        }
        expired.len()
    }

    /// Fails everything still pending with [`RequestError::Aborted`].
    pub fn abort_all(&mut self) -> usize {
        let entries = self.pending.drain();
        let count = entries.len();
        for entry in entries {
            let id = entry.id;
            entry.complete(Err(RequestError::Aborted(id)));
        }
        count
    }

    /// Closes the transport. Pending requests stay pending until they
    /// settle or expire.
    pub fn close(&mut self) {
        self.transport.close();
    }

    pub fn reconnect(&mut self) {
        self.transport.reconnect();
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: QueryId) -> bool {
        self.pending.contains(id)
    }

    /// Number of registered listeners. Only ever grows, apart from
    /// rollbacks of refused queries.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current time on this client's clock.
    pub fn now(&self) -> Instant {
        (self.clock)()
    }
}
