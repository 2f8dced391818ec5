//! Behavioural tests for `ClientCore` against an in-memory transport.
//!
//! The transport records every submitted request so the tests can play
//! the server: read what the client sent, then feed replies, errors and
//! callbacks back in through `on_inbound_batch`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jamp_client::{
    Arg, CallOptions, ClientConfig, ClientCore, ClientError, Completion, MethodTable,
    RequestError,
};
use jamp_protocol::{Message, QueryId};
use jamp_transport::{OutboundRequest, RequestKind, Transport, TransportError};
use serde_json::{Value, json};

#[derive(Default)]
struct Shared {
    submitted: Mutex<Vec<OutboundRequest>>,
    closed: AtomicBool,
}

/// Cloneable so the test keeps a handle after the core takes ownership.
#[derive(Clone, Default)]
struct Loopback(Arc<Shared>);

impl Loopback {
    fn submitted(&self) -> std::sync::MutexGuard<'_, Vec<OutboundRequest>> {
        self.0.submitted.lock().unwrap()
    }
}

impl Transport for Loopback {
    fn submit(&self, request: OutboundRequest) -> Result<(), TransportError> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.submitted().push(request);
        Ok(())
    }

    fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    fn reconnect(&self) {
        self.0.closed.store(false, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

type Outcomes = Arc<Mutex<Vec<Result<Value, String>>>>;

fn client() -> (ClientCore<Loopback>, Loopback) {
    let transport = Loopback::default();
    let core = ClientCore::new(transport.clone(), ClientConfig::default());
    (core, transport)
}

fn recorder() -> (Completion, Outcomes) {
    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    let completion: Completion = Box::new(move |result| {
        sink.lock().unwrap().push(result.map_err(|e| match e {
            RequestError::Remote(v) => format!("remote:{v}"),
            other => other.to_string(),
        }));
    });
    (completion, outcomes)
}

fn wire(transport: &Loopback, index: usize) -> Value {
    Value::Array(transport.submitted()[index].message.to_wire())
}

#[test]
fn test_query_reply_completes_callback_and_empties_table() {
    let (mut core, transport) = client();
    let (completion, outcomes) = recorder();

    let id = core
        .query("/svc", "add", vec![json!(2).into(), json!(3).into()], CallOptions::default(), completion)
        .unwrap();

    assert_eq!(id, QueryId(0));
    assert_eq!(wire(&transport, 0), json!(["query", {}, "me", 0, "/svc", "add", 2, 3]));

    let errors = core.on_inbound_batch(br#"[["reply", {}, "/svc", 0, 5]]"#);

    assert!(errors.is_empty());
    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(json!(5))]);
    assert_eq!(core.pending_len(), 0);
}

#[test]
fn test_query_error_delivers_remote_payload() {
    let (mut core, _transport) = client();
    let (completion, outcomes) = recorder();
    core.query("/svc", "add", vec![], CallOptions::default(), completion)
        .unwrap();

    core.on_inbound_batch(br#"[["error", {}, "/client", 0, "boom"]]"#);

    assert_eq!(*outcomes.lock().unwrap(), vec![Err("remote:\"boom\"".to_string())]);
    assert_eq!(core.pending_len(), 0);
}

#[test]
fn test_concurrent_queries_get_distinct_ids_and_only_matching_callback_fires() {
    let (mut core, _transport) = client();
    let mut logs = Vec::new();
    let mut ids = Vec::new();
    for n in 0..10 {
        let (completion, outcomes) = recorder();
        ids.push(core.query("/svc", "id", vec![json!(n).into()], CallOptions::default(), completion).unwrap());
        logs.push(outcomes);
    }

    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10);

    let k = ids[6];
    let batch = json!([["reply", {}, "/svc", k.0, "six"]]).to_string();
    core.on_inbound_batch(batch.as_bytes());

    for (i, log) in logs.iter().enumerate() {
        let log = log.lock().unwrap();
        if i == 6 {
            assert_eq!(*log, vec![Ok(json!("six"))]);
        } else {
            assert!(log.is_empty(), "callback {i} must not fire");
        }
    }
    assert_eq!(core.pending_len(), 9);
}

#[test]
fn test_unmatched_reply_is_dropped_without_error() {
    let (mut core, _transport) = client();
    let errors = core.on_inbound_batch(br#"[["reply", {}, "/svc", 42, 1], ["error", {}, "/c", 43, "x"]]"#);
    assert!(errors.is_empty());
}

#[test]
fn test_duplicate_reply_completes_once() {
    let (mut core, _transport) = client();
    let (completion, outcomes) = recorder();
    core.query("/svc", "m", vec![], CallOptions::default(), completion)
        .unwrap();

    core.on_inbound_batch(br#"[["reply", {}, "/svc", 0, 1], ["reply", {}, "/svc", 0, 2]]"#);

    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(json!(1))]);
}

#[test]
fn test_batch_dispatches_in_order_and_isolates_bad_entries() {
    let (mut core, _transport) = client();
    let order = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..2 {
        let sink = Arc::clone(&order);
        let completion: Completion = Box::new(move |r| sink.lock().unwrap().push(r.unwrap()));
        core.query("/svc", "m", vec![], CallOptions::default(), completion)
            .unwrap();
    }

    let errors = core.on_inbound_batch(
        br#"[["reply", {}, "/svc", 1, "b"], ["reply", {}], ["bogus"], ["reply", {}, "/svc", 0, "a"]]"#,
    );

    assert_eq!(errors.len(), 2);
    assert!(matches!(&errors[0], ClientError::Protocol(e) if e.is_malformed()));
    assert_eq!(*order.lock().unwrap(), vec![json!("b"), json!("a")]);
}

#[test]
fn test_garbage_batch_reports_single_error() {
    let (mut core, _transport) = client();
    let errors = core.on_inbound_batch(b"<html>");
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ClientError::Protocol(_)));
}

#[test]
fn test_listener_argument_becomes_callback_address_and_receives_sends() {
    let (mut core, transport) = client();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = MethodTable::new().on("update", move |args| sink.lock().unwrap().push(args));

    let (completion, _) = recorder();
    let id = core
        .query(
            "/feed",
            "subscribe",
            vec!["topic".into(), Arg::from(listener)],
            CallOptions::default(),
            completion,
        )
        .unwrap();

    let callback = format!("/callback-{}", id.0);
    assert_eq!(
        wire(&transport, 0),
        json!(["query", {}, "me", id.0, "/feed", "subscribe", "topic", callback])
    );
    let submitted = transport.submitted()[0].message.clone();
    match submitted {
        Message::Query(q) => assert_eq!(q.listener_addresses, vec![callback.clone()]),
        other => panic!("expected query, got {other:?}"),
    }
    assert_eq!(core.listener_count(), 1);

    let batch = json!([["send", {}, callback, "update", 1, "two"]]).to_string();
    let errors = core.on_inbound_batch(batch.as_bytes());

    assert!(errors.is_empty());
    assert_eq!(*seen.lock().unwrap(), vec![vec![json!(1), json!("two")]]);

    // The listener outlives the query.
    core.on_inbound_batch(format!(r#"[["reply", {{}}, "/feed", {}, true]]"#, id.0).as_bytes());
    core.on_inbound_batch(batch.as_bytes());
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(core.listener_count(), 1);
}

#[test]
fn test_send_to_unregistered_address_is_dispatch_error() {
    let (mut core, _transport) = client();
    let errors = core.on_inbound_batch(br#"[["send", {}, "/callback-99", "update"]]"#);
    assert!(matches!(
        &errors[..],
        [ClientError::Dispatch { address, method }] if address == "/callback-99" && method == "update"
    ));
}

#[test]
fn test_listener_rejecting_method_is_reported() {
    let (mut core, _transport) = client();
    let (completion, _) = recorder();
    let id = core
        .query(
            "/feed",
            "subscribe",
            vec![Arg::from(MethodTable::new().on("update", |_| {}))],
            CallOptions::default(),
            completion,
        )
        .unwrap();

    let batch = json!([["send", {}, id.callback_address(), "delete"]]).to_string();
    let errors = core.on_inbound_batch(batch.as_bytes());
    assert!(matches!(&errors[..], [ClientError::Listener { method, .. }] if method == "delete"));
}

#[test]
fn test_inbound_query_is_rejected() {
    let (mut core, _transport) = client();
    let errors = core.on_inbound_batch(br#"[["query", {}, "/srv", 1, "/client", "ping"]]"#);
    assert!(matches!(&errors[..], [ClientError::UnexpectedQuery { .. }]));
}

#[test]
fn test_send_is_settled_by_acknowledgement() {
    let (mut core, transport) = client();

    let id = core
        .send("/log", "write", vec![json!("line")], CallOptions::default())
        .unwrap();

    assert_eq!(wire(&transport, 0), json!(["send", {}, "/log", "write", "line"]));
    assert_eq!(transport.submitted()[0].kind, RequestKind::Send);
    assert!(core.is_pending(id));

    core.on_sent(id);
    assert!(!core.is_pending(id));
}

#[test]
fn test_sent_does_not_settle_query() {
    let (mut core, _transport) = client();
    let (completion, outcomes) = recorder();
    let id = core
        .query("/svc", "m", vec![], CallOptions::default(), completion)
        .unwrap();

    core.on_sent(id);

    assert!(core.is_pending(id));
    assert!(outcomes.lock().unwrap().is_empty());
}

#[test]
fn test_transport_failure_fails_only_that_request() {
    let (mut core, _transport) = client();
    let (first, first_log) = recorder();
    let (second, second_log) = recorder();
    let a = core.query("/svc", "m", vec![], CallOptions::default(), first).unwrap();
    let b = core.query("/svc", "m", vec![], CallOptions::default(), second).unwrap();

    core.on_failed(a, TransportError::Status { status: 503, message: "busy".into() });

    assert_eq!(first_log.lock().unwrap().len(), 1);
    assert!(first_log.lock().unwrap()[0].as_ref().unwrap_err().contains("503"));
    assert!(second_log.lock().unwrap().is_empty());
    assert!(core.is_pending(b));
}

#[test]
fn test_expire_requests_fails_once_and_removes_entry() {
    let (mut core, _transport) = client();
    let (completion, outcomes) = recorder();
    let start = core.now();
    let id = core
        .query(
            "/slow",
            "m",
            vec![],
            CallOptions::default().timeout(Duration::from_secs(2)),
            completion,
        )
        .unwrap();

    assert_eq!(core.expire_requests(start + Duration::from_secs(1)), 0);
    assert!(core.is_pending(id));

    assert_eq!(core.expire_requests(start + Duration::from_secs(3)), 1);
    assert!(!core.is_pending(id));
    assert_eq!(core.expire_requests(start + Duration::from_secs(4)), 0);

    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].as_ref().unwrap_err().contains("expired"));
}

#[test]
fn test_expire_uses_default_timeout() {
    let (mut core, _transport) = client();
    let start = Instant::now();
    core.send("/log", "write", vec![], CallOptions::default()).unwrap();

    assert_eq!(core.expire_requests(start + Duration::from_secs(299)), 0);
    assert_eq!(core.expire_requests(start + Duration::from_secs(301)), 1);
    assert_eq!(core.pending_len(), 0);
}

#[test]
fn test_reply_after_expiry_is_dropped() {
    let (mut core, _transport) = client();
    let (completion, outcomes) = recorder();
    let start = core.now();
    core.query(
        "/svc",
        "m",
        vec![],
        CallOptions::default().timeout(Duration::from_millis(10)),
        completion,
    )
    .unwrap();

    core.expire_requests(start + Duration::from_secs(1));
    let errors = core.on_inbound_batch(br#"[["reply", {}, "/svc", 0, 1]]"#);

    assert!(errors.is_empty());
    assert_eq!(outcomes.lock().unwrap().len(), 1);
}

#[test]
fn test_closed_transport_rejects_synchronously_and_rolls_back() {
    let (mut core, _transport) = client();
    core.close();
    assert!(core.is_closed());

    let (completion, outcomes) = recorder();
    let err = core
        .query(
            "/feed",
            "subscribe",
            vec![Arg::from(MethodTable::new())],
            CallOptions::default(),
            completion,
        )
        .unwrap_err();

    assert!(matches!(err, ClientError::Transport(TransportError::Closed)));
    assert_eq!(core.pending_len(), 0);
    assert_eq!(core.listener_count(), 0);
    assert!(outcomes.lock().unwrap().is_empty());

    let err = core.send("/log", "w", vec![], CallOptions::default()).unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::Closed)));

    core.reconnect();
    assert!(core.send("/log", "w", vec![], CallOptions::default()).is_ok());
}

#[test]
fn test_headers_and_from_address_are_carried() {
    let transport = Loopback::default();
    let config = ClientConfig {
        from_address: "/client-7".into(),
        ..ClientConfig::default()
    };
    let mut core = ClientCore::new(transport.clone(), config);
    let mut headers = serde_json::Map::new();
    headers.insert("auth".into(), json!("t0k"));

    let (completion, _) = recorder();
    core.query("/svc", "m", vec![], CallOptions::default().headers(headers), completion)
        .unwrap();

    assert_eq!(
        wire(&transport, 0),
        json!(["query", {"auth": "t0k"}, "/client-7", 0, "/svc", "m"])
    );
}

#[test]
fn test_abort_all_fails_everything_pending() {
    let (mut core, _transport) = client();
    let (completion, outcomes) = recorder();
    core.query("/svc", "m", vec![], CallOptions::default(), completion)
        .unwrap();
    core.send("/log", "w", vec![], CallOptions::default()).unwrap();

    assert_eq!(core.abort_all(), 2);
    assert_eq!(core.pending_len(), 0);
    assert!(outcomes.lock().unwrap()[0].as_ref().unwrap_err().contains("shut down"));
}
