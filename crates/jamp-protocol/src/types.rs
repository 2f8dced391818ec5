//! JAMP message types and their array-of-values wire form.
//!
//! Every JAMP message travels as a JSON array whose first element is a
//! string tag naming the variant. The remaining elements are positional
//! fields, followed by a variable-length tail:
//!
//! ```text
//! ["send",  headers, address,     method,  param0, param1, ...]
//! ["query", headers, fromAddress, queryId, address, method, arg0, ...]
//! ["reply", headers, fromAddress, queryId, result]
//! ["error", headers, toAddress,   queryId, result0, result1, ...]
//! ```
//!
//! There is no schema beyond positions, so instead of deriving serde
//! impls field by field, each message writes itself into a `Vec<Value>`
//! ([`Message::write_to`]) and is read back positionally
//! ([`Message::from_wire`]). The serde impls at the bottom of this file
//! are thin wrappers over those two functions.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::ProtocolError;

/// Free-form message headers. Always a JSON object on the wire.
pub type Headers = Map<String, Value>;

/// Prefix of the address synthesized for a listener argument.
pub const CALLBACK_PREFIX: &str = "/callback-";

/// The `fromAddress` a query carries when the caller does not name one.
pub const DEFAULT_FROM_ADDRESS: &str = "me";

// ---------------------------------------------------------------------------
// QueryId
// ---------------------------------------------------------------------------

/// Identifier correlating a query with its reply or error.
///
/// Unique among the requests one client has in flight. On the wire it is a
/// plain number, hence `#[serde(transparent)]`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct QueryId(pub u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q-{}", self.0)
    }
}

impl QueryId {
    /// The address a listener argument of this query is reachable at:
    /// `"/callback-" + queryId`.
    pub fn callback_address(self) -> String {
        format!("{CALLBACK_PREFIX}{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The four JAMP message variants, as named by the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Send,
    Query,
    Reply,
    Error,
}

impl MessageKind {
    /// The string tag at position 0 of the wire array.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Query => "query",
            Self::Reply => "reply",
            Self::Error => "error",
        }
    }

    /// Parses a wire tag. Returns `None` for anything unrecognized.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "send" => Some(Self::Send),
            "query" => Some(Self::Query),
            "reply" => Some(Self::Reply),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Minimum wire length (tag included) for this variant.
    pub fn min_len(self) -> usize {
        match self {
            Self::Send => 4,
            Self::Query => 6,
            Self::Reply | Self::Error => 5,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Fire-and-forget invocation of `method` on the service at `address`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessage {
    pub headers: Headers,
    pub address: String,
    pub method: String,
    pub parameters: Vec<Value>,
}

impl SendMessage {
    pub fn new(
        headers: Option<Headers>,
        address: impl Into<String>,
        method: impl Into<String>,
        parameters: Vec<Value>,
    ) -> Self {
        Self {
            headers: headers.unwrap_or_default(),
            address: address.into(),
            method: method.into(),
            parameters,
        }
    }
}

/// Invocation expecting exactly one terminal [`ReplyMessage`] or
/// [`ErrorMessage`] carrying the same `query_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMessage {
    pub headers: Headers,
    pub from_address: String,
    pub query_id: QueryId,
    pub address: String,
    pub method: String,
    pub args: Vec<Value>,
    /// Callback addresses substituted for listener arguments, in argument
    /// order. Local bookkeeping only: on the wire they appear as ordinary
    /// string arguments, so a decoded query always has this empty.
    pub listener_addresses: Vec<String>,
}

impl QueryMessage {
    /// Builds a query. A missing `from_address` becomes
    /// [`DEFAULT_FROM_ADDRESS`].
    pub fn new(
        headers: Option<Headers>,
        from_address: Option<String>,
        query_id: QueryId,
        address: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            headers: headers.unwrap_or_default(),
            from_address: from_address
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            query_id,
            address: address.into(),
            method: method.into(),
            args,
            listener_addresses: Vec::new(),
        }
    }

    /// Appends a listener placeholder: the argument becomes this query's
    /// callback address and the address is recorded in
    /// `listener_addresses`. Returns the address.
    pub fn push_listener_arg(&mut self) -> String {
        let address = self.query_id.callback_address();
        self.args.push(Value::String(address.clone()));
        self.listener_addresses.push(address.clone());
        address
    }
}

/// Terminal success for a prior query.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyMessage {
    pub headers: Headers,
    pub from_address: String,
    pub query_id: QueryId,
    pub result: Value,
}

/// Terminal failure for a prior query.
///
/// When the wire form carries more than one result value they are
/// collected, in order, into a single `Value::Array`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub headers: Headers,
    pub to_address: String,
    pub query_id: QueryId,
    pub result: Value,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A decoded JAMP message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Send(SendMessage),
    Query(QueryMessage),
    Reply(ReplyMessage),
    Error(ErrorMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Send(_) => MessageKind::Send,
            Self::Query(_) => MessageKind::Query,
            Self::Reply(_) => MessageKind::Reply,
            Self::Error(_) => MessageKind::Error,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Self::Send(m) => &m.headers,
            Self::Query(m) => &m.headers,
            Self::Reply(m) => &m.headers,
            Self::Error(m) => &m.headers,
        }
    }

    /// The correlation id, for every variant except `Send`.
    pub fn query_id(&self) -> Option<QueryId> {
        match self {
            Self::Send(_) => None,
            Self::Query(m) => Some(m.query_id),
            Self::Reply(m) => Some(m.query_id),
            Self::Error(m) => Some(m.query_id),
        }
    }

    /// Appends this message's wire values to `out`, tag first.
    pub fn write_to(&self, out: &mut Vec<Value>) {
        out.push(Value::from(self.kind().tag()));
        out.push(Value::Object(self.headers().clone()));

        match self {
            Self::Send(m) => {
                out.push(Value::from(m.address.as_str()));
                out.push(Value::from(m.method.as_str()));
                out.extend(m.parameters.iter().cloned());
            }
            Self::Query(m) => {
                out.push(Value::from(m.from_address.as_str()));
                out.push(Value::from(m.query_id.0));
                out.push(Value::from(m.address.as_str()));
                out.push(Value::from(m.method.as_str()));
                out.extend(m.args.iter().cloned());
            }
            Self::Reply(m) => {
                out.push(Value::from(m.from_address.as_str()));
                out.push(Value::from(m.query_id.0));
                out.push(m.result.clone());
            }
            Self::Error(m) => {
                out.push(Value::from(m.to_address.as_str()));
                out.push(Value::from(m.query_id.0));
                out.push(m.result.clone());
            }
        }
    }

    /// Returns this message's wire array.
    pub fn to_wire(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Reads a message from its wire array.
    ///
    /// # Errors
    /// - [`ProtocolError::Malformed`] when the array is shorter than the
    ///   variant's minimum (or empty).
    /// - [`ProtocolError::UnknownType`] when the tag is not recognized.
    /// - [`ProtocolError::InvalidField`] when a positional field has the
    ///   wrong JSON type.
    pub fn from_wire(values: &[Value]) -> Result<Self, ProtocolError> {
        let Some(first) = values.first() else {
            return Err(ProtocolError::Malformed {
                tag: String::new(),
                len: 0,
                min: MessageKind::Send.min_len(),
            });
        };
        let tag = first.as_str().ok_or(ProtocolError::InvalidField {
            field: "type",
            index: 0,
            expected: "string",
        })?;
        let kind = MessageKind::from_tag(tag)
            .ok_or_else(|| ProtocolError::UnknownType(tag.to_string()))?;

        if values.len() < kind.min_len() {
            return Err(ProtocolError::Malformed {
                tag: tag.to_string(),
                len: values.len(),
                min: kind.min_len(),
            });
        }

        let headers = headers_field(values)?;

        let message = match kind {
            MessageKind::Send => Self::Send(SendMessage {
                headers,
                address: string_field(values, 2, "address")?,
                method: string_field(values, 3, "method")?,
                parameters: values[4..].to_vec(),
            }),
            MessageKind::Query => Self::Query(QueryMessage {
                headers,
                // A null from-address gets the same default as a locally
                // built query.
                from_address: match &values[2] {
                    Value::Null => DEFAULT_FROM_ADDRESS.to_string(),
                    _ => string_field(values, 2, "fromAddress")?,
                },
                query_id: query_id_field(values, 3)?,
                address: string_field(values, 4, "address")?,
                method: string_field(values, 5, "method")?,
                args: values[6..].to_vec(),
                listener_addresses: Vec::new(),
            }),
            MessageKind::Reply => Self::Reply(ReplyMessage {
                headers,
                from_address: string_field(values, 2, "fromAddress")?,
                query_id: query_id_field(values, 3)?,
                result: values[4].clone(),
            }),
            MessageKind::Error => Self::Error(ErrorMessage {
                headers,
                to_address: string_field(values, 2, "toAddress")?,
                query_id: query_id_field(values, 3)?,
                result: if values.len() > 5 {
                    Value::Array(values[4..].to_vec())
                } else {
                    values[4].clone()
                },
            }),
        };

        Ok(message)
    }

    /// Encodes this message as JSON text.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decodes a single message from JSON text.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(json).map_err(ProtocolError::Decode)?;
        match value {
            Value::Array(values) => Self::from_wire(&values),
            _ => Err(ProtocolError::NotAnArray),
        }
    }
}

impl From<SendMessage> for Message {
    fn from(m: SendMessage) -> Self {
        Self::Send(m)
    }
}

impl From<QueryMessage> for Message {
    fn from(m: QueryMessage) -> Self {
        Self::Query(m)
    }
}

impl From<ReplyMessage> for Message {
    fn from(m: ReplyMessage) -> Self {
        Self::Reply(m)
    }
}

impl From<ErrorMessage> for Message {
    fn from(m: ErrorMessage) -> Self {
        Self::Error(m)
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<Value>::deserialize(deserializer)?;
        Self::from_wire(&values).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Positional field readers
// ---------------------------------------------------------------------------

fn headers_field(values: &[Value]) -> Result<Headers, ProtocolError> {
    match &values[1] {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Headers::new()),
        _ => Err(ProtocolError::InvalidField {
            field: "headers",
            index: 1,
            expected: "object or null",
        }),
    }
}

fn string_field(
    values: &[Value],
    index: usize,
    field: &'static str,
) -> Result<String, ProtocolError> {
    values[index]
        .as_str()
        .map(str::to_string)
        .ok_or(ProtocolError::InvalidField {
            field,
            index,
            expected: "string",
        })
}

fn query_id_field(values: &[Value], index: usize) -> Result<QueryId, ProtocolError> {
    values[index]
        .as_u64()
        .map(QueryId)
        .ok_or(ProtocolError::InvalidField {
            field: "queryId",
            index,
            expected: "non-negative integer",
        })
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire shapes here are what a JAMP server emits and expects, so
    //! each test pins an exact array rather than a round trip through our
    //! own encoder.

    use serde_json::json;

    use super::*;

    fn wire(value: Value) -> Vec<Value> {
        match value {
            Value::Array(values) => values,
            other => panic!("test fixture must be an array, got {other}"),
        }
    }

    // =====================================================================
    // QueryId
    // =====================================================================

    #[test]
    fn test_query_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&QueryId(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_query_id_callback_address() {
        assert_eq!(QueryId(7).callback_address(), "/callback-7");
    }

    // =====================================================================
    // Encoding
    // =====================================================================

    #[test]
    fn test_send_encodes_parameters_as_tail() {
        let msg = Message::from(SendMessage::new(
            None,
            "/chat",
            "post",
            vec![json!("hi"), json!(3)],
        ));
        assert_eq!(
            Value::Array(msg.to_wire()),
            json!(["send", {}, "/chat", "post", "hi", 3])
        );
    }

    #[test]
    fn test_query_encodes_positional_fields() {
        let msg = Message::from(QueryMessage::new(
            None,
            None,
            QueryId(0),
            "/svc",
            "add",
            vec![json!(2), json!(3)],
        ));
        assert_eq!(
            Value::Array(msg.to_wire()),
            json!(["query", {}, "me", 0, "/svc", "add", 2, 3])
        );
    }

    #[test]
    fn test_query_push_listener_arg_substitutes_callback_address() {
        let mut query =
            QueryMessage::new(None, None, QueryId(9), "/feed", "subscribe", vec![]);
        let address = query.push_listener_arg();

        assert_eq!(address, "/callback-9");
        assert_eq!(query.args, vec![json!("/callback-9")]);
        assert_eq!(query.listener_addresses, vec!["/callback-9".to_string()]);
    }

    #[test]
    fn test_error_encodes_single_result() {
        let msg = Message::Error(ErrorMessage {
            headers: Headers::new(),
            to_address: "/client".into(),
            query_id: QueryId(4),
            result: json!("boom"),
        });
        assert_eq!(
            Value::Array(msg.to_wire()),
            json!(["error", {}, "/client", 4, "boom"])
        );
    }

    // =====================================================================
    // Decoding
    // =====================================================================

    #[test]
    fn test_from_wire_reply() {
        let msg = Message::from_wire(&wire(json!(["reply", {}, "/svc", 0, 5]))).unwrap();
        assert_eq!(
            msg,
            Message::Reply(ReplyMessage {
                headers: Headers::new(),
                from_address: "/svc".into(),
                query_id: QueryId(0),
                result: json!(5),
            })
        );
    }

    #[test]
    fn test_from_wire_error_collects_multiple_results() {
        let msg = Message::from_wire(&wire(json!([
            "error", {}, "/client", 3, "boom", {"code": 7}
        ])))
        .unwrap();
        match msg {
            Message::Error(e) => {
                assert_eq!(e.result, json!(["boom", {"code": 7}]));
                assert_eq!(e.query_id, QueryId(3));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_wire_error_single_result_is_not_wrapped() {
        let msg =
            Message::from_wire(&wire(json!(["error", {}, "/client", 3, "boom"]))).unwrap();
        match msg {
            Message::Error(e) => assert_eq!(e.result, json!("boom")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_wire_send_without_parameters() {
        let msg =
            Message::from_wire(&wire(json!(["send", null, "/callback-1", "tick"]))).unwrap();
        match msg {
            Message::Send(s) => {
                assert!(s.headers.is_empty());
                assert!(s.parameters.is_empty());
                assert_eq!(s.method, "tick");
            }
            other => panic!("expected Send, got {other:?}"),
        }
    }

    #[test]
    fn test_from_wire_query_null_from_address_defaults_to_me() {
        let msg =
            Message::from_wire(&wire(json!(["query", {}, null, 1, "/svc", "ping"]))).unwrap();
        match msg {
            Message::Query(q) => assert_eq!(q.from_address, DEFAULT_FROM_ADDRESS),
            other => panic!("expected Query, got {other:?}"),
        }
    }

    #[test]
    fn test_from_wire_below_minimum_is_malformed_for_every_kind() {
        let cases = [
            json!(["send", {}, "/a"]),
            json!(["query", {}, "me", 1, "/a"]),
            json!(["reply", {}, "/a", 1]),
            json!(["error", {}, "/a", 1]),
            json!([]),
        ];
        for case in cases {
            let err = Message::from_wire(&wire(case.clone())).unwrap_err();
            assert!(err.is_malformed(), "{case} gave {err:?}");
        }
    }

    #[test]
    fn test_from_wire_unknown_tag() {
        let err = Message::from_wire(&wire(json!(["ping", {}, "/a", "b"]))).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "ping"));
    }

    #[test]
    fn test_from_wire_non_numeric_query_id_is_invalid_field() {
        let err =
            Message::from_wire(&wire(json!(["reply", {}, "/a", "x", 1]))).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidField { field: "queryId", index: 3, .. }
        ));
    }

    #[test]
    fn test_from_json_rejects_non_array() {
        let err = Message::from_json(r#"{"type": "reply"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::NotAnArray));
    }

    // =====================================================================
    // Round trip
    // =====================================================================

    #[test]
    fn test_query_round_trips_field_for_field() {
        let mut headers = Headers::new();
        headers.insert("trace".into(), json!("abc"));
        let original = Message::from(QueryMessage::new(
            Some(headers),
            Some("/client/7".into()),
            QueryId(12),
            "/svc",
            "put",
            vec![json!({"k": [1, 2]}), json!(null), json!(false)],
        ));

        let json = original.to_json().unwrap();
        let decoded = Message::from_json(&json).unwrap();
        assert_eq!(decoded, original);
    }
}
