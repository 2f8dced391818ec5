//! Batch codec: turns ordered batches of messages into bytes and back.
//!
//! Transports move *batches*, an outer array of message arrays:
//!
//! ```text
//! [["reply", {}, "/svc", 0, 5], ["send", {}, "/callback-1", "tick"]]
//! ```
//!
//! Decoding is two-level. A batch that is not JSON, or not an
//! array, fails as a whole. Inside a valid batch each message decodes
//! independently, so one malformed entry does not take its neighbours
//! down with it.
//!
//! Socket peers write one bare message per frame rather than a batch. An
//! outer array whose first element is a JAMP type tag is therefore read as
//! a batch of one. Any other leading value is just a bad batch entry.

use serde_json::Value;

use crate::{Message, MessageKind, ProtocolError};

/// Encodes and decodes batches of JAMP messages.
///
/// `Send + Sync + 'static` so a codec can be shared with transport tasks
/// running on any Tokio worker thread.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a batch, preserving order.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode_batch(&self, batch: &[Message]) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes a batch.
    ///
    /// The outer `Result` fails only when `data` is not a batch at all.
    /// Each inner `Result` is one message, in wire order.
    fn decode_batch(
        &self,
        data: &[u8],
    ) -> Result<Vec<Result<Message, ProtocolError>>, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// The JSON [`Codec`] JAMP servers speak.
///
/// ```rust
/// use jamp_protocol::{Codec, JsonCodec, Message, QueryId, QueryMessage};
///
/// let codec = JsonCodec;
/// let query = Message::from(QueryMessage::new(
///     None, None, QueryId(0), "/svc", "add", vec![2i64.into(), 3i64.into()],
/// ));
///
/// let bytes = codec.encode_batch(&[query.clone()]).unwrap();
/// assert_eq!(bytes, br#"[["query",{},"me",0,"/svc","add",2,3]]"#);
///
/// let decoded = codec.decode_batch(&bytes).unwrap();
/// assert_eq!(decoded.into_iter().next().unwrap().unwrap(), query);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_batch(&self, batch: &[Message]) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(batch).map_err(ProtocolError::Encode)
    }

    fn decode_batch(
        &self,
        data: &[u8],
    ) -> Result<Vec<Result<Message, ProtocolError>>, ProtocolError> {
        let outer: Value =
            serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
        let Value::Array(entries) = outer else {
            return Err(ProtocolError::NotAnArray);
        };

        let bare = match entries.first() {
            Some(Value::String(tag)) => MessageKind::from_tag(tag).is_some(),
            _ => false,
        };
        if bare {
            return Ok(vec![Message::from_wire(&entries)]);
        }

        Ok(entries
            .into_iter()
            .map(|entry| match entry {
                Value::Array(values) => Message::from_wire(&values),
                _ => Err(ProtocolError::NotAnArray),
            })
            .collect())
    }
}
