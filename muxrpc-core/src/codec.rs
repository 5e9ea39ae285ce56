//! Message serialization and deserialization
//!
//! The codec is pure: bytes in, message out, no knowledge of transports or
//! concurrency. Decoding a malformed payload yields [`Error::Parse`],
//! never a panic, because inbound data is peer-controlled.
//!
//! # Batches
//!
//! A JSON array decodes to [`Message::Batch`] with its elements kept as
//! raw values. Elements are parsed one by one at the call site, so a batch
//! mixing well-formed responses with garbage still yields the good ones.
//! Encoding a batch serializes the caller's `Vec` as-is, preserving
//! element order.

use crate::error::{Error, Result};
use crate::types::{Message, Request, Response};
use serde::Serialize;

/// Encode any protocol message to its wire form
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode an ordered batch of requests as one JSON array
pub fn encode_batch(reqs: &[Request]) -> Result<String> {
    serde_json::to_string(reqs).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode one wire payload into a protocol message
///
/// Arrays become [`Message::Batch`]; everything else is matched against
/// the single-message variants. Empty batches are rejected, as JSON-RPC
/// 2.0 requires.
pub fn decode(data: &str) -> Result<Message> {
    let value: serde_json::Value =
        serde_json::from_str(data).map_err(|e| Error::Parse(e.to_string()))?;

    if value.is_array() {
        let elements: Vec<serde_json::Value> =
            serde_json::from_value(value).map_err(|e| Error::Parse(e.to_string()))?;
        if elements.is_empty() {
            return Err(Error::Parse("empty batch".to_string()));
        }
        return Ok(Message::Batch(elements));
    }

    serde_json::from_value(value)
        .map_err(|e| Error::Parse(format!("not a valid protocol message: {}", e)))
}

/// Parse one raw batch element as a response
///
/// Returns `Error::Parse` for elements that are not responses; callers
/// skip those with a logged anomaly rather than failing the whole batch.
pub fn decode_batch_response(value: serde_json::Value) -> Result<Response> {
    serde_json::from_value(value).map_err(|e| Error::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Id, Notification};
    use serde_json::json;

    #[test]
    fn roundtrip_request() {
        let req = Request::new("test_echo", Some(json!(["hello", 10])), Id::Number(3));
        let text = encode(&req).unwrap();
        match decode(&text).unwrap() {
            Message::Request(r) => {
                assert_eq!(r.method, "test_echo");
                assert_eq!(r.params, Some(json!(["hello", 10])));
                assert_eq!(r.id, Id::Number(3));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_response() {
        let resp = Response::success(json!({"ok": true}), Id::Number(3));
        let text = encode(&resp).unwrap();
        match decode(&text).unwrap() {
            Message::Response(r) => {
                assert_eq!(r.result, Some(json!({"ok": true})));
                assert_eq!(r.id, Id::Number(3));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn roundtrip_notification() {
        let n = Notification::new("chain_subscription", Some(json!({"subscription": "0xab", "result": 1})));
        let text = encode(&n).unwrap();
        assert!(decode(&text).unwrap().is_notification());
    }

    #[test]
    fn malformed_input_is_a_parse_error_not_a_panic() {
        for bad in ["", "{", "[1,", "\"trailing", "{\"jsonrpc\":2}"] {
            match decode(bad) {
                Err(Error::Parse(_)) => {}
                other => panic!("expected parse error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn empty_batch_rejected() {
        assert!(matches!(decode("[]"), Err(Error::Parse(_))));
    }

    #[test]
    fn batch_keeps_order_and_tolerates_bad_elements() {
        let text = r#"[{"jsonrpc":"2.0","result":1,"id":1},42,{"jsonrpc":"2.0","result":3,"id":3}]"#;
        let elements = match decode(text).unwrap() {
            Message::Batch(v) => v,
            other => panic!("expected batch, got {:?}", other),
        };
        assert_eq!(elements.len(), 3);

        let first = decode_batch_response(elements[0].clone()).unwrap();
        assert_eq!(first.id, Id::Number(1));
        assert!(decode_batch_response(elements[1].clone()).is_err());
        let third = decode_batch_response(elements[2].clone()).unwrap();
        assert_eq!(third.id, Id::Number(3));
    }

    #[test]
    fn encode_batch_preserves_element_order() {
        let reqs = vec![
            Request::new("a", None, Id::Number(1)),
            Request::new("b", None, Id::Number(2)),
            Request::new("c", None, Id::Number(3)),
        ];
        let text = encode_batch(&reqs).unwrap();
        let a = text.find("\"a\"").unwrap();
        let b = text.find("\"b\"").unwrap();
        let c = text.find("\"c\"").unwrap();
        assert!(a < b && b < c);
    }
}
