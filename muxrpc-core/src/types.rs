//! Protocol message types
//!
//! This module defines the JSON-RPC 2.0 message shapes the client engine
//! speaks on every transport: requests, fire-and-forget notifications,
//! responses, and batches.
//!
//! # Message Types
//!
//! 1. **Request**: a call that expects a response, correlated by `id`
//! 2. **Notification**: a message with no `id` and no response; the server
//!    uses the same shape for subscription pushes
//! 3. **Response**: the result of a request, success or error
//!
//! # Correlation IDs
//!
//! Request ids are client-generated and unique among the requests currently
//! outstanding on a connection. The engine issues monotonically increasing
//! numeric ids from a per-client counter, but the wire format also admits
//! string ids from other implementations, so both are representable.

use crate::error::ErrorObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC request id
///
/// Serialized untagged, so it appears on the wire as a bare number, string,
/// or null. `Hash`/`Eq` are derived because ids key the outstanding-call
/// table; [`Id::key`] gives a collision-free string form for that table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Numeric identifier, what this client generates
    Number(i64),
    /// String identifier, accepted from peers that use them
    String(String),
    /// Null identifier; legal on the wire but impossible to correlate
    Null,
}

impl Id {
    /// Stable string form usable as a map key.
    ///
    /// Numbers and strings are prefixed so `Id::Number(1)` and
    /// `Id::String("1")` never collide.
    pub fn key(&self) -> String {
        match self {
            Id::Number(n) => format!("n:{}", n),
            Id::String(s) => format!("s:{}", s),
            Id::Null => "null".to_string(),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(n as i64)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

/// JSON-RPC request message
///
/// `params` holds the positional argument array built by the call façade;
/// it is omitted from the wire entirely when there are no arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version, always "2.0"
    pub jsonrpc: String,
    /// Remote method name
    pub method: String,
    /// Positional arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation id for the response
    pub id: Id,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC notification message
///
/// A request without an id: the sender expects no response, ever. The
/// client sends these for fire-and-forget calls; the server sends them for
/// subscription pushes, using a `<namespace>_subscription` method name and
/// a [`SubscriptionPayload`] in `params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Protocol version, always "2.0"
    pub jsonrpc: String,
    /// Method or event name
    pub method: String,
    /// Arguments or event payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response message
///
/// Exactly one of `result` and `error` is present; the factory methods
/// enforce that by construction. `id` matches the originating request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version, always "2.0"
    pub jsonrpc: String,
    /// Successful result, mutually exclusive with `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object, mutually exclusive with `result`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    /// Correlation id from the request, `Id::Null` if it could not be read
    pub id: Id,
}

impl Response {
    pub fn success(result: Value, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(error: ErrorObject, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Any inbound or outbound protocol message
///
/// Untagged so the enum matches the wire format directly. Batches keep
/// their elements as raw values: each element is parsed separately, so one
/// malformed element does not poison its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A request (expects a response)
    Request(Request),
    /// A notification (no response expected)
    Notification(Notification),
    /// A response to an earlier request
    Response(Response),
    /// An ordered batch of messages, elements parsed individually
    Batch(Vec<Value>),
}

impl Message {
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Request(_))
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Message::Notification(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Message::Response(_))
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Message::Batch(_))
    }
}

/// Parameter envelope of a subscription push
///
/// Every push notification carries the server-issued subscription id and
/// one delivered item. The dispatch loop routes on `subscription`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    /// Server-issued subscription id
    pub subscription: String,
    /// One delivered item
    pub result: Value,
}
