//! Error types for muxrpc
//!
//! Two layers of errors live here:
//!
//! - **`Error`**: everything a client call can fail with, from transport
//!   loss to caller-triggered cancellation (uses thiserror)
//! - **`ErrorObject`**: the wire-format error a server embeds in a
//!   response, as defined by the JSON-RPC 2.0 specification
//!
//! # Taxonomy
//!
//! The engine distinguishes failure classes because each has a different
//! blast radius: a remote error affects one call, a subscription overflow
//! affects one subscription, a connection loss affects everything in
//! flight on that connection. Nothing is retried automatically except the
//! connection itself on persistent transports.
//!
//! # Standard error codes
//!
//! - `-32700`: Parse error
//! - `-32600`: Invalid request
//! - `-32601`: Method not found
//! - `-32602`: Invalid params
//! - `-32603`: Internal error
//! - `-32000..=-32099`: implementation-defined server errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout the muxrpc crates
pub type Result<T> = std::result::Result<T, Error>;

/// Everything a client operation can fail with
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A well-formed error response from the server.
    ///
    /// Surfaced to the one caller that owns the request, never retried.
    /// Code, message, and any auxiliary data are available through the
    /// [`ErrorObject`] accessors.
    #[error("RPC error: {0}")]
    Rpc(#[from] ErrorObject),

    /// Local serialization or deserialization of caller types failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An inbound payload was not a valid protocol message.
    ///
    /// Logged and dropped; the connection stays up unless the stream
    /// framing itself is broken.
    #[error("invalid protocol message: {0}")]
    Parse(String),

    /// Dial, read, or write failure at the transport level
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection serving this request was lost.
    ///
    /// Delivered to every call and subscription that was in flight when a
    /// persistent connection went down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The client was explicitly closed
    #[error("client is closed")]
    ClientClosed,

    /// The caller's cancellation token fired before the response arrived
    #[error("call cancelled")]
    Cancelled,

    /// A subscription consumer fell too far behind and its delivery
    /// buffer filled up. Terminates only that subscription.
    #[error("subscription queue overflow")]
    SubscriptionQueueOverflow,

    /// Subscriptions require a transport with server push; HTTP has none
    #[error("notifications not supported by this transport")]
    NotificationsUnsupported,

    /// A batch response arrived without an entry for this element
    #[error("no response received for batch element")]
    MissingBatchResponse,
}

/// JSON-RPC error object as it appears on the wire
///
/// Embedded in the `error` field of a response. `data` is optional,
/// opaque, and passed through to the caller untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code
    pub code: i64,
    /// Short human-readable description
    pub message: String,
    /// Optional auxiliary information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Numeric error code
    pub fn code(&self) -> i64 {
        self.code
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Auxiliary error data, if the server attached any
    pub fn data(&self) -> Option<&serde_json::Value> {
        self.data.as_ref()
    }

    /// Parse error (-32700): the payload was not valid JSON
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    /// Invalid request (-32600)
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            -32601,
            format!(
                "the method {} does not exist/is not available",
                method.into()
            ),
        )
    }

    /// Invalid params (-32602)
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    /// Internal error (-32603)
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }
}

impl std::fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorObject {}
