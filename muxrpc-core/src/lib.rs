//! Core protocol types and codec for muxrpc
//!
//! This crate provides the foundation the client engine is built on:
//!
//! - **Types**: request, response, notification, and batch message shapes
//! - **Codec**: serialization and deserialization of wire payloads
//! - **Errors**: the wire error object and the client error taxonomy
//!
//! # Architecture
//!
//! The crate is transport-agnostic on purpose: it knows how to turn
//! messages into bytes and back, and nothing about sockets, HTTP bodies,
//! or WebSocket frames. The `muxrpc-client` crate layers the transports,
//! the dispatch loop, and the call façade on top of this foundation.
//!
//! # Example
//!
//! ```rust
//! use muxrpc_core::{codec, Id, Message, Request};
//!
//! let request = Request::new("chain_head", None, Id::Number(1));
//! let wire = codec::encode(&request).unwrap();
//! assert!(matches!(codec::decode(&wire).unwrap(), Message::Request(_)));
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use error::{Error, ErrorObject, Result};
pub use types::{Id, Message, Notification, Request, Response, SubscriptionPayload};
