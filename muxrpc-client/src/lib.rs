//! Multi-transport JSON-RPC client engine
//!
//! One client type that multiplexes any number of concurrent calls,
//! fire-and-forget notifications, and long-lived server-push
//! subscriptions over a single logical endpoint. The endpoint's form
//! picks the transport:
//!
//! - `ws://` / `wss://` — persistent duplex WebSocket
//! - `http://` / `https://` — request-per-call HTTP (no subscriptions)
//! - `tcp://host:port` — persistent newline-delimited stream
//! - a filesystem path — the same stream over a Unix socket
//! - [`Client::in_proc`] — direct dispatch into an in-process server
//!
//! # Quick start
//!
//! ```rust,no_run
//! use muxrpc_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> muxrpc_core::Result<()> {
//!     let client = Client::dial("ws://127.0.0.1:8546").await?;
//!
//!     let head: serde_json::Value = client.call("chain_head", ()).await?;
//!     println!("head: {}", head);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! # Subscriptions
//!
//! ```rust,no_run
//! use muxrpc_client::Client;
//! use tokio::sync::mpsc;
//!
//! # async fn example(client: &Client) -> muxrpc_core::Result<()> {
//! let (tx, mut rx) = mpsc::channel(64);
//! let mut sub = client.subscribe("chain", tx, ("newHeads",)).await?;
//!
//! while let Some(head) = rx.recv().await {
//!     println!("new head: {}", head);
//! }
//! // delivery ended; find out why
//! match sub.err().await {
//!     None => println!("unsubscribed"),
//!     Some(e) => println!("subscription failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod client_builder;
mod dispatch;
mod http;
mod reconnect;
mod subscription;
mod transport;

pub use batch::BatchElem;
pub use client::Client;
pub use client_builder::ClientBuilder;
pub use reconnect::{ExponentialBackoff, FixedDelay, RedialBackoff};
pub use subscription::{Subscription, DEFAULT_SUBSCRIPTION_BUFFER};
pub use transport::{Endpoint, InProcService, ServerPush};

// The cancellation primitive is part of the public call surface.
pub use tokio_util::sync::CancellationToken;

pub use muxrpc_core::{Error, ErrorObject, Result};
