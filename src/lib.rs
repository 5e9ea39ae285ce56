//! muxrpc - multi-transport JSON-RPC client engine
//!
//! This is the convenience crate that re-exports the muxrpc sub-crates.
//! Use it when you want a single dependency for the whole client stack.
//!
//! # Architecture
//!
//! - **muxrpc-core**: protocol types, codec, error taxonomy
//! - **muxrpc-client**: the client engine, transports, dispatch loop,
//!   subscriptions, and reconnection
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use muxrpc::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::dial("ws://127.0.0.1:8546").await?;
//!
//!     let balance: String = client
//!         .call("state_getBalance", ("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed",))
//!         .await?;
//!     println!("balance: {}", balance);
//!
//!     Ok(())
//! }
//! ```

pub use muxrpc_client as client;
pub use muxrpc_core as core;

// The types almost every user touches, importable straight off the root
pub use muxrpc_client::{
    BatchElem, CancellationToken, Client, ClientBuilder, InProcService, ServerPush, Subscription,
};
pub use muxrpc_core::{Error, ErrorObject, Result};
