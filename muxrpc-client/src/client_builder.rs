//! Client builder
//!
//! The builder configures a client before its first connection: the
//! endpoint (a URL or an in-process server handle), the subscription
//! delivery buffer, and the redial backoff policy for persistent
//! transports.
//!
//! # Examples
//!
//! ```rust,no_run
//! use muxrpc_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> muxrpc_core::Result<()> {
//! let client = ClientBuilder::new("ws://127.0.0.1:8546")
//!     .redial_backoff(ExponentialBackoff::new(
//!         Duration::from_millis(100),
//!         Duration::from_secs(30),
//!     ))
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use muxrpc_core::Result;
use std::sync::Arc;

use crate::client::Client;
use crate::reconnect::RedialBackoff;
use crate::subscription::DEFAULT_SUBSCRIPTION_BUFFER;
use crate::transport::{Endpoint, InProcService};

enum Target {
    Url(String),
    InProc(Arc<dyn InProcService>),
}

/// Configures and connects a [`Client`]
pub struct ClientBuilder {
    target: Target,
    sub_buffer: usize,
    redial: Option<Box<dyn RedialBackoff>>,
}

impl ClientBuilder {
    /// Build a client for a URL endpoint; see [`Endpoint::parse`] for
    /// the accepted forms.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            target: Target::Url(url.into()),
            sub_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            redial: None,
        }
    }

    /// Build a client attached to an in-process server handle
    pub fn in_proc(service: Arc<dyn InProcService>) -> Self {
        Self {
            target: Target::InProc(service),
            sub_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            redial: None,
        }
    }

    /// Delivery buffer capacity for each subscription.
    ///
    /// When a consumer lets this many items pile up, the subscription is
    /// closed with an overflow error rather than stalling the connection.
    pub fn subscription_buffer(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "subscription buffer capacity must be nonzero");
        self.sub_buffer = capacity;
        self
    }

    /// Retry failed redials with the given backoff policy.
    ///
    /// Without a policy, one dial attempt is made per failure event and
    /// its error is surfaced to the waiting callers.
    pub fn redial_backoff(mut self, policy: impl RedialBackoff + 'static) -> Self {
        self.redial = Some(Box::new(policy));
        self
    }

    /// Connect and start the dispatch loop (for persistent transports)
    pub async fn connect(self) -> Result<Client> {
        let endpoint = match self.target {
            Target::Url(url) => Endpoint::parse(&url)?,
            Target::InProc(service) => Endpoint::InProc(service),
        };
        match endpoint {
            Endpoint::Http(url) => Ok(Client::from_http_parts(url, self.sub_buffer)),
            endpoint => {
                tracing::debug!(endpoint = %endpoint, "dialing");
                let transport = endpoint.dial().await?;
                Ok(Client::from_stream_parts(
                    endpoint,
                    transport,
                    self.sub_buffer,
                    self.redial,
                ))
            }
        }
    }
}
