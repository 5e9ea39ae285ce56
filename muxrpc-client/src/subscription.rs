//! Client-side subscription handles
//!
//! A subscription is created by a successful subscribe call and lives
//! until it is unsubscribed, its consumer falls too far behind, or its
//! connection dies. The dispatch loop delivers pushes into a bounded
//! buffer; a forwarder task drains that buffer into the sink the caller
//! provided, preserving send order. Backpressure is resolved by failure,
//! not by blocking: a full buffer closes the subscription with an
//! overflow error so one slow consumer can never stall the connection.

use muxrpc_core::Error;
use tokio::sync::{mpsc, oneshot};

use crate::dispatch::Op;

/// Default capacity of a subscription's delivery buffer
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 8192;

/// Handle to one live server-push subscription
///
/// Delivered items arrive on the sink passed to `Client::subscribe`. The
/// handle itself is for lifecycle only: ending the subscription and
/// learning why it ended.
pub struct Subscription {
    sub_id: String,
    namespace: String,
    ops: mpsc::Sender<Op>,
    err_rx: oneshot::Receiver<Option<Error>>,
}

impl Subscription {
    pub(crate) fn new(
        sub_id: String,
        namespace: String,
        ops: mpsc::Sender<Op>,
        err_rx: oneshot::Receiver<Option<Error>>,
    ) -> Self {
        Self {
            sub_id,
            namespace,
            ops,
            err_rx,
        }
    }

    /// The server-issued subscription id
    pub fn id(&self) -> &str {
        &self.sub_id
    }

    /// The namespace this subscription was created under
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// End the subscription.
    ///
    /// Removes it from the registry, resolves [`err`](Self::err) with
    /// `None`, and tells the server best-effort; a connection that is
    /// already gone needs no telling. Safe to call more than once.
    pub async fn unsubscribe(&self) {
        let _ = self
            .ops
            .send(Op::Unsubscribe {
                sub_id: self.sub_id.clone(),
            })
            .await;
    }

    /// Wait for the subscription to end and learn why.
    ///
    /// Resolves exactly once: `None` after a clean unsubscribe, or the
    /// error that killed it (buffer overflow, connection loss, client
    /// close). No further items are delivered once this has resolved.
    pub async fn err(&mut self) -> Option<Error> {
        match (&mut self.err_rx).await {
            Ok(outcome) => outcome,
            // The dispatch loop vanished without closing us; only client
            // teardown can do that.
            Err(_) => Some(Error::ClientClosed),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.sub_id)
            .field("namespace", &self.namespace)
            .finish()
    }
}
