//! The per-connection dispatch loop
//!
//! One loop task exclusively owns each live persistent connection: it is
//! the only writer, the only reader, and the only code that touches the
//! outstanding-call table and the subscription registry. Callers talk to
//! it through an op queue; the transport talks to it through a reader
//! task. Merging both into a single `select!` serializes every mutation
//! onto one task, so the shared tables need no locks at all.
//!
//! # Inbound routing
//!
//! - A response completes its waiter exactly once and removes the entry.
//!   Responses with no waiter are dropped quietly; they usually answer a
//!   call that was cancelled a moment earlier.
//! - A batch response array is matched to its pending batch as a unit.
//! - A subscription push is a non-blocking enqueue into that
//!   subscription's bounded buffer. A full buffer means the consumer lost
//!   the race for good: the subscription is closed with an overflow error
//!   and dropped from the registry, while the connection and every other
//!   subscription keep working.
//! - Malformed payloads are logged and dropped; the connection stays up.
//!
//! # Teardown
//!
//! On read failure, write failure, or client close, every outstanding
//! call, pending batch, and active subscription observes one definitive
//! error, and never more than one.

use muxrpc_core::{codec, Error, Id, Message, Notification, Request, Response, Result,
    SubscriptionPayload};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::transport::{ReadHalf, StreamTransport, WriteHalf};

/// Capacity of the op queue between the façade and the loop
const OPS_QUEUE: usize = 64;

/// One unit of work submitted by the call façade
pub(crate) enum Op {
    /// Send a request and register its waiter
    Call {
        payload: String,
        id: Id,
        resp: oneshot::Sender<Result<Response>>,
        /// Present when this call is a subscribe: installed in the
        /// registry before the waiter resumes, so an early push cannot
        /// slip through unrouted.
        sub: Option<PendingSub>,
    },
    /// Send a request with no id; resolves once the write is done
    Notify {
        payload: String,
        done: oneshot::Sender<Result<()>>,
    },
    /// Send a batch; the response array is delivered as a unit
    Batch {
        payload: String,
        ids: Vec<Id>,
        resp: oneshot::Sender<Result<Vec<Response>>>,
    },
    /// Drop the outstanding-call entry for a cancelled call, if it is
    /// still there. Whoever ran first, response or cancellation, wins.
    Forget { id: Id },
    /// Close a subscription cleanly and tell the server, best-effort
    Unsubscribe { sub_id: String },
}

/// A subscription waiting for its subscribe call to succeed
pub(crate) struct PendingSub {
    pub namespace: String,
    pub sink: mpsc::Sender<Value>,
    pub err_tx: oneshot::Sender<Option<Error>>,
    pub buffer: usize,
}

/// Waiter for one outstanding request id
enum CallWaiter {
    /// A façade call blocked on this id
    Respond {
        tx: oneshot::Sender<Result<Response>>,
        sub: Option<PendingSub>,
    },
    /// An internal best-effort call; the response is consumed silently
    Discard,
}

/// A live subscription, owned by the loop
struct ActiveSub {
    namespace: String,
    buf_tx: mpsc::Sender<Value>,
    err_tx: oneshot::Sender<Option<Error>>,
    quit: CancellationToken,
}

/// A batch waiting for its response array
struct PendingBatch {
    keys: HashSet<String>,
    tx: oneshot::Sender<Result<Vec<Response>>>,
}

enum Event {
    Closed,
    Op(Option<Op>),
    Inbound(Option<Result<String>>),
}

/// Start a dispatch loop on a fresh connection and hand back its op queue
pub(crate) fn spawn(
    transport: StreamTransport,
    close: CancellationToken,
    next_id: Arc<AtomicU64>,
) -> mpsc::Sender<Op> {
    let (ops_tx, ops_rx) = mpsc::channel(OPS_QUEUE);
    let (in_tx, in_rx) = mpsc::channel(OPS_QUEUE);
    let (writer, reader) = transport.split();

    let conn = CancellationToken::new();
    tokio::spawn(read_task(reader, in_tx, conn.clone()));
    tokio::spawn(
        Dispatch {
            writer,
            ops: ops_rx,
            inbound: in_rx,
            close,
            conn,
            next_id,
            calls: HashMap::new(),
            batches: Vec::new(),
            subs: HashMap::new(),
        }
        .run(),
    );

    ops_tx
}

/// Drains the read half into the loop until the connection dies
async fn read_task(
    mut reader: ReadHalf,
    tx: mpsc::Sender<Result<String>>,
    conn: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = conn.cancelled() => break,
            msg = reader.next() => {
                let failed = msg.is_err();
                if tx.send(msg).await.is_err() || failed {
                    break;
                }
            }
        }
    }
}

struct Dispatch {
    writer: WriteHalf,
    ops: mpsc::Receiver<Op>,
    inbound: mpsc::Receiver<Result<String>>,
    /// Client-wide close signal
    close: CancellationToken,
    /// Connection-local token, cancelled on teardown to stop the reader
    conn: CancellationToken,
    next_id: Arc<AtomicU64>,
    calls: HashMap<String, CallWaiter>,
    batches: Vec<PendingBatch>,
    subs: HashMap<String, ActiveSub>,
}

impl Dispatch {
    async fn run(mut self) {
        let close_err = loop {
            let event = tokio::select! {
                _ = self.close.cancelled() => Event::Closed,
                op = self.ops.recv() => Event::Op(op),
                msg = self.inbound.recv() => Event::Inbound(msg),
            };
            match event {
                Event::Closed => break Error::ClientClosed,
                Event::Op(None) => break Error::ClientClosed,
                Event::Op(Some(op)) => {
                    if let Err(e) = self.handle_op(op).await {
                        break e;
                    }
                }
                Event::Inbound(Some(Ok(text))) => self.handle_inbound(&text),
                Event::Inbound(Some(Err(e))) => break e,
                Event::Inbound(None) => break Error::ConnectionClosed,
            }
        };
        self.teardown(close_err).await;
    }

    async fn handle_op(&mut self, op: Op) -> Result<()> {
        match op {
            Op::Call {
                payload,
                id,
                resp,
                sub,
            } => {
                if let Err(e) = self.writer.send(payload).await {
                    let _ = resp.send(Err(e));
                    return Err(Error::ConnectionClosed);
                }
                self.calls
                    .insert(id.key(), CallWaiter::Respond { tx: resp, sub });
                Ok(())
            }
            Op::Notify { payload, done } => {
                if let Err(e) = self.writer.send(payload).await {
                    let _ = done.send(Err(e));
                    return Err(Error::ConnectionClosed);
                }
                let _ = done.send(Ok(()));
                Ok(())
            }
            Op::Batch { payload, ids, resp } => {
                if let Err(e) = self.writer.send(payload).await {
                    let _ = resp.send(Err(e));
                    return Err(Error::ConnectionClosed);
                }
                self.batches.push(PendingBatch {
                    keys: ids.iter().map(Id::key).collect(),
                    tx: resp,
                });
                Ok(())
            }
            Op::Forget { id } => {
                // The response may have won the race; absent is fine.
                self.calls.remove(&id.key());
                Ok(())
            }
            Op::Unsubscribe { sub_id } => {
                match self.subs.remove(&sub_id) {
                    Some(sub) => {
                        sub.quit.cancel();
                        let _ = sub.err_tx.send(None);
                        self.server_unsubscribe(&sub.namespace, &sub_id).await
                    }
                    // Second unsubscribe, or the subscription already
                    // ended; nothing left to do.
                    None => Ok(()),
                }
            }
        }
    }

    /// Tell the server a subscription is gone. Best-effort: a dead
    /// connection cleans up server state on its own.
    async fn server_unsubscribe(&mut self, namespace: &str, sub_id: &str) -> Result<()> {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::SeqCst) as i64);
        let request = Request::new(
            format!("{}_unsubscribe", namespace),
            Some(Value::Array(vec![Value::String(sub_id.to_string())])),
            id.clone(),
        );
        let payload = codec::encode(&request)?;
        if self.writer.send(payload).await.is_err() {
            return Err(Error::ConnectionClosed);
        }
        self.calls.insert(id.key(), CallWaiter::Discard);
        Ok(())
    }

    fn handle_inbound(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(Message::Response(resp)) => self.handle_response(resp),
            Ok(Message::Notification(n)) => self.handle_notification(n),
            Ok(Message::Batch(values)) => self.handle_batch(values),
            Ok(Message::Request(req)) => {
                tracing::warn!(method = %req.method, "dropping unexpected request from server");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed message");
            }
        }
    }

    fn handle_response(&mut self, resp: Response) {
        let key = resp.id.key();
        if let Some(waiter) = self.calls.remove(&key) {
            match waiter {
                CallWaiter::Respond { tx, sub } => {
                    let installed = sub.and_then(|p| self.install_subscription(p, &resp));
                    if tx.send(Ok(resp)).is_err() {
                        // The caller gave up (cancelled) in the same
                        // instant; undo the install so the registry only
                        // holds subscriptions somebody owns.
                        if let Some(sub_id) = installed {
                            if let Some(sub) = self.subs.remove(&sub_id) {
                                sub.quit.cancel();
                            }
                        }
                    }
                }
                CallWaiter::Discard => {}
            }
            return;
        }

        // A lone response can also stand in for a whole rejected batch.
        if let Some(pos) = self.batches.iter().position(|b| b.keys.contains(&key)) {
            let batch = self.batches.swap_remove(pos);
            let _ = batch.tx.send(Ok(vec![resp]));
            return;
        }

        tracing::debug!(id = %resp.id, "dropping unsolicited response");
    }

    /// Register a freshly confirmed subscription under its server-issued
    /// id and start the forwarder that feeds the caller's sink.
    fn install_subscription(&mut self, pending: PendingSub, resp: &Response) -> Option<String> {
        let sub_id = match (&resp.error, &resp.result) {
            (None, Some(Value::String(s))) => s.clone(),
            // The subscribe call failed; the façade surfaces that error
            // and no subscription ever existed.
            _ => return None,
        };

        let (buf_tx, buf_rx) = mpsc::channel(pending.buffer.max(1));
        let quit = CancellationToken::new();
        tokio::spawn(forward(buf_rx, pending.sink, quit.clone()));

        self.subs.insert(
            sub_id.clone(),
            ActiveSub {
                namespace: pending.namespace,
                buf_tx,
                err_tx: pending.err_tx,
                quit,
            },
        );
        Some(sub_id)
    }

    fn handle_notification(&mut self, n: Notification) {
        if !n.method.ends_with("_subscription") {
            tracing::debug!(method = %n.method, "dropping unroutable notification");
            return;
        }
        let payload: SubscriptionPayload =
            match serde_json::from_value(n.params.unwrap_or(Value::Null)) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed subscription push");
                    return;
                }
            };

        let full = match self.subs.get(&payload.subscription) {
            None => {
                // The server may still be sending for a subscription we
                // already dropped; that is its problem, not ours.
                tracing::debug!(subscription = %payload.subscription, "push for unknown subscription");
                return;
            }
            Some(sub) => match sub.buf_tx.try_send(payload.result) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            },
        };

        let sub_id = payload.subscription;
        if let Some(sub) = self.subs.remove(&sub_id) {
            sub.quit.cancel();
            if full {
                tracing::warn!(subscription = %sub_id, "subscription buffer overflow, closing");
                let _ = sub.err_tx.send(Some(Error::SubscriptionQueueOverflow));
            } else {
                // Consumer dropped its receiver: an implicit unsubscribe.
                let _ = sub.err_tx.send(None);
            }
        }
    }

    fn handle_batch(&mut self, values: Vec<Value>) {
        let mut responses = Vec::with_capacity(values.len());
        for value in values {
            match codec::decode_batch_response(value) {
                Ok(resp) => responses.push(resp),
                Err(e) => tracing::warn!(error = %e, "dropping malformed batch element"),
            }
        }

        let keys: Vec<String> = responses.iter().map(|r| r.id.key()).collect();
        match self
            .batches
            .iter()
            .position(|b| keys.iter().any(|k| b.keys.contains(k)))
        {
            Some(pos) => {
                let batch = self.batches.swap_remove(pos);
                let _ = batch.tx.send(Ok(responses));
            }
            None => tracing::debug!("dropping unsolicited batch response"),
        }
    }

    /// Fail everything still in flight with one definitive error each,
    /// then shut the transport down.
    async fn teardown(mut self, err: Error) {
        tracing::debug!(error = %err, "dispatch loop closing");
        self.ops.close();

        for (_, waiter) in self.calls.drain() {
            if let CallWaiter::Respond { tx, .. } = waiter {
                let _ = tx.send(Err(err.clone()));
            }
        }
        for batch in self.batches.drain(..) {
            let _ = batch.tx.send(Err(err.clone()));
        }
        for (_, sub) in self.subs.drain() {
            sub.quit.cancel();
            let _ = sub.err_tx.send(Some(err.clone()));
        }

        self.writer.close().await;
        self.conn.cancel();
    }
}

/// Moves buffered items to the caller's sink in delivery order
async fn forward(
    mut buf_rx: mpsc::Receiver<Value>,
    sink: mpsc::Sender<Value>,
    quit: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = quit.cancelled() => break,
            item = buf_rx.recv() => match item {
                Some(value) => {
                    tokio::select! {
                        _ = quit.cancelled() => break,
                        sent = sink.send(value) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                None => break,
            }
        }
    }
}
