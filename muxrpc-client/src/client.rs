//! The client façade
//!
//! `Client` is the public entry point: synchronous calls, batched calls,
//! fire-and-forget notifications, and server-push subscriptions, all
//! multiplexed over one connection. It is cheaply cloneable (`Arc`
//! inside); clones share the connection, the id counter, and the close
//! signal, so the client can be used from any number of tasks at once.
//!
//! # Transports
//!
//! The endpoint string picks the transport at construction time; the call
//! surface is identical on all of them, except that subscriptions require
//! server push and are rejected on request-per-call HTTP.
//!
//! # Reconnection
//!
//! For persistent transports the client redials the same endpoint when it
//! finds the connection gone. Calls and subscriptions that were in flight
//! at the moment of loss fail with a definitive connection-closed error
//! and are never resubmitted; concurrent callers who merely arrive during
//! the failure window share a single redial and proceed on the fresh
//! connection. A call whose op provably never reached the wire is
//! replayed once instead of surfacing a spurious error.
//!
//! # Cancellation
//!
//! Every call variant has a `_with_cancel` form taking a
//! [`CancellationToken`]. Firing the token is safe at any time: if the
//! response already won the race, the cancellation is a no-op; otherwise
//! the outstanding-call entry is dropped and the caller gets
//! [`Error::Cancelled`].

use muxrpc_core::{codec, Error, Id, Notification, Request, Response, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::batch::{fill_batch, BatchElem};
use crate::dispatch::{self, Op, PendingSub};
use crate::http::HttpConnection;
use crate::reconnect::RedialBackoff;
use crate::subscription::{Subscription, DEFAULT_SUBSCRIPTION_BUFFER};
use crate::transport::{Endpoint, InProcService, StreamTransport};

/// Multiplexing RPC client over one logical endpoint
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    kind: ClientKind,
    /// Per-client id counter, shared with the dispatch loop so internal
    /// requests and façade requests can never collide
    next_id: Arc<AtomicU64>,
    /// Client-wide close signal, observed by every loop and every call
    close: CancellationToken,
    /// Delivery buffer capacity for new subscriptions
    sub_buffer: usize,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

enum ClientKind {
    Stream(StreamState),
    Http(HttpConnection),
}

struct StreamState {
    endpoint: Endpoint,
    conn: Mutex<ConnState>,
}

struct ConnState {
    handle: ConnHandle,
    redial: Option<Box<dyn RedialBackoff>>,
}

/// Generation-numbered handle to the current dispatch loop
#[derive(Clone)]
pub(crate) struct ConnHandle {
    pub(crate) ops: mpsc::Sender<Op>,
    gen: u64,
}

impl Client {
    /// Connect to an endpoint with default options.
    ///
    /// See [`Endpoint::parse`] for the accepted forms. Equivalent to
    /// `ClientBuilder::new(url).connect()`.
    pub async fn dial(url: &str) -> Result<Client> {
        crate::ClientBuilder::new(url).connect().await
    }

    /// Attach to an in-process server handle.
    ///
    /// No dialing and no serialization layer beyond the message payloads
    /// themselves; subscriptions work like on any persistent transport.
    pub fn in_proc(service: Arc<dyn InProcService>) -> Client {
        let transport = crate::transport::in_proc_transport(Arc::clone(&service));
        Client::from_stream_parts(
            Endpoint::InProc(service),
            transport,
            DEFAULT_SUBSCRIPTION_BUFFER,
            None,
        )
    }

    pub(crate) fn from_stream_parts(
        endpoint: Endpoint,
        transport: StreamTransport,
        sub_buffer: usize,
        redial: Option<Box<dyn RedialBackoff>>,
    ) -> Client {
        let close = CancellationToken::new();
        let next_id = Arc::new(AtomicU64::new(0));
        let ops = dispatch::spawn(transport, close.clone(), Arc::clone(&next_id));
        Client {
            inner: Arc::new(ClientInner {
                kind: ClientKind::Stream(StreamState {
                    endpoint,
                    conn: Mutex::new(ConnState {
                        handle: ConnHandle { ops, gen: 0 },
                        redial,
                    }),
                }),
                next_id,
                close,
                sub_buffer,
            }),
        }
    }

    pub(crate) fn from_http_parts(url: String, sub_buffer: usize) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                kind: ClientKind::Http(HttpConnection::new(url)),
                next_id: Arc::new(AtomicU64::new(0)),
                close: CancellationToken::new(),
                sub_buffer,
            }),
        }
    }

    /// Call a remote method and decode its result.
    ///
    /// `params` must serialize to a JSON array (a tuple, a `Vec`, or
    /// `json!([...])`) holding the positional arguments; `()` means no
    /// arguments. Blocks until the response arrives, the client closes,
    /// or the connection dies, whichever is first.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let never = CancellationToken::new();
        self.call_with_cancel(&never, method, params).await
    }

    /// [`call`](Self::call), racing the response against a cancellation
    /// token.
    pub async fn call_with_cancel<P, R>(
        &self,
        cancel: &CancellationToken,
        method: &str,
        params: P,
    ) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = to_params(params)?;
        let resp = match &self.inner.kind {
            ClientKind::Http(http) => self.http_call(http, cancel, method, params).await?,
            ClientKind::Stream(state) => {
                let (_, resp) = self.stream_call(state, cancel, method, params, None).await?;
                resp
            }
        };
        decode_result(resp)
    }

    /// Send a notification: no id, no response, returns once the write
    /// has succeeded.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let params = to_params(params)?;
        let notification = Notification::new(method, params);
        match &self.inner.kind {
            ClientKind::Http(http) => {
                if self.inner.close.is_cancelled() {
                    return Err(Error::ClientClosed);
                }
                tokio::select! {
                    _ = self.inner.close.cancelled() => Err(Error::ClientClosed),
                    done = http.notify(&notification) => done,
                }
            }
            ClientKind::Stream(state) => {
                let payload = codec::encode(&notification)?;
                let mut replayed = false;
                loop {
                    if self.inner.close.is_cancelled() {
                        return Err(Error::ClientClosed);
                    }
                    let (tx, mut rx) = oneshot::channel();
                    let op = Op::Notify {
                        payload: payload.clone(),
                        done: tx,
                    };
                    tokio::select! {
                        _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                        sent = self.send_op(state, op) => { sent?; }
                    }
                    tokio::select! {
                        _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                        outcome = &mut rx => match outcome {
                            Ok(done) => return done,
                            Err(_) if !replayed => replayed = true,
                            Err(_) => return Err(Error::ConnectionClosed),
                        }
                    }
                }
            }
        }
    }

    /// Send every element as one batch sharing a single round trip.
    ///
    /// Results and per-element errors are filled into the elements in
    /// input order; one rejected element does not disturb its siblings.
    pub async fn batch_call(&self, elems: &mut [BatchElem]) -> Result<()> {
        let never = CancellationToken::new();
        self.batch_call_with_cancel(&never, elems).await
    }

    /// [`batch_call`](Self::batch_call) with a cancellation token.
    pub async fn batch_call_with_cancel(
        &self,
        cancel: &CancellationToken,
        elems: &mut [BatchElem],
    ) -> Result<()> {
        if elems.is_empty() {
            return Ok(());
        }
        match &self.inner.kind {
            ClientKind::Http(http) => {
                if self.inner.close.is_cancelled() {
                    return Err(Error::ClientClosed);
                }
                let (requests, ids) = self.build_batch(elems);
                let responses = tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                    responses = http.batch(&requests) => responses?,
                };
                fill_batch(elems, &ids, responses);
                Ok(())
            }
            ClientKind::Stream(state) => {
                let mut replayed = false;
                loop {
                    if self.inner.close.is_cancelled() {
                        return Err(Error::ClientClosed);
                    }
                    let (requests, ids) = self.build_batch(elems);
                    let payload = codec::encode_batch(&requests)?;
                    let (tx, mut rx) = oneshot::channel();
                    let op = Op::Batch {
                        payload,
                        ids: ids.clone(),
                        resp: tx,
                    };
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                        sent = self.send_op(state, op) => { sent?; }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                        outcome = &mut rx => match outcome {
                            Ok(responses) => {
                                fill_batch(elems, &ids, responses?);
                                return Ok(());
                            }
                            Err(_) if !replayed => replayed = true,
                            Err(_) => return Err(Error::ConnectionClosed),
                        }
                    }
                }
            }
        }
    }

    /// Subscribe to server pushes under `namespace`.
    ///
    /// Sends a `<namespace>_subscribe` call; the result is the
    /// server-issued subscription id, registered for routing before this
    /// method returns, so no early push can be lost. Delivered items
    /// arrive on `sink` in send order.
    ///
    /// # Panics
    ///
    /// Panics if `sink` is already closed. A dead sink would silently
    /// swallow every delivery, which is a bug at the call site, not a
    /// runtime condition.
    pub async fn subscribe<P: Serialize>(
        &self,
        namespace: &str,
        sink: mpsc::Sender<Value>,
        params: P,
    ) -> Result<Subscription> {
        let never = CancellationToken::new();
        self.subscribe_with_cancel(&never, namespace, sink, params).await
    }

    /// [`subscribe`](Self::subscribe) with a cancellation token.
    pub async fn subscribe_with_cancel<P: Serialize>(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        sink: mpsc::Sender<Value>,
        params: P,
    ) -> Result<Subscription> {
        assert!(!sink.is_closed(), "subscribe requires an open delivery sink");

        let state = match &self.inner.kind {
            ClientKind::Http(_) => return Err(Error::NotificationsUnsupported),
            ClientKind::Stream(state) => state,
        };

        let params = to_params(params)?;
        let (err_tx, err_rx) = oneshot::channel();
        let pending = PendingSub {
            namespace: namespace.to_string(),
            sink,
            err_tx,
            buffer: self.inner.sub_buffer,
        };
        let method = format!("{}_subscribe", namespace);
        let (handle, resp) = self
            .stream_call(state, cancel, &method, params, Some(pending))
            .await?;

        if let Some(err) = resp.error {
            return Err(Error::Rpc(err));
        }
        let sub_id = match resp.result {
            Some(Value::String(s)) => s,
            other => {
                return Err(Error::Parse(format!(
                    "subscribe did not return a subscription id: {:?}",
                    other
                )))
            }
        };
        Ok(Subscription::new(
            sub_id,
            namespace.to_string(),
            handle.ops,
            err_rx,
        ))
    }

    /// Close the client.
    ///
    /// Idempotent. Every in-flight call, pending batch, and live
    /// subscription observes a definitive closed error within bounded
    /// time; calls made afterwards fail immediately.
    pub fn close(&self) {
        tracing::debug!("client closing");
        self.inner.close.cancel();
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.close.is_cancelled()
    }

    fn next_id(&self) -> Id {
        Id::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst) as i64)
    }

    fn build_batch(&self, elems: &[BatchElem]) -> (Vec<Request>, Vec<Id>) {
        let mut requests = Vec::with_capacity(elems.len());
        let mut ids = Vec::with_capacity(elems.len());
        for elem in elems {
            let id = self.next_id();
            requests.push(Request::new(
                elem.method.clone(),
                elem.params.clone(),
                id.clone(),
            ));
            ids.push(id);
        }
        (requests, ids)
    }

    async fn http_call(
        &self,
        http: &HttpConnection,
        cancel: &CancellationToken,
        method: &str,
        params: Option<Value>,
    ) -> Result<Response> {
        if self.inner.close.is_cancelled() {
            return Err(Error::ClientClosed);
        }
        let request = Request::new(method, params, self.next_id());
        tracing::debug!(method, url = http.url(), "sending http call");
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.inner.close.cancelled() => Err(Error::ClientClosed),
            resp = http.call(&request) => resp,
        }
    }

    /// Register a call with the dispatch loop and await its outcome.
    ///
    /// Exactly one of {response, cancellation, closed error} resolves the
    /// call. A subscribe call (`sub` present) is never replayed because
    /// its one-shot registration state cannot be rebuilt.
    async fn stream_call(
        &self,
        state: &StreamState,
        cancel: &CancellationToken,
        method: &str,
        params: Option<Value>,
        mut sub: Option<PendingSub>,
    ) -> Result<(ConnHandle, Response)> {
        let replayable = sub.is_none();
        let mut replayed = false;
        loop {
            if self.inner.close.is_cancelled() {
                return Err(Error::ClientClosed);
            }
            let id = self.next_id();
            let request = Request::new(method, params.clone(), id.clone());
            let payload = codec::encode(&request)?;
            let (tx, mut rx) = oneshot::channel();
            let op = Op::Call {
                payload,
                id: id.clone(),
                resp: tx,
                sub: sub.take(),
            };

            let handle = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                sent = self.send_op(state, op) => sent?,
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    // Drop the outstanding entry if the response has not
                    // beaten us to it; the loop tolerates either order.
                    let _ = handle.ops.send(Op::Forget { id }).await;
                    return Err(Error::Cancelled);
                }
                _ = self.inner.close.cancelled() => return Err(Error::ClientClosed),
                outcome = &mut rx => match outcome {
                    Ok(resp) => return resp.map(|r| (handle, r)),
                    // The loop died with this op still queued: it never
                    // reached the wire, so one replay is safe.
                    Err(_) if replayable && !replayed => replayed = true,
                    Err(_) => return Err(Error::ConnectionClosed),
                }
            }
        }
    }

    /// Hand an op to the current dispatch loop, redialing once if the
    /// loop is gone.
    async fn send_op(&self, state: &StreamState, op: Op) -> Result<ConnHandle> {
        let handle = { state.conn.lock().await.handle.clone() };
        let op = match handle.ops.send(op).await {
            Ok(()) => return Ok(handle),
            Err(mpsc::error::SendError(op)) => op,
        };
        let handle = self.redial(state, handle.gen).await?;
        handle
            .ops
            .send(op)
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        Ok(handle)
    }

    /// Re-establish the connection after generation `failed_gen` died.
    ///
    /// The mutex makes concurrent callers in the same failure window
    /// share one redial: whoever arrives second finds a newer generation
    /// and reuses it, so a single failure event produces at most one
    /// observable error, not one per caller.
    async fn redial(&self, state: &StreamState, failed_gen: u64) -> Result<ConnHandle> {
        let mut conn = state.conn.lock().await;
        if conn.handle.gen != failed_gen {
            return Ok(conn.handle.clone());
        }
        if self.inner.close.is_cancelled() {
            return Err(Error::ClientClosed);
        }
        tracing::info!(endpoint = %state.endpoint, "connection lost, redialing");
        let mut attempt = 0u32;
        loop {
            match state.endpoint.dial().await {
                Ok(transport) => {
                    if let Some(policy) = conn.redial.as_mut() {
                        policy.reset();
                    }
                    let ops = dispatch::spawn(
                        transport,
                        self.inner.close.clone(),
                        Arc::clone(&self.inner.next_id),
                    );
                    conn.handle = ConnHandle {
                        ops,
                        gen: failed_gen + 1,
                    };
                    tracing::info!(endpoint = %state.endpoint, "redial succeeded");
                    return Ok(conn.handle.clone());
                }
                Err(e) => match conn.redial.as_mut().and_then(|p| p.next_delay(attempt)) {
                    Some(delay) => {
                        tracing::warn!(
                            endpoint = %state.endpoint,
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "redial failed, retrying"
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(endpoint = %state.endpoint, error = %e, "redial failed");
                        return Err(e);
                    }
                },
            }
        }
    }
}

fn decode_result<R: DeserializeOwned>(resp: Response) -> Result<R> {
    if let Some(err) = resp.error {
        return Err(Error::Rpc(err));
    }
    serde_json::from_value(resp.result.unwrap_or(Value::Null))
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn to_params<P: Serialize>(params: P) -> Result<Option<Value>> {
    match serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))? {
        Value::Null => Ok(None),
        value => Ok(Some(value)),
    }
}
