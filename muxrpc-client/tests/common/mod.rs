//! Shared fixtures for muxrpc-client integration tests
//!
//! One method registry, `serve_message`, backs every mock server so each
//! transport is tested against identical behavior:
//!
//! - `test_echo` / `nftest_echo`: returns the positional params verbatim
//! - `test_sleep(ms)`: responds `true` after a delay
//! - `test_returnError`: a remote error with code, message, and data
//! - `nftest_subscribe(name, count, interval_ms)`: confirms with a
//!   subscription id, then pushes `0..count`
//! - `nftest_unsubscribe(id)`: returns `true`
//! - anything else: method-not-found (-32601)

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use muxrpc_client::{InProcService, ServerPush};
use muxrpc_core::{codec, ErrorObject, Id, Message, Notification, Request, Response};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_util::sync::CancellationToken;

/// Sink a handler uses to emit unsolicited messages toward the client
pub type Push = Arc<dyn Fn(String) -> bool + Send + Sync>;

pub const ERROR_CODE: i64 = 404;
pub const ERROR_MESSAGE: &str = "not found";

static SUB_COUNTER: AtomicU64 = AtomicU64::new(1);

fn param(params: &Option<Value>, index: usize) -> Value {
    params
        .as_ref()
        .and_then(|p| p.get(index))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Process one raw client message exactly as the test server would
pub async fn serve_message(raw: String, push: Push) -> Option<String> {
    match codec::decode(&raw) {
        Ok(Message::Request(req)) => handle_request(req, push).await,
        Ok(Message::Batch(values)) => {
            let mut replies = Vec::new();
            for value in values {
                match serde_json::from_value::<Request>(value) {
                    Ok(req) => {
                        if let Some(reply) = handle_request(req, push.clone()).await {
                            replies.push(reply);
                        }
                    }
                    Err(_) => replies.push(
                        codec::encode(&Response::error(ErrorObject::parse_error(), Id::Null))
                            .unwrap(),
                    ),
                }
            }
            Some(format!("[{}]", replies.join(",")))
        }
        // notifications get no reply, malformed input is ignored
        _ => None,
    }
}

async fn handle_request(req: Request, push: Push) -> Option<String> {
    let id = req.id.clone();
    let response = match req.method.as_str() {
        "test_echo" | "nftest_echo" => {
            Response::success(req.params.clone().unwrap_or(Value::Null), id)
        }
        "test_sleep" => {
            let ms = param(&req.params, 0).as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Response::success(json!(true), id)
        }
        "test_returnError" => Response::error(
            ErrorObject::with_data(ERROR_CODE, ERROR_MESSAGE, json!("lost block")),
            id,
        ),
        "nftest_subscribe" => {
            let count = param(&req.params, 1).as_u64().unwrap_or(0);
            let interval = param(&req.params, 2).as_u64().unwrap_or(0);
            let sub_id = format!("0x{:x}", SUB_COUNTER.fetch_add(1, Ordering::SeqCst));

            // Confirm first, then start pushing, so no push can outrun
            // the subscription response.
            let confirm = Response::success(json!(sub_id), id);
            push(codec::encode(&confirm).unwrap());

            tokio::spawn(async move {
                for i in 0..count {
                    if interval > 0 {
                        tokio::time::sleep(Duration::from_millis(interval)).await;
                    }
                    let item = Notification::new(
                        "nftest_subscription",
                        Some(json!({"subscription": sub_id, "result": i})),
                    );
                    if !push(codec::encode(&item).unwrap()) {
                        break;
                    }
                }
            });
            return None;
        }
        "nftest_unsubscribe" => Response::success(json!(true), id),
        method => Response::error(ErrorObject::method_not_found(method), id),
    };
    Some(codec::encode(&response).unwrap())
}

/// In-process server handle backed by `serve_message`
pub struct TestService;

#[async_trait]
impl InProcService for TestService {
    async fn handle(&self, raw: String, push: ServerPush) -> Option<String> {
        let push: Push = Arc::new(move |msg: String| push.send(msg));
        serve_message(raw, push).await
    }
}

/// Serve one newline-delimited duplex connection with `serve_message`
async fn serve_split<R, W>(read: R, mut write: W, quit: CancellationToken)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer_quit = quit.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_quit.cancelled() => break,
                msg = out_rx.recv() => match msg {
                    Some(msg) => {
                        if write.write_all(msg.as_bytes()).await.is_err()
                            || write.write_all(b"\n").await.is_err()
                        {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });

    let mut lines = BufReader::new(read).lines();
    loop {
        tokio::select! {
            _ = quit.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let push_tx = out_tx.clone();
                    let push: Push = Arc::new(move |msg: String| push_tx.send(msg).is_ok());
                    let reply_tx = out_tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = serve_message(line, push).await {
                            let _ = reply_tx.send(reply);
                        }
                    });
                }
                _ => break,
            }
        }
    }
    writer.abort();
}

/// Line-delimited JSON server over TCP
pub struct TcpServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    done: JoinHandle<()>,
}

impl TcpServer {
    pub async fn spawn() -> TcpServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::run(listener)
    }

    fn run(listener: TcpListener) -> TcpServer {
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let quit = shutdown.clone();
        let done = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let (read, write) = stream.into_split();
                        tokio::spawn(serve_split(read, write, quit.clone()));
                    }
                }
            }
        });
        TcpServer {
            addr,
            shutdown,
            done,
        }
    }

    pub fn url(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.done.await;
    }
}

/// Line-delimited JSON server over a Unix socket
#[cfg(unix)]
pub struct UnixServer {
    pub path: std::path::PathBuf,
    shutdown: CancellationToken,
    done: JoinHandle<()>,
}

#[cfg(unix)]
impl UnixServer {
    pub async fn spawn(path: std::path::PathBuf) -> UnixServer {
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        let shutdown = CancellationToken::new();
        let quit = shutdown.clone();
        let done = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        let (read, write) = stream.into_split();
                        tokio::spawn(serve_split(read, write, quit.clone()));
                    }
                }
            }
        });
        UnixServer {
            path,
            shutdown,
            done,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.done.await;
        let _ = std::fs::remove_file(&self.path);
    }
}

/// WebSocket server backed by `serve_message`
pub struct WsServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    done: JoinHandle<()>,
}

impl WsServer {
    pub async fn spawn() -> WsServer {
        Self::spawn_at(None).await
    }

    /// Bind at a specific address, for restart-at-the-same-endpoint
    /// scenarios. Sets SO_REUSEADDR so a restart can reclaim the port
    /// while old connections drain.
    pub async fn spawn_at(addr: Option<SocketAddr>) -> WsServer {
        let socket = TcpSocket::new_v4().unwrap();
        socket.set_reuseaddr(true).unwrap();
        socket
            .bind(addr.unwrap_or_else(|| "127.0.0.1:0".parse().unwrap()))
            .unwrap();
        let listener = socket.listen(64).unwrap();
        let addr = listener.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let quit = shutdown.clone();
        let done = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = quit.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        tokio::spawn(serve_ws_conn(stream, quit.clone()));
                    }
                }
            }
        });
        WsServer {
            addr,
            shutdown,
            done,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.done.await;
    }
}

async fn serve_ws_conn(stream: TcpStream, quit: CancellationToken) {
    let Ok(socket) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut frames) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

    let writer_quit = quit.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_quit.cancelled() => break,
                msg = out_rx.recv() => match msg {
                    Some(msg) => {
                        if sink.send(WsFrame::Text(msg)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = quit.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(WsFrame::Text(text))) => {
                    let push_tx = out_tx.clone();
                    let push: Push = Arc::new(move |msg: String| push_tx.send(msg).is_ok());
                    let reply_tx = out_tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = serve_message(text, push).await {
                            let _ = reply_tx.send(reply);
                        }
                    });
                }
                Some(Ok(WsFrame::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            }
        }
    }
    writer.abort();
}

/// Request-per-call HTTP server backed by `serve_message`
pub struct HttpServer {
    pub url: String,
    #[allow(dead_code)]
    handle: JoinHandle<()>,
}

pub async fn spawn_http_server() -> HttpServer {
    use warp::Filter;

    let route = warp::post()
        .and(warp::body::json::<Value>())
        .and_then(|value: Value| async move {
            let push: Push = Arc::new(|_| false);
            let reply = serve_message(value.to_string(), push)
                .await
                .unwrap_or_default();
            Ok::<_, warp::Rejection>(warp::reply::with_header(
                reply,
                "content-type",
                "application/json",
            ))
        });

    let (addr, fut) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    let handle = tokio::spawn(fut);
    HttpServer {
        url: format!("http://{}", addr),
        handle,
    }
}
