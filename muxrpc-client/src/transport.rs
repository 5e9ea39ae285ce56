//! Transport adapters
//!
//! The engine speaks the same protocol over four interchangeable
//! connection strategies, selected from the endpoint's form at
//! construction time:
//!
//! | Endpoint | Strategy |
//! |---|---|
//! | `ws://`, `wss://` | persistent duplex WebSocket |
//! | `http://`, `https://` | request-per-call HTTP (see [`crate::http`]) |
//! | `tcp://host:port` | persistent stream, newline-delimited JSON |
//! | filesystem path | persistent stream over a Unix socket |
//! | in-process handle | direct dispatch into an [`InProcService`] |
//!
//! Every persistent strategy reduces to the same contract: send one
//! message, read the next message, close. A transport splits into a write
//! half owned by the dispatch loop (the only writer) and a read half
//! drained by a dedicated reader task, mirroring how a WebSocket stream
//! splits into sink and stream.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use muxrpc_core::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Server side of an in-process connection
///
/// This is the engine's only view of an in-process server: hand it one
/// raw message, get back at most one raw reply. Subscription pushes go
/// through the [`ServerPush`] handle, which stays valid for the lifetime
/// of the connection. The method registry behind `handle` is the
/// collaborator's business.
#[async_trait]
pub trait InProcService: Send + Sync + 'static {
    /// Process one raw message; `None` means no reply (a notification).
    async fn handle(&self, raw: String, push: ServerPush) -> Option<String>;
}

/// Handle an in-process service uses to push unsolicited messages
#[derive(Clone)]
pub struct ServerPush {
    tx: mpsc::UnboundedSender<String>,
}

impl ServerPush {
    /// Queue a raw message for the client; false once the connection is gone
    pub fn send(&self, raw: impl Into<String>) -> bool {
        self.tx.send(raw.into()).is_ok()
    }
}

/// A parsed endpoint, fixing the transport strategy
#[derive(Clone)]
pub enum Endpoint {
    /// WebSocket URL
    Ws(String),
    /// HTTP(S) URL, request-per-call
    Http(String),
    /// TCP address, newline-delimited stream
    Tcp(String),
    /// Unix socket path, newline-delimited stream
    Ipc(PathBuf),
    /// Live in-process server handle
    InProc(Arc<dyn InProcService>),
}

impl Endpoint {
    /// Select the transport strategy from the endpoint's scheme.
    ///
    /// Anything without a scheme is taken as a filesystem path to a Unix
    /// socket, matching how node IPC endpoints are usually written.
    pub fn parse(url: &str) -> Result<Endpoint> {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(Endpoint::Ws(url.to_string()))
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Ok(Endpoint::Http(url.to_string()))
        } else if let Some(addr) = url.strip_prefix("tcp://") {
            Ok(Endpoint::Tcp(addr.to_string()))
        } else if url.contains("://") {
            Err(Error::Transport(format!("unsupported endpoint scheme: {}", url)))
        } else {
            Ok(Endpoint::Ipc(PathBuf::from(url)))
        }
    }

    /// True for the request-per-call strategy (no dispatch loop, no push)
    pub fn is_http(&self) -> bool {
        matches!(self, Endpoint::Http(_))
    }

    /// Open a fresh connection to this endpoint.
    ///
    /// Called once at construction and again by the reconnect supervisor;
    /// always the same logical endpoint.
    pub(crate) async fn dial(&self) -> Result<StreamTransport> {
        match self {
            Endpoint::Ws(url) => {
                let (socket, _) = connect_async(url.as_str())
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                let (sink, stream) = socket.split();
                Ok(StreamTransport {
                    writer: WriteHalf::Ws(sink),
                    reader: ReadHalf::Ws(stream),
                })
            }
            Endpoint::Tcp(addr) => {
                let socket = TcpStream::connect(addr)
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                let (read, write) = socket.into_split();
                Ok(StreamTransport::from_duplex(Box::new(read), Box::new(write)))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let socket = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                let (read, write) = socket.into_split();
                Ok(StreamTransport::from_duplex(Box::new(read), Box::new(write)))
            }
            #[cfg(not(unix))]
            Endpoint::Ipc(path) => Err(Error::Transport(format!(
                "ipc endpoints are not supported on this platform: {}",
                path.display()
            ))),
            Endpoint::InProc(service) => Ok(in_proc_transport(Arc::clone(service))),
            Endpoint::Http(url) => Err(Error::Transport(format!(
                "request-per-call endpoint has no stream connection: {}",
                url
            ))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Ws(url) | Endpoint::Http(url) => write!(f, "{}", url),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Ipc(path) => write!(f, "{}", path.display()),
            Endpoint::InProc(_) => write!(f, "inproc"),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self)
    }
}

/// One live persistent connection, ready to be split
pub(crate) struct StreamTransport {
    writer: WriteHalf,
    reader: ReadHalf,
}

impl StreamTransport {
    fn from_duplex(
        read: Box<dyn AsyncRead + Send + Unpin>,
        write: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        StreamTransport {
            writer: WriteHalf::Stream(write),
            reader: ReadHalf::Stream(BufReader::new(read)),
        }
    }

    /// Split into the dispatch loop's write half and the reader task's
    /// read half.
    pub(crate) fn split(self) -> (WriteHalf, ReadHalf) {
        (self.writer, self.reader)
    }
}

/// Write side of a persistent connection; the dispatch loop is its only
/// owner, so message writes never interleave.
pub(crate) enum WriteHalf {
    InProc {
        service: Arc<dyn InProcService>,
        inbound: mpsc::UnboundedSender<String>,
        closed: CancellationToken,
    },
    Stream(Box<dyn AsyncWrite + Send + Unpin>),
    Ws(SplitSink<WsSocket, WsFrame>),
}

impl WriteHalf {
    /// Send one complete message
    pub(crate) async fn send(&mut self, msg: String) -> Result<()> {
        match self {
            WriteHalf::InProc {
                service,
                inbound,
                closed,
            } => {
                if closed.is_cancelled() {
                    return Err(Error::ConnectionClosed);
                }
                // Direct dispatch: the service runs on its own task so a
                // slow handler cannot stall the dispatch loop, and its
                // reply joins the inbound queue like any other message.
                let service = Arc::clone(service);
                let push = ServerPush {
                    tx: inbound.clone(),
                };
                let inbound = inbound.clone();
                tokio::spawn(async move {
                    if let Some(reply) = service.handle(msg, push).await {
                        let _ = inbound.send(reply);
                    }
                });
                Ok(())
            }
            WriteHalf::Stream(io) => {
                io.write_all(msg.as_bytes())
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                io.write_all(b"\n")
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                io.flush().await.map_err(|e| Error::Transport(e.to_string()))
            }
            WriteHalf::Ws(sink) => sink
                .send(WsFrame::Text(msg))
                .await
                .map_err(|e| Error::Transport(e.to_string())),
        }
    }

    /// Close the connection; idempotent, unblocks the read half
    pub(crate) async fn close(&mut self) {
        match self {
            WriteHalf::InProc { closed, .. } => closed.cancel(),
            WriteHalf::Stream(io) => {
                let _ = io.shutdown().await;
            }
            WriteHalf::Ws(sink) => {
                let _ = sink.close().await;
            }
        }
    }
}

/// Read side of a persistent connection, drained by the reader task
pub(crate) enum ReadHalf {
    InProc {
        inbound: mpsc::UnboundedReceiver<String>,
        closed: CancellationToken,
    },
    Stream(BufReader<Box<dyn AsyncRead + Send + Unpin>>),
    Ws(SplitStream<WsSocket>),
}

impl ReadHalf {
    /// Block until the next complete message or a definitive closed error
    pub(crate) async fn next(&mut self) -> Result<String> {
        match self {
            ReadHalf::InProc { inbound, closed } => {
                tokio::select! {
                    _ = closed.cancelled() => Err(Error::ConnectionClosed),
                    msg = inbound.recv() => msg.ok_or(Error::ConnectionClosed),
                }
            }
            ReadHalf::Stream(io) => {
                let mut line = String::new();
                let n = io
                    .read_line(&mut line)
                    .await
                    .map_err(|e| Error::Transport(e.to_string()))?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                Ok(line)
            }
            ReadHalf::Ws(stream) => loop {
                match stream.next().await {
                    Some(Ok(WsFrame::Text(text))) => return Ok(text),
                    Some(Ok(WsFrame::Binary(bytes))) => {
                        return String::from_utf8(bytes)
                            .map_err(|e| Error::Parse(e.to_string()))
                    }
                    Some(Ok(WsFrame::Close(_))) | None => return Err(Error::ConnectionClosed),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(Error::Transport(e.to_string())),
                }
            },
        }
    }
}

pub(crate) fn in_proc_transport(service: Arc<dyn InProcService>) -> StreamTransport {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();
    StreamTransport {
        writer: WriteHalf::InProc {
            service,
            inbound: tx,
            closed: closed.clone(),
        },
        reader: ReadHalf::InProc {
            inbound: rx,
            closed,
        },
    }
}
