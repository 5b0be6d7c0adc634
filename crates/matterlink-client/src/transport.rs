//! WebSocket transport.
//!
//! Owns at most one socket. The first text frame is handed to the caller's
//! handshake closure; every later frame goes to a [`FrameHandler`] from a
//! dedicated reader task. Writes go through an unbounded channel to a writer
//! task, so [`Transport::send`] never waits.

use crate::error::{ClientError, ConnectionError};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use matterlink_core::ProtocolError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives everything the server sends after the handshake.
pub(crate) trait FrameHandler: Send + Sync + 'static {
    /// One inbound text frame.
    fn on_frame(&self, text: &str);
    /// The socket closed without the caller asking for it. Called once.
    fn on_disconnected(&self);
}

/// Where outbound frames go. Implemented by [`Transport`]; tests substitute
/// a recorder.
pub(crate) trait Outbound {
    fn send(&self, frame: String) -> Result<(), ClientError>;
}

enum Link {
    Idle,
    Connecting,
    Open(OpenLink),
}

struct OpenLink {
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    closing: Arc<AtomicBool>,
}

impl OpenLink {
    fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        self.reader.abort();
        // dropping `outbound` lets the writer flush and send a close frame
    }
}

pub(crate) struct Transport {
    link: Arc<Mutex<Link>>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            link: Arc::new(Mutex::new(Link::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), Link::Open(_))
    }

    /// Open the socket and wait for the first frame.
    ///
    /// `negotiate` sees the first frame before any other frame is read; its
    /// result is returned. On any failure the transport goes back to idle.
    pub async fn connect<T>(
        &self,
        url: &str,
        timeout: Duration,
        handler: Arc<dyn FrameHandler>,
        negotiate: impl FnOnce(&str) -> Result<T, ConnectionError>,
    ) -> Result<T, ConnectionError> {
        {
            let mut link = self.lock();
            if !matches!(*link, Link::Idle) {
                return Err(ConnectionError::AlreadyConnected);
            }
            *link = Link::Connecting;
        }
        let mut guard = ConnectingGuard {
            transport: self,
            armed: true,
        };

        tracing::debug!("Trying to connect to {}", url);
        let mut socket = time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| ConnectionError::OpenTimeout(url.to_string()))?
            .map_err(|source| ConnectionError::Open {
                url: url.to_string(),
                source: Box::new(source),
            })?
            .0;

        let first = time::timeout(timeout, first_text_frame(&mut socket))
            .await
            .map_err(|_| ConnectionError::OpenTimeout(url.to_string()))?;
        let negotiated = match first.and_then(|frame| negotiate(&frame)) {
            Ok(negotiated) => negotiated,
            Err(e) => {
                let _ = socket.close(None).await;
                return Err(e);
            }
        };

        let (mut sink, stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Hold the lock until the link is recorded, so a reader that sees the
        // socket die straight away finds `Open` and not `Connecting`.
        let mut link = self.lock();
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            stream,
            handler,
            closing.clone(),
            self.link.clone(),
        ));
        *link = Link::Open(OpenLink {
            outbound,
            reader,
            closing,
        });
        drop(link);
        guard.armed = false;
        Ok(negotiated)
    }

    /// Close the socket if it is open. Safe to call any number of times;
    /// the frame handler is not told about caller-initiated closes.
    pub fn disconnect(&self) {
        let mut link = self.lock();
        let open = match std::mem::replace(&mut *link, Link::Idle) {
            Link::Open(open) => open,
            other => {
                *link = other;
                return;
            }
        };
        drop(link);
        tracing::debug!("Closing client connection");
        open.close();
    }
}

impl Outbound for Transport {
    fn send(&self, frame: String) -> Result<(), ClientError> {
        match &*self.lock() {
            Link::Open(open) => {
                tracing::debug!("Publishing message: {}", frame);
                open.outbound
                    .send(Message::Text(frame.into()))
                    .map_err(|_| ClientError::NotConnected)
            }
            _ => Err(ClientError::NotConnected),
        }
    }
}

/// Resets a half-open connect attempt back to idle, including when the
/// connect future is dropped.
struct ConnectingGuard<'a> {
    transport: &'a Transport,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.transport.lock() = Link::Idle;
        }
    }
}

async fn first_text_frame(socket: &mut Socket) -> Result<String, ConnectionError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
            Some(Ok(Message::Binary(_))) => {
                return Err(ProtocolError::UnexpectedShape("binary handshake frame").into());
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(ConnectionError::ClosedBeforeHandshake);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::debug!("WebSocket error before handshake: {}", e);
                return Err(ConnectionError::ClosedBeforeHandshake);
            }
        }
    }
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    handler: Arc<dyn FrameHandler>,
    closing: Arc<AtomicBool>,
    link: Arc<Mutex<Link>>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                tracing::debug!("Received message: {}", text.as_str());
                handler.on_frame(text.as_str());
            }
            Ok(Message::Binary(data)) => {
                tracing::warn!("Ignoring binary frame of {} bytes", data.len());
            }
            Ok(Message::Close(frame)) => {
                tracing::debug!("WebSocket closed by server: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("WebSocket error: {}", e);
                break;
            }
        }
    }

    if closing.swap(true, Ordering::SeqCst) {
        return;
    }
    // Nobody called disconnect, so the open link is still ours to clear.
    let stale = std::mem::replace(
        &mut *link.lock().unwrap_or_else(PoisonError::into_inner),
        Link::Idle,
    );
    drop(stale);
    handler.on_disconnected();
}
