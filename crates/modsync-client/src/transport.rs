//! Socket plumbing behind the [`Connector`] seam.
//!
//! The actor only ever sees a sink of outgoing text frames and a stream of
//! incoming ones. [`WsConnector`] provides them over tokio-tungstenite;
//! [`MemoryConnector`] provides them over channels so tests can play the
//! server.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use modsync_core::error::SyncError;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Outgoing text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// Incoming text frames. The stream ending means the peer closed.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, SyncError>> + Send>>;

/// Opens one duplex text connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<(FrameSink, FrameStream), SyncError>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Real websocket connector (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &Url) -> Result<(FrameSink, FrameStream), SyncError> {
        let (socket, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|err| SyncError::Transport(format!("websocket connect failed: {err}")))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");

        let (write, read) = socket.split();

        let sink = write
            .with(|text: String| async move {
                Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text))
            })
            .sink_map_err(|err| SyncError::Transport(format!("websocket send failed: {err}")));

        let stream = read.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => String::from_utf8(bytes).ok().map(Ok),
                // control frames are handled by tungstenite; Close ends the stream
                Ok(_) => None,
                Err(err) => Some(Err(SyncError::Transport(format!(
                    "websocket receive failed: {err}"
                )))),
            }
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// The server side of one in-memory connection.
pub struct MemoryPeer {
    /// Where the client connected to.
    pub url: Url,
    /// Frames the client sent.
    pub inbound: fmpsc::UnboundedReceiver<String>,
    /// Push frames (or a transport error) to the client. Dropping it closes
    /// the connection from the server side.
    pub outbound: fmpsc::UnboundedSender<Result<String, SyncError>>,
}

impl MemoryPeer {
    /// Send one frame to the client.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.outbound.unbounded_send(Ok(frame.into())).is_ok()
    }

    /// Inject a transport error on the client side.
    pub fn fail(&self, reason: &str) -> bool {
        self.outbound
            .unbounded_send(Err(SyncError::Transport(reason.to_string())))
            .is_ok()
    }

    /// Next frame the client sent, if any is already buffered.
    pub fn try_next(&mut self) -> Option<String> {
        self.inbound.try_next().ok().flatten()
    }

    /// Next frame the client sent, waiting for it.
    pub async fn next(&mut self) -> Option<String> {
        self.inbound.next().await
    }
}

/// Channel-backed connector. Every successful `open` hands a [`MemoryPeer`]
/// to the receiver returned by [`MemoryConnector::new`].
#[derive(Clone)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    fail_next: Arc<AtomicUsize>,
    broken_next: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            peers,
            fail_next: Arc::new(AtomicUsize::new(0)),
            broken_next: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, accepted)
    }

    /// Refuse the next `count` opens.
    pub fn refuse_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Accept the next `count` opens with a write side that is already
    /// closed, so the first send on each fails.
    pub fn break_writes_next(&self, count: usize) {
        self.broken_next.store(count, Ordering::SeqCst);
    }

    /// Number of `open` calls so far, refused ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &Url) -> Result<(FrameSink, FrameStream), SyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.fail_next) {
            return Err(SyncError::Transport("connection refused".to_string()));
        }

        let (client_tx, mut server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<Result<String, SyncError>>();
        if take_one(&self.broken_next) {
            server_rx.close();
        }

        self.peers
            .send(MemoryPeer {
                url: url.clone(),
                inbound: server_rx,
                outbound: server_tx,
            })
            .map_err(|_| SyncError::Transport("memory server is gone".to_string()))?;

        let sink = client_tx.sink_map_err(|err| SyncError::Transport(err.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
