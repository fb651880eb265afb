//! Socket transport seam and the default tokio-tungstenite implementation.
//!
//! A transport opens sockets; each socket reports its lifecycle through a
//! [`SocketEvents`] sender that feeds the client's serialized worker. Events
//! are stamped with the socket's generation so that anything reported by a
//! socket the client has already replaced or closed is ignored.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use url::Url;

use crate::client::Command;
use crate::error::LiveQueryError;

/// What a socket reports back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    /// Closed by the peer or the network.
    Closed { reason: String },
    /// Failed to open, read or write.
    Failed { cause: String },
}

/// Delivers one socket's events to the client that opened it.
#[derive(Clone)]
pub struct SocketEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for SocketEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketEvents")
            .field("generation", &self.generation)
            .finish()
    }
}

impl SocketEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { generation, tx }
    }

    /// Increases with every socket the client opens.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the client has shut down.
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx
            .send(Command::Socket {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.emit(SocketEvent::Opened)
    }

    pub fn message(&self, text: impl Into<String>) -> bool {
        self.emit(SocketEvent::Message(text.into()))
    }

    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.emit(SocketEvent::Closed {
            reason: reason.into(),
        })
    }

    pub fn failed(&self, cause: impl Into<String>) -> bool {
        self.emit(SocketEvent::Failed {
            cause: cause.into(),
        })
    }
}

/// Opens sockets to the live query endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a socket. Must not block; the outcome arrives through `events`.
    fn open(&self, url: &Url, events: SocketEvents) -> Box<dyn Socket>;
}

/// One open (or opening) socket, exclusively owned by the connection manager.
pub trait Socket: Send {
    /// Queue a text frame.
    fn send(&self, text: String) -> Result<(), LiveQueryError>;

    /// Close the socket. Idempotent; no events are expected afterwards.
    fn close(&mut self);
}

/// WebSocket transport over tokio-tungstenite. Each socket runs as its own task.
#[derive(Debug, Default, Clone)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: &Url, events: SocketEvents) -> Box<dyn Socket> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_socket(url.to_string(), rx, cancel.clone(), events));
        Box::new(WsSocket { tx, cancel })
    }
}

struct WsSocket {
    tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Socket for WsSocket {
    fn send(&self, text: String) -> Result<(), LiveQueryError> {
        if self.cancel.is_cancelled() {
            return Err(LiveQueryError::transport("socket is closed"));
        }
        self.tx
            .send(text)
            .map_err(|_| LiveQueryError::transport("socket task has exited"))
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for WsSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
    events: SocketEvents,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => return,
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };
    let stream = match connected {
        Ok((stream, _)) => stream,
        Err(e) => {
            error!(url = %url, error = %e, "websocket connect failed");
            events.failed(e.to_string());
            return;
        }
    };
    debug!(url = %url, "websocket open");
    events.opened();

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    error!(url = %url, error = %e, "websocket write failed");
                    events.failed(e.to_string());
                    return;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        events.message(text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".to_string());
                        events.closed(reason);
                        return;
                    }
                    Some(Ok(_)) => {
                        // Binary and control frames carry nothing for us.
                    }
                    Some(Err(e)) => {
                        error!(url = %url, error = %e, "websocket read failed");
                        events.failed(e.to_string());
                        return;
                    }
                    None => {
                        events.closed("stream ended");
                        return;
                    }
                }
            }
        }
    }
}
