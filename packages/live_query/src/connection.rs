//! Connection lifecycle: owns the socket and drives
//! `Disconnected → Connecting → Open → Closed`.
//!
//! There is no backoff. A socket that fails right away is reopened right
//! away, for as long as the disconnect was not requested by the caller.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use url::Url;

use crate::client::Command;
use crate::error::LiveQueryError;
use crate::protocol::{ClientOperation, encode_operation};
use crate::transport::{Socket, SocketEvents, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. `user_initiated` blocks automatic reconnects.
    Disconnected { user_initiated: bool },
    /// Socket opening, or open and waiting for the server's `connected`.
    Connecting,
    /// The server acknowledged `connect`.
    Open,
    /// The socket was lost; a reconnect follows unless the caller disconnected.
    Closed { reason: String },
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected {
            user_initiated: false,
        }
    }
}

pub(crate) struct ConnectionManager {
    endpoint: Url,
    transport: Arc<dyn Transport>,
    socket: Option<Box<dyn Socket>>,
    generation: u64,
    user_disconnected: bool,
    events_tx: mpsc::UnboundedSender<Command>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub(crate) fn new(
        endpoint: Url,
        transport: Arc<dyn Transport>,
        events_tx: mpsc::UnboundedSender<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            endpoint,
            transport,
            socket: None,
            generation: 0,
            user_disconnected: false,
            events_tx,
            state_tx,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn user_disconnected(&self) -> bool {
        self.user_disconnected
    }

    /// True if `generation` names the socket currently owned.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.socket.is_some() && generation == self.generation
    }

    /// Close any existing socket and open a fresh one.
    pub(crate) fn reconnect(&mut self) {
        self.close_socket();
        self.generation += 1;
        info!(endpoint = %self.endpoint, generation = self.generation, "connecting to live query server");
        let events = SocketEvents::new(self.generation, self.events_tx.clone());
        self.socket = Some(self.transport.open(&self.endpoint, events));
        self.user_disconnected = false;
        self.set_state(ConnectionState::Connecting);
    }

    /// Close the socket and stay down until `reconnect` is called.
    pub(crate) fn disconnect(&mut self) {
        if self.close_socket() {
            info!(endpoint = %self.endpoint, "disconnected by caller");
        }
        self.user_disconnected = true;
        self.set_state(ConnectionState::Disconnected {
            user_initiated: true,
        });
    }

    /// The server acknowledged `connect`.
    pub(crate) fn mark_open(&self) {
        info!(endpoint = %self.endpoint, "live query connection open");
        self.set_state(ConnectionState::Open);
    }

    /// The current socket closed or failed. Returns true if a reconnect is due.
    pub(crate) fn socket_lost(&mut self, reason: String) -> bool {
        self.socket = None;
        info!(endpoint = %self.endpoint, reason = %reason, "live query socket closed");
        self.set_state(ConnectionState::Closed { reason });
        if self.user_disconnected {
            debug!("not reconnecting after caller disconnect");
            false
        } else {
            true
        }
    }

    /// Encode and queue `operation` on the current socket.
    pub(crate) fn send(&self, operation: &ClientOperation) -> Result<(), LiveQueryError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| LiveQueryError::transport("no socket"))?;
        let text = encode_operation(operation)?;
        debug!(op = operation.op(), "sending operation");
        socket.send(text)
    }

    fn close_socket(&mut self) -> bool {
        match self.socket.take() {
            Some(mut socket) => {
                socket.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if self.close_socket() {
            debug!(endpoint = %self.endpoint, "connection dropped with an open socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_id::RequestId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        opened: Vec<(String, u64)>,
        sent: Vec<String>,
        closed: usize,
    }

    #[derive(Default)]
    struct FakeTransport {
        log: Arc<Mutex<Log>>,
    }

    struct FakeSocket {
        log: Arc<Mutex<Log>>,
    }

    impl Transport for FakeTransport {
        fn open(&self, url: &Url, events: SocketEvents) -> Box<dyn Socket> {
            self.log
                .lock()
                .unwrap()
                .opened
                .push((url.to_string(), events.generation()));
            Box::new(FakeSocket {
                log: self.log.clone(),
            })
        }
    }

    impl Socket for FakeSocket {
        fn send(&self, text: String) -> Result<(), LiveQueryError> {
            self.log.lock().unwrap().sent.push(text);
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closed += 1;
        }
    }

    fn manager() -> (ConnectionManager, Arc<Mutex<Log>>) {
        let transport = FakeTransport::default();
        let log = transport.log.clone();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let endpoint = Url::parse("ws://localhost:1337/parse").unwrap();
        (
            ConnectionManager::new(endpoint, Arc::new(transport), events_tx, state_tx),
            log,
        )
    }

    #[test]
    fn test_initial_state() {
        let (conn, _) = manager();
        assert_eq!(
            conn.state(),
            ConnectionState::Disconnected {
                user_initiated: false
            }
        );
        assert!(!conn.is_current(0));
    }

    #[test]
    fn test_reconnect_replaces_socket() {
        let (mut conn, log) = manager();
        conn.reconnect();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.is_current(1));

        conn.reconnect();
        assert!(!conn.is_current(1));
        assert!(conn.is_current(2));

        let log = log.lock().unwrap();
        assert_eq!(log.opened.len(), 2);
        assert_eq!(log.opened[0].0, "ws://localhost:1337/parse");
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut conn, log) = manager();
        conn.reconnect();
        conn.disconnect();
        let once = conn.state();
        conn.disconnect();
        assert_eq!(conn.state(), once);
        assert_eq!(
            once,
            ConnectionState::Disconnected {
                user_initiated: true
            }
        );
        assert!(conn.user_disconnected());
        assert_eq!(log.lock().unwrap().closed, 1);
    }

    #[test]
    fn test_reconnect_clears_user_disconnect() {
        let (mut conn, _) = manager();
        conn.disconnect();
        conn.reconnect();
        assert!(!conn.user_disconnected());
    }

    #[test]
    fn test_socket_lost_decides_reconnect() {
        let (mut conn, _) = manager();
        conn.reconnect();
        assert!(conn.socket_lost("reset".to_string()));
        assert_eq!(
            conn.state(),
            ConnectionState::Closed {
                reason: "reset".to_string()
            }
        );
        assert!(!conn.is_current(1));

        conn.reconnect();
        conn.disconnect();
        assert!(!conn.socket_lost("late close".to_string()));
    }

    #[test]
    fn test_send_requires_socket() {
        let (mut conn, log) = manager();
        let op = ClientOperation::Unsubscribe {
            request_id: RequestId::new(1),
        };
        assert!(matches!(
            conn.send(&op),
            Err(LiveQueryError::Transport { .. })
        ));
        conn.reconnect();
        conn.send(&op).unwrap();
        assert_eq!(
            log.lock().unwrap().sent,
            vec![r#"{"op":"unsubscribe","requestId":1}"#.to_string()]
        );
    }
}
