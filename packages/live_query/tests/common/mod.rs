#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use live_query::{
    Client, ClientConfig, Event, LiveQueryError, ParseObject, Query, Socket, SocketEvents,
    SubscriptionHandler, Transport,
};
use serde_json::Value;
use url::Url;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// --- In-memory transport ---

#[derive(Default)]
struct MockState {
    sockets: Vec<SocketEvents>,
    urls: Vec<String>,
    sent: Vec<(usize, String)>,
    closed: Vec<usize>,
}

/// Records every socket opened and every frame sent. Socket `n` is the n-th opened.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

struct MockSocket {
    index: usize,
    state: Arc<Mutex<MockState>>,
}

impl Transport for MockTransport {
    fn open(&self, url: &Url, events: SocketEvents) -> Box<dyn Socket> {
        let mut state = self.state.lock().unwrap();
        state.sockets.push(events);
        state.urls.push(url.to_string());
        Box::new(MockSocket {
            index: state.sockets.len() - 1,
            state: self.state.clone(),
        })
    }
}

impl Socket for MockSocket {
    fn send(&self, text: String) -> Result<(), LiveQueryError> {
        self.state.lock().unwrap().sent.push((self.index, text));
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed.push(self.index);
    }
}

impl MockTransport {
    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().sockets.len()
    }

    pub fn url(&self, index: usize) -> String {
        self.state.lock().unwrap().urls[index].clone()
    }

    pub fn socket(&self, index: usize) -> SocketEvents {
        self.state.lock().unwrap().sockets[index].clone()
    }

    /// Events sender of the most recently opened socket.
    pub fn latest(&self) -> SocketEvents {
        let state = self.state.lock().unwrap();
        state.sockets.last().cloned().expect("no socket opened")
    }

    pub fn was_closed(&self, index: usize) -> bool {
        self.state.lock().unwrap().closed.contains(&index)
    }

    /// Every frame sent so far, parsed, oldest first. Clears the log.
    pub fn take_sent(&self) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .sent
            .drain(..)
            .map(|(_, text)| serde_json::from_str(&text).unwrap())
            .collect()
    }

    pub fn take_ops(&self) -> Vec<String> {
        self.take_sent()
            .into_iter()
            .map(|frame| frame["op"].as_str().unwrap().to_string())
            .collect()
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::new("http://localhost:1337/parse", "app")
}

pub fn client(transport: &MockTransport) -> Client {
    init_tracing();
    Client::builder(config())
        .transport(transport.clone())
        .build()
        .unwrap()
}

/// Drive the latest socket through open + `connected` and discard what was sent.
pub async fn connect(client: &Client, transport: &MockTransport) {
    // Let the worker process already-enqueued commands (e.g. the socket open).
    client.flush().await.unwrap();
    let socket = transport.latest();
    socket.opened();
    socket.message(r#"{"op":"connected"}"#);
    client.flush().await.unwrap();
}

// --- Recording handler ---

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Event(Event<ParseObject>),
    Error(LiveQueryError),
    Subscribed,
    Unsubscribed,
}

#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(Query, Call)>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    fn push(&self, query: &Query, call: Call) {
        self.calls.lock().unwrap().push((query.clone(), call));
    }
}

impl SubscriptionHandler for RecordingHandler {
    type Object = ParseObject;

    fn on_event(&self, query: &Query, event: Event<ParseObject>, _client: &Client) {
        self.push(query, Call::Event(event));
    }

    fn on_error(&self, query: &Query, error: LiveQueryError, _client: &Client) {
        self.push(query, Call::Error(error));
    }

    fn on_subscribe(&self, query: &Query, _client: &Client) {
        self.push(query, Call::Subscribed);
    }

    fn on_unsubscribe(&self, query: &Query, _client: &Client) {
        self.push(query, Call::Unsubscribed);
    }
}
