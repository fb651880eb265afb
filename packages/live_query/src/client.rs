//! Client facade and the serialized worker that owns all connection state.
//!
//! Every public method only enqueues a [`Command`]. One worker task per
//! client drains the queue, and socket tasks post their events onto the same
//! queue, so registry mutation, socket I/O and handler callbacks never
//! interleave.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatch::{ERROR_SINK_CAPACITY, ErrorSink, EventDispatcher, Followup};
use crate::error::LiveQueryError;
use crate::handler::{SubscriptionHandle, SubscriptionHandler};
use crate::protocol::ClientOperation;
use crate::query::Query;
use crate::registry::{ErasedHandler, HandlerId, SubscriptionInfo, SubscriptionRegistry, WeakHandler};
use crate::session::{SessionTokenProvider, StaticSessionToken};
use crate::transport::{SocketEvent, Transport, WsTransport};

static SHARED: Mutex<Option<Client>> = Mutex::new(None);

/// Work for the client's worker task.
pub(crate) enum Command {
    Subscribe {
        query: Query,
        handler: Box<dyn ErasedHandler>,
    },
    Unsubscribe {
        query: Query,
        /// `None` unsubscribes every handler of `query`.
        handler: Option<HandlerId>,
    },
    Reconnect,
    Disconnect,
    Socket {
        generation: u64,
        event: SocketEvent,
    },
    Flush(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<Vec<SubscriptionInfo>>),
    Shutdown,
}

/// Handle to a live query connection. Cheap to clone; all clones drive the same worker.
///
/// The worker runs until [`Client::shutdown`] is called.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    errors: broadcast::Sender<LiveQueryError>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &*self.state.borrow())
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Client {
    /// Build a client over WebSockets. Must be called inside a tokio runtime.
    ///
    /// Nothing is opened until the first subscribe or [`Client::reconnect`].
    pub fn new(config: ClientConfig) -> Result<Self, LiveQueryError> {
        ClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// The process-wide client, built from [`ClientConfig::load`] on first use.
    pub fn shared() -> Result<Self, LiveQueryError> {
        let mut shared = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = shared.as_ref().filter(|c| !c.is_closed()) {
            return Ok(client.clone());
        }
        let client = Client::new(ClientConfig::load(None)?)?;
        *shared = Some(client.clone());
        Ok(client)
    }

    /// Replace the process-wide client.
    pub fn set_shared(client: Client) {
        *SHARED.lock().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    /// Forget the process-wide client, returning it.
    pub fn reset_shared() -> Option<Client> {
        SHARED.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn enqueue(&self, command: Command) -> Result<(), LiveQueryError> {
        self.commands
            .send(command)
            .map_err(|_| LiveQueryError::ClientClosed)
    }

    /// Register `handler` for `query`. The returned handle owns the handler.
    pub fn subscribe<H: SubscriptionHandler>(
        &self,
        query: Query,
        handler: H,
    ) -> Result<SubscriptionHandle<H>, LiveQueryError> {
        self.subscribe_arc(query, Arc::new(handler))
    }

    /// Like [`Client::subscribe`], for a handler the caller already shares.
    pub fn subscribe_arc<H: SubscriptionHandler>(
        &self,
        query: Query,
        handler: Arc<H>,
    ) -> Result<SubscriptionHandle<H>, LiveQueryError> {
        self.enqueue(Command::Subscribe {
            query: query.clone(),
            handler: Box::new(WeakHandler::new(&handler)),
        })?;
        Ok(SubscriptionHandle::new(query, handler, self.clone()))
    }

    /// Request removal of every subscription to `query`.
    ///
    /// Records are removed when the server acknowledges with `unsubscribed`.
    pub fn unsubscribe(&self, query: &Query) -> Result<(), LiveQueryError> {
        self.enqueue(Command::Unsubscribe {
            query: query.clone(),
            handler: None,
        })
    }

    /// Request removal of the subscriptions of `query` served by `handler`.
    pub fn unsubscribe_handler<H: ?Sized>(
        &self,
        query: &Query,
        handler: &Arc<H>,
    ) -> Result<(), LiveQueryError> {
        self.enqueue(Command::Unsubscribe {
            query: query.clone(),
            handler: Some(HandlerId::of(handler)),
        })
    }

    /// Drop the current socket (if any) and open a new one.
    pub fn reconnect(&self) -> Result<(), LiveQueryError> {
        self.enqueue(Command::Reconnect)
    }

    /// Close the socket and suppress automatic reconnects until [`Client::reconnect`].
    pub fn disconnect(&self) -> Result<(), LiveQueryError> {
        self.enqueue(Command::Disconnect)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Connection-level errors: uncorrelated server errors, undeliverable
    /// decode failures, transport failures and failed sends.
    pub fn errors(&self) -> broadcast::Receiver<LiveQueryError> {
        self.errors.subscribe()
    }

    /// Resolves once every command enqueued before this call has been processed.
    pub async fn flush(&self) -> Result<(), LiveQueryError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Command::Flush(tx))?;
        rx.await.map_err(|_| LiveQueryError::ClientClosed)
    }

    /// Registry contents in replay order.
    pub async fn subscriptions(&self) -> Result<Vec<SubscriptionInfo>, LiveQueryError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Command::Snapshot(tx))?;
        rx.await.map_err(|_| LiveQueryError::ClientClosed)
    }

    /// Disconnect and stop the worker. Every later call fails with `ClientClosed`.
    pub fn shutdown(&self) -> Result<(), LiveQueryError> {
        self.enqueue(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// A client with no worker, for exercising handlers in isolation.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ConnectionState::default());
        let (errors, _) = broadcast::channel(1);
        Self {
            commands,
            state,
            errors,
        }
    }
}

/// Configures a [`Client`] before its worker starts.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    session_tokens: Option<Arc<dyn SessionTokenProvider>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            session_tokens: None,
        }
    }

    /// Replace the default [`WsTransport`].
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replace the token fixed in the config with a dynamic source.
    pub fn session_tokens(mut self, provider: impl SessionTokenProvider) -> Self {
        self.session_tokens = Some(Arc::new(provider));
        self
    }

    pub fn build(self) -> Result<Client, LiveQueryError> {
        self.config.validate()?;
        let endpoint = self.config.endpoint()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LiveQueryError::NoRuntime)?;

        let (commands, queue) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::default());
        let (errors, _) = broadcast::channel(ERROR_SINK_CAPACITY);
        let client = Client {
            commands: commands.clone(),
            state,
            errors: errors.clone(),
        };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WsTransport));
        let session_tokens = self.session_tokens.unwrap_or_else(|| {
            Arc::new(StaticSessionToken::new(self.config.session_token.clone()))
        });

        info!(endpoint = %endpoint, application_id = %self.config.application_id, "live query client created");
        let engine = Engine {
            application_id: self.config.application_id,
            client_key: self.config.client_key,
            connection: ConnectionManager::new(endpoint, transport, commands, state_tx),
            registry: SubscriptionRegistry::new(),
            dispatcher: EventDispatcher::new(client.clone(), ErrorSink::new(errors)),
            session_tokens,
        };
        runtime.spawn(engine.run(queue));
        Ok(client)
    }
}

/// The serialized worker. Owns the socket, the registry and the dispatcher.
struct Engine {
    application_id: String,
    client_key: Option<String>,
    connection: ConnectionManager,
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    session_tokens: Arc<dyn SessionTokenProvider>,
}

impl Engine {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = queue.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        debug!("live query worker stopped");
    }

    /// Returns false once the worker should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Subscribe { query, handler } => self.subscribe(query, handler),
            Command::Unsubscribe { query, handler } => self.unsubscribe(&query, handler),
            Command::Reconnect => self.connection.reconnect(),
            Command::Disconnect => self.connection.disconnect(),
            Command::Socket { generation, event } => self.socket_event(generation, event),
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            Command::Shutdown => {
                self.connection.disconnect();
                info!("live query client shut down");
                return false;
            }
        }
        true
    }

    fn subscribe(&mut self, query: Query, handler: Box<dyn ErasedHandler>) {
        let encoded = query.encode();
        let request_id = self.registry.add(query, handler);
        debug!(%request_id, "subscription registered");

        match self.connection.state() {
            ConnectionState::Open => {
                let session_token = self.session_tokens.current_session_token();
                self.send(ClientOperation::Subscribe {
                    request_id,
                    query: encoded,
                    session_token,
                });
            }
            // The sweep on `connected` sends it.
            ConnectionState::Connecting => {}
            _ if self.connection.user_disconnected() => {
                warn!(%request_id, "client is disconnected; subscribe deferred until reconnect");
            }
            _ => self.connection.reconnect(),
        }
    }

    fn unsubscribe(&mut self, query: &Query, handler: Option<HandlerId>) {
        let ids = self.registry.matching(|record| {
            record.query == *query && handler.is_none_or(|id| record.handler.is(id))
        });
        if ids.is_empty() {
            debug!(class_name = query.class_name(), "unsubscribe matched nothing");
        }
        for request_id in ids {
            self.send(ClientOperation::Unsubscribe { request_id });
        }
    }

    fn socket_event(&mut self, generation: u64, event: SocketEvent) {
        if !self.connection.is_current(generation) {
            debug!(generation, "ignoring event from a replaced socket");
            return;
        }
        match event {
            SocketEvent::Opened => {
                let session_token = self
                    .session_tokens
                    .current_session_token()
                    .unwrap_or_default();
                self.send(ClientOperation::Connect {
                    application_id: self.application_id.clone(),
                    session_token,
                    client_key: self.client_key.clone(),
                });
            }
            SocketEvent::Message(text) => {
                debug!(len = text.len(), "received message");
                if self.dispatcher.handle_text(&text, &mut self.registry) == Followup::Resubscribe {
                    self.connection.mark_open();
                    self.resubscribe_all();
                }
            }
            SocketEvent::Closed { reason } => {
                if self.connection.socket_lost(reason) {
                    self.connection.reconnect();
                }
            }
            SocketEvent::Failed { cause } => {
                error!(cause = %cause, "live query socket failed");
                self.dispatcher
                    .sink()
                    .report(LiveQueryError::transport(&cause));
                if self.connection.socket_lost(cause) {
                    self.connection.reconnect();
                }
            }
        }
    }

    /// Re-send `subscribe` for every record, in registry order, with its original id.
    fn resubscribe_all(&self) {
        let session_token = self.session_tokens.current_session_token();
        info!(count = self.registry.len(), "resubscribing");
        for record in self.registry.records() {
            self.send(ClientOperation::Subscribe {
                request_id: record.request_id,
                query: record.query.encode(),
                session_token: session_token.clone(),
            });
        }
    }

    fn send(&self, operation: ClientOperation) {
        if let Err(error) = self.connection.send(&operation) {
            self.dispatcher.sink().report(error);
        }
    }
}
