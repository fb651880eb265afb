//! Subscription handlers: the callback capability set invoked by the client.

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;

use crate::client::Client;
use crate::error::LiveQueryError;
use crate::event::{Event, EventKind};
use crate::query::Query;

/// Receives the outcome of one subscription.
///
/// Callbacks run on the client's worker task, one at a time. Anything that
/// must happen on another thread or runtime has to be forwarded from here.
/// Calling back into the `Client` is fine; its methods only enqueue.
///
/// The client holds handlers weakly. Keep the `Arc` (or the
/// [`SubscriptionHandle`]) alive for as long as callbacks are wanted.
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// The type each event's object payload is decoded into.
    type Object: DeserializeOwned + Send + 'static;

    fn on_event(&self, query: &Query, event: Event<Self::Object>, client: &Client);

    fn on_error(&self, _query: &Query, _error: LiveQueryError, _client: &Client) {}

    /// May fire again after every reconnect.
    fn on_subscribe(&self, _query: &Query, _client: &Client) {}

    fn on_unsubscribe(&self, _query: &Query, _client: &Client) {}
}

type EventCallback<T> = Arc<dyn Fn(&Query, &Event<T>) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Query, &LiveQueryError) + Send + Sync>;
type QueryCallback = Arc<dyn Fn(&Query) + Send + Sync>;

struct Callbacks<T> {
    event: Vec<EventCallback<T>>,
    error: Vec<ErrorCallback>,
    subscribe: Vec<QueryCallback>,
    unsubscribe: Vec<QueryCallback>,
}

/// Closure-based handler. Callbacks can be added before or after subscribing.
///
/// ```no_run
/// use live_query::{Client, ClientConfig, EventKind, ParseObject, Query, Subscription};
///
/// # async fn demo() -> Result<(), live_query::LiveQueryError> {
/// let client = Client::new(ClientConfig::new("https://example.com/parse", "app"))?;
/// let messages = client.subscribe(Query::new("Message"), Subscription::<ParseObject>::new())?;
/// messages
///     .handle(EventKind::Created, |_, message| println!("new message {}", message.object_id))
///     .handle_error(|_, error| eprintln!("subscription failed: {error}"));
/// # Ok(())
/// # }
/// ```
pub struct Subscription<T> {
    callbacks: Mutex<Callbacks<T>>,
}

impl<T> Default for Subscription<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscription<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Callbacks {
                event: Vec::new(),
                error: Vec::new(),
                subscribe: Vec::new(),
                unsubscribe: Vec::new(),
            }),
        }
    }

    fn with_callbacks<R>(&self, f: impl FnOnce(&mut Callbacks<T>) -> R) -> R {
        let mut guard = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Clone one callback list so it can run without the lock held.
    ///
    /// Callbacks may register further callbacks on this same subscription.
    fn snapshot<C: Clone>(&self, pick: impl FnOnce(&Callbacks<T>) -> &Vec<C>) -> Vec<C> {
        self.with_callbacks(|cb| pick(cb).clone())
    }

    pub fn handle_event(&self, f: impl Fn(&Query, &Event<T>) + Send + Sync + 'static) -> &Self {
        self.with_callbacks(|cb| cb.event.push(Arc::new(f)));
        self
    }

    /// Fire `f` only for events of `kind`, with the bare object.
    pub fn handle(&self, kind: EventKind, f: impl Fn(&Query, &T) + Send + Sync + 'static) -> &Self {
        self.handle_event(move |query, event| {
            if event.kind() == kind {
                f(query, event.object());
            }
        })
    }

    pub fn handle_error(
        &self,
        f: impl Fn(&Query, &LiveQueryError) + Send + Sync + 'static,
    ) -> &Self {
        self.with_callbacks(|cb| cb.error.push(Arc::new(f)));
        self
    }

    pub fn handle_subscribe(&self, f: impl Fn(&Query) + Send + Sync + 'static) -> &Self {
        self.with_callbacks(|cb| cb.subscribe.push(Arc::new(f)));
        self
    }

    pub fn handle_unsubscribe(&self, f: impl Fn(&Query) + Send + Sync + 'static) -> &Self {
        self.with_callbacks(|cb| cb.unsubscribe.push(Arc::new(f)));
        self
    }
}

impl<T> SubscriptionHandler for Subscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Object = T;

    fn on_event(&self, query: &Query, event: Event<T>, _client: &Client) {
        for f in self.snapshot(|cb| &cb.event) {
            f(query, &event);
        }
    }

    fn on_error(&self, query: &Query, error: LiveQueryError, _client: &Client) {
        for f in self.snapshot(|cb| &cb.error) {
            f(query, &error);
        }
    }

    fn on_subscribe(&self, query: &Query, _client: &Client) {
        for f in self.snapshot(|cb| &cb.subscribe) {
            f(query);
        }
    }

    fn on_unsubscribe(&self, query: &Query, _client: &Client) {
        for f in self.snapshot(|cb| &cb.unsubscribe) {
            f(query);
        }
    }
}

/// Returned by `subscribe`: owns the handler the client only references weakly.
///
/// Dropping the last handle (and every other clone of the `Arc`) makes the
/// subscription inert: late server messages for it are skipped.
pub struct SubscriptionHandle<H> {
    query: Query,
    handler: Arc<H>,
    client: Client,
}

impl<H> SubscriptionHandle<H> {
    pub(crate) fn new(query: Query, handler: Arc<H>, client: Client) -> Self {
        Self {
            query,
            handler,
            client,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Unsubscribe exactly this query/handler pair.
    pub fn unsubscribe(&self) -> Result<(), LiveQueryError> {
        self.client.unsubscribe_handler(&self.query, &self.handler)
    }
}

impl<H> Deref for SubscriptionHandle<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handler
    }
}
