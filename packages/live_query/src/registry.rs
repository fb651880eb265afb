//! Subscription registry: the ordered table of (query, request id, handler) records.
//!
//! Handlers are stored weakly and type-erased at subscribe time, so dispatch
//! needs no per-message type resolution. A record whose handler has been
//! dropped is dead: lookups skip it and its callbacks never run.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::LiveQueryError;
use crate::event::{Event, EventKind};
use crate::handler::SubscriptionHandler;
use crate::object::decode_object;
use crate::query::Query;
use crate::request_id::{RequestId, RequestIdGenerator};

/// Identity of a handler allocation, used for unsubscribe-by-(query, handler).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct HandlerId(usize);

impl HandlerId {
    pub(crate) fn of<H: ?Sized>(handler: &Arc<H>) -> Self {
        Self(Arc::as_ptr(handler).cast::<()>() as usize)
    }
}

/// Callback table bound to one concrete handler type.
pub(crate) trait ErasedHandler: Send {
    fn is_alive(&self) -> bool;

    fn is(&self, id: HandlerId) -> bool;

    /// Decode `object` and deliver the event. `Ok(false)` if the handler is gone.
    fn on_event(
        &self,
        kind: EventKind,
        object: Map<String, Value>,
        query: &Query,
        client: &Client,
    ) -> Result<bool, LiveQueryError>;

    fn on_error(&self, error: LiveQueryError, query: &Query, client: &Client) -> bool;

    fn on_subscribe(&self, query: &Query, client: &Client) -> bool;

    fn on_unsubscribe(&self, query: &Query, client: &Client) -> bool;
}

pub(crate) struct WeakHandler<H> {
    handler: Weak<H>,
}

impl<H: SubscriptionHandler> WeakHandler<H> {
    pub(crate) fn new(handler: &Arc<H>) -> Self {
        Self {
            handler: Arc::downgrade(handler),
        }
    }
}

impl<H: SubscriptionHandler> ErasedHandler for WeakHandler<H> {
    fn is_alive(&self) -> bool {
        self.handler.strong_count() > 0
    }

    fn is(&self, id: HandlerId) -> bool {
        self.is_alive() && HandlerId(self.handler.as_ptr().cast::<()>() as usize) == id
    }

    fn on_event(
        &self,
        kind: EventKind,
        object: Map<String, Value>,
        query: &Query,
        client: &Client,
    ) -> Result<bool, LiveQueryError> {
        let Some(handler) = self.handler.upgrade() else {
            return Ok(false);
        };
        let object = decode_object::<H::Object>(object)?;
        handler.on_event(query, Event::new(kind, object), client);
        Ok(true)
    }

    fn on_error(&self, error: LiveQueryError, query: &Query, client: &Client) -> bool {
        match self.handler.upgrade() {
            Some(handler) => {
                handler.on_error(query, error, client);
                true
            }
            None => false,
        }
    }

    fn on_subscribe(&self, query: &Query, client: &Client) -> bool {
        match self.handler.upgrade() {
            Some(handler) => {
                handler.on_subscribe(query, client);
                true
            }
            None => false,
        }
    }

    fn on_unsubscribe(&self, query: &Query, client: &Client) -> bool {
        match self.handler.upgrade() {
            Some(handler) => {
                handler.on_unsubscribe(query, client);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct SubscriptionRecord {
    pub(crate) query: Query,
    pub(crate) request_id: RequestId,
    pub(crate) handler: Box<dyn ErasedHandler>,
}

impl SubscriptionRecord {
    pub(crate) fn is_live(&self) -> bool {
        self.handler.is_alive()
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub request_id: RequestId,
    pub query: Query,
    /// False once the handler has been dropped.
    pub live: bool,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    ids: RequestIdGenerator,
    records: Vec<SubscriptionRecord>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a record and return its freshly allocated id.
    pub(crate) fn add(&mut self, query: Query, handler: Box<dyn ErasedHandler>) -> RequestId {
        let request_id = self.ids.next_id();
        self.records.push(SubscriptionRecord {
            query,
            request_id,
            handler,
        });
        request_id
    }

    /// The live record for `request_id`, if any.
    pub(crate) fn find(&self, request_id: RequestId) -> Option<&SubscriptionRecord> {
        self.records
            .iter()
            .find(|r| r.request_id == request_id)
            .filter(|r| r.is_live())
    }

    /// True if any record, live or dead, carries `request_id`.
    pub(crate) fn contains(&self, request_id: RequestId) -> bool {
        self.records.iter().any(|r| r.request_id == request_id)
    }

    /// Remove the record for `request_id` whether or not it is live.
    pub(crate) fn remove(&mut self, request_id: RequestId) -> Option<SubscriptionRecord> {
        let index = self.records.iter().position(|r| r.request_id == request_id)?;
        Some(self.records.remove(index))
    }

    /// Ids of every record matching `predicate`, in insertion order.
    pub(crate) fn matching(&self, predicate: impl Fn(&SubscriptionRecord) -> bool) -> Vec<RequestId> {
        self.records
            .iter()
            .filter(|r| predicate(r))
            .map(|r| r.request_id)
            .collect()
    }

    /// All records in insertion order, the order they are replayed on reconnect.
    pub(crate) fn records(&self) -> impl Iterator<Item = &SubscriptionRecord> {
        self.records.iter()
    }

    pub(crate) fn snapshot(&self) -> Vec<SubscriptionInfo> {
        self.records
            .iter()
            .map(|r| SubscriptionInfo {
                request_id: r.request_id,
                query: r.query.clone(),
                live: r.is_live(),
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}
