//! Routes decoded server responses to subscription handlers.

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::LiveQueryError;
use crate::protocol::{ServerResponse, decode_response, request_id_hint};
use crate::registry::SubscriptionRegistry;
use crate::request_id::RequestId;

/// Capacity of the connection-level error broadcast.
pub(crate) const ERROR_SINK_CAPACITY: usize = 64;

/// Connection-level error sink: logged, then broadcast to `Client::errors()`.
#[derive(Clone)]
pub(crate) struct ErrorSink {
    tx: broadcast::Sender<LiveQueryError>,
}

impl ErrorSink {
    pub(crate) fn new(tx: broadcast::Sender<LiveQueryError>) -> Self {
        Self { tx }
    }

    pub(crate) fn report(&self, error: LiveQueryError) {
        warn!(error = %error, "live query error");
        // No receivers is fine; the log line above is the record.
        let _ = self.tx.send(error);
    }
}

/// What the worker must do after a response has been dispatched.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Followup {
    Nothing,
    /// The server acknowledged `connect`: open the connection and replay every record.
    Resubscribe,
}

pub(crate) struct EventDispatcher {
    client: Client,
    sink: ErrorSink,
}

impl EventDispatcher {
    pub(crate) fn new(client: Client, sink: ErrorSink) -> Self {
        Self { client, sink }
    }

    pub(crate) fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    /// Decode one inbound frame and dispatch it.
    pub(crate) fn handle_text(&self, raw: &str, registry: &mut SubscriptionRegistry) -> Followup {
        match decode_response(raw) {
            Ok(response) => self.dispatch(response, registry),
            Err(error) => {
                self.route_error(request_id_hint(raw), error, registry);
                Followup::Nothing
            }
        }
    }

    pub(crate) fn dispatch(
        &self,
        response: ServerResponse,
        registry: &mut SubscriptionRegistry,
    ) -> Followup {
        match response {
            ServerResponse::Connected => {
                debug!("server acknowledged connect");
                return Followup::Resubscribe;
            }
            ServerResponse::Redirect { url } => {
                warn!(url = %url, "ignoring redirect from live query server");
            }
            ServerResponse::Subscribed { request_id } => {
                debug!(%request_id, "subscribed");
                if let Some(record) = registry.find(request_id)
                    && !record.handler.on_subscribe(&record.query, &self.client)
                {
                    released(request_id, "subscribed");
                }
            }
            ServerResponse::Unsubscribed { request_id } => {
                debug!(%request_id, "unsubscribed");
                if let Some(record) = registry.remove(request_id)
                    && !record.handler.on_unsubscribe(&record.query, &self.client)
                {
                    released(request_id, "unsubscribed");
                }
            }
            ServerResponse::Event {
                kind,
                request_id,
                object,
            } => {
                let Some(record) = registry.find(request_id) else {
                    debug!(%request_id, op = kind.op(), "event for unknown or released subscription");
                    return Followup::Nothing;
                };
                match record
                    .handler
                    .on_event(kind, object, &record.query, &self.client)
                {
                    Ok(true) => {}
                    Ok(false) => released(request_id, kind.op()),
                    Err(error) => {
                        warn!(%request_id, error = %error, "failed to decode event object");
                        if !record.handler.on_error(error, &record.query, &self.client) {
                            released(request_id, "error");
                        }
                    }
                }
            }
            ServerResponse::Error {
                request_id,
                code,
                message,
                reconnect,
            } => {
                let error = LiveQueryError::ServerReported {
                    code,
                    message,
                    reconnect,
                };
                self.route_error(request_id, error, registry);
            }
        }
        Followup::Nothing
    }

    /// Deliver to the live record for `request_id`, skip it if its handler
    /// is gone, or report to the sink when nothing is correlated.
    fn route_error(
        &self,
        request_id: Option<RequestId>,
        error: LiveQueryError,
        registry: &SubscriptionRegistry,
    ) {
        let Some(request_id) = request_id.filter(|id| registry.contains(*id)) else {
            self.sink.report(error);
            return;
        };
        match registry.find(request_id) {
            Some(record) => {
                debug!(%request_id, error = %error, "subscription error");
                if !record.handler.on_error(error, &record.query, &self.client) {
                    released(request_id, "error");
                }
            }
            None => released(request_id, "error"),
        }
    }
}

fn released(request_id: RequestId, op: &str) {
    debug!(%request_id, op, "handler released; skipping");
}
