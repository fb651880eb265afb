//! Live Query - subscription client for server-pushed object lifecycle events
//!
//! Register queries, and the server pushes every object that enters, leaves,
//! is created in, updated in or deleted from their result sets. Subscriptions
//! survive disconnects: after every reconnect the client replays each one
//! with its original request id.
//!
//! # Example
//!
//! ```no_run
//! use live_query::{Client, ClientConfig, EventKind, ParseObject, Query, Subscription};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::new("https://example.com/parse", "myapp");
//!     let client = Client::new(config).unwrap();
//!
//!     let rooms = client
//!         .subscribe(
//!             Query::new("Room").equal_to("name", "lobby"),
//!             Subscription::<ParseObject>::new(),
//!         )
//!         .unwrap();
//!
//!     rooms
//!         .handle(EventKind::Created, |_, room| println!("created {}", room.object_id))
//!         .handle_subscribe(|query| println!("subscribed to {}", query.class_name()));
//!
//!     // Connection-level failures land here.
//!     let mut errors = client.errors();
//!     while let Ok(error) = errors.recv().await {
//!         eprintln!("live query: {error}");
//!     }
//! }
//! ```

mod client;
mod config;
mod connection;
mod dispatch;
mod error;
mod event;
mod handler;
mod object;
pub mod protocol;
mod query;
mod registry;
mod request_id;
mod session;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::{CONFIG_FILE_NAME, ClientConfig, ENV_PREFIX, load_config};
pub use connection::ConnectionState;
pub use error::LiveQueryError;
pub use event::{Event, EventKind};
pub use handler::{Subscription, SubscriptionHandle, SubscriptionHandler};
pub use object::{ParseObject, decode_object};
pub use protocol::{ClientOperation, ServerResponse, decode_response, encode_operation};
pub use query::{GeoPoint, Pointer, Query, encode_date};
pub use registry::SubscriptionInfo;
pub use request_id::{RequestId, RequestIdGenerator};
pub use session::{SessionTokenProvider, StaticSessionToken};
pub use transport::{Socket, SocketEvent, SocketEvents, Transport, WsTransport};
