//! Queries as the live query server sees them: a class name plus a `where` clause.
//!
//! The predicate language itself is not modelled here. The `where` map is
//! passed through as JSON; the helpers below only encode the typed values the
//! server expects inside it (geo points, pointers, dates).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::LiveQueryError;
use crate::handler::{Subscription, SubscriptionHandle};

/// A query registered for live updates.
///
/// Two queries are equal when their class names and `where` maps are equal;
/// this is what unsubscribe-by-query matches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(rename = "className")]
    class_name: String,
    #[serde(rename = "where", default)]
    conditions: Map<String, Value>,
}

impl Query {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            conditions: Map::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn conditions(&self) -> &Map<String, Value> {
        &self.conditions
    }

    /// Match objects whose `key` equals `value`.
    pub fn equal_to(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_condition(key, value)
    }

    /// Set the raw condition for `key`, e.g. `{"$gt": 3}`.
    pub fn with_condition(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Replace the whole `where` clause.
    pub fn with_where(mut self, conditions: Map<String, Value>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Wire form sent in a `subscribe` operation: `{"className": .., "where": ..}`.
    pub fn encode(&self) -> Value {
        json!({
            "className": self.class_name,
            "where": self.conditions,
        })
    }

    /// Subscribe this query on the shared client with a default handler.
    pub fn subscribe<T>(&self) -> Result<SubscriptionHandle<Subscription<T>>, LiveQueryError>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        crate::client::Client::shared()?.subscribe(self.clone(), Subscription::new())
    }
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<GeoPoint> for Value {
    fn from(point: GeoPoint) -> Self {
        json!({
            "__type": "GeoPoint",
            "latitude": point.latitude,
            "longitude": point.longitude,
        })
    }
}

/// Reference to another stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub class_name: String,
    pub object_id: String,
}

impl Pointer {
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }
}

impl From<Pointer> for Value {
    fn from(pointer: Pointer) -> Self {
        json!({
            "__type": "Pointer",
            "className": pointer.class_name,
            "objectId": pointer.object_id,
        })
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-03-01T12:00:00.000Z`.
pub fn encode_date(date: DateTime<Utc>) -> Value {
    Value::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}
