//! Decoding of the `object` payload carried by enter/leave/create/update/delete.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LiveQueryError;

const USER_CLASS: &str = "_User";

/// A stored object with no further schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseObject {
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ParseObject {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Turn a wire object into `T`.
///
/// `className` and `objectId` must be present as strings. `sessionToken` is
/// stripped unless the object is a `_User`.
pub fn decode_object<T: DeserializeOwned>(mut object: Map<String, Value>) -> Result<T, LiveQueryError> {
    let class_name = match object.get("className") {
        Some(Value::String(name)) => name.clone(),
        _ => return Err(decode_failure(object, "missing required key `className`")),
    };
    if !matches!(object.get("objectId"), Some(Value::String(_))) {
        return Err(decode_failure(object, "missing required key `objectId`"));
    }
    if class_name != USER_CLASS {
        object.remove("sessionToken");
    }

    let payload = Value::Object(object);
    T::deserialize(&payload).map_err(|e| LiveQueryError::DecodeFailure {
        payload: payload.to_string(),
        reason: e.to_string(),
    })
}

fn decode_failure(object: Map<String, Value>, reason: &str) -> LiveQueryError {
    LiveQueryError::DecodeFailure {
        payload: Value::Object(object).to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[derive(Debug, Deserialize)]
    struct Message {
        #[serde(rename = "objectId")]
        object_id: String,
        text: String,
    }

    #[test]
    fn test_decode_generic_object() {
        let decoded: ParseObject = decode_object(object(
            json!({"className": "Message", "objectId": "abc", "text": "hi"}),
        ))
        .unwrap();
        assert_eq!(decoded.class_name, "Message");
        assert_eq!(decoded.object_id, "abc");
        assert_eq!(decoded.get_str("text"), Some("hi"));
        assert!(decoded.get("className").is_none());
    }

    #[test]
    fn test_decode_typed_object() {
        let decoded: Message = decode_object(object(
            json!({"className": "Message", "objectId": "abc", "text": "hi"}),
        ))
        .unwrap();
        assert_eq!(decoded.object_id, "abc");
        assert_eq!(decoded.text, "hi");
    }

    #[test]
    fn test_missing_class_name() {
        let err = decode_object::<ParseObject>(object(json!({"objectId": "abc"}))).unwrap_err();
        match err {
            LiveQueryError::DecodeFailure { reason, .. } => assert!(reason.contains("className")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_object_id() {
        let err =
            decode_object::<ParseObject>(object(json!({"className": "Message"}))).unwrap_err();
        match err {
            LiveQueryError::DecodeFailure { reason, .. } => assert!(reason.contains("objectId")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_target_type_rejects_payload() {
        let err = decode_object::<Message>(object(
            json!({"className": "Message", "objectId": "abc", "text": 5}),
        ))
        .unwrap_err();
        assert!(matches!(err, LiveQueryError::DecodeFailure { .. }));
    }

    #[test]
    fn test_session_token_only_kept_for_users() {
        let msg: ParseObject = decode_object(object(
            json!({"className": "Message", "objectId": "a", "sessionToken": "r:secret"}),
        ))
        .unwrap();
        assert!(msg.get("sessionToken").is_none());

        let user: ParseObject = decode_object(object(
            json!({"className": "_User", "objectId": "u", "sessionToken": "r:secret"}),
        ))
        .unwrap();
        assert_eq!(user.get_str("sessionToken"), Some("r:secret"));
    }
}
