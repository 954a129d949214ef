//! Inter-node wire types: the broadcast envelope and the canned HTTP
//! replies of the broadcast endpoint.
//!
//! The envelope is deliberately tiny: a target connection id and an opaque
//! message. Anything else a peer sends is a shape error. Reply bodies are
//! serialized once at startup and reused verbatim for every response.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `X-Powered-By` value stamped on every broadcast-endpoint response (and on
/// no other response).
pub const POWERED_BY: &str = concat!("primacron/", env!("CARGO_PKG_VERSION"));

/// The node-to-node delivery envelope.
///
/// The top level must be a JSON object carrying exactly these two keys;
/// arrays, primitives, and objects missing either key are rejected before
/// any dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    /// Target connection id on the receiving node.
    pub id: String,
    /// Opaque payload; its runtime type selects the local dispatch.
    pub message: Value,
}

/// Why an already-decoded value is not a valid envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Root is an array or primitive.
    NotObject,
    /// Root object is missing `id` or `message` (or `id` is not a string).
    MissingKeys,
}

impl BroadcastEnvelope {
    pub fn new(id: impl Into<String>, message: Value) -> Self {
        Self { id: id.into(), message }
    }

    /// Validate the decoded payload shape and pull the envelope out of it.
    pub fn from_value(value: &Value) -> Result<Self, EnvelopeError> {
        let obj = value.as_object().ok_or(EnvelopeError::NotObject)?;
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingKeys)?;
        let message = obj.get("message").ok_or(EnvelopeError::MissingKeys)?;
        Ok(Self {
            id: id.to_owned(),
            message: message.clone(),
        })
    }
}

/// One canned broadcast-endpoint reply: the HTTP status it drives plus the
/// pre-serialized `{status, type, description}` body.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub kind: &'static str,
    pub body: String,
}

impl Reply {
    fn new(status: u16, kind: &'static str, description: &'static str) -> Self {
        let body = serde_json::json!({
            "status": status,
            "type": kind,
            "description": description,
        })
        .to_string();
        Self { status, kind, body }
    }
}

/// 200: envelope accepted and dispatched to the local connection.
pub static SENDING: LazyLock<Reply> =
    LazyLock::new(|| Reply::new(200, "sending", "Message is being delivered to the connection."));

/// 400: the request body did not survive the codec.
pub static BROKEN: LazyLock<Reply> =
    LazyLock::new(|| Reply::new(400, "broken", "Received payload could not be decoded."));

/// 400: decoded fine, but the envelope shape is wrong.
pub static INVALID: LazyLock<Reply> = LazyLock::new(|| {
    Reply::new(400, "invalid", "Payload must be an object with id and message keys.")
});

/// 404: no such connection on this node (commonly the session migrated).
pub static UNKNOWN_SOCKET: LazyLock<Reply> = LazyLock::new(|| {
    Reply::new(404, "unknown socket", "The requested connection is not attached to this node.")
});

/// 400: catch-all for everything the front door cannot place.
pub static BAD_REQUEST: LazyLock<Reply> =
    LazyLock::new(|| Reply::new(400, "bad request", "Request not understood by this gateway."));

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trip() {
        let env = BroadcastEnvelope::new("conn-1", json!("hi"));
        let raw = serde_json::to_string(&env).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        let decoded = BroadcastEnvelope::from_value(&value).unwrap();
        assert_eq!(decoded.id, "conn-1");
        assert_eq!(decoded.message, json!("hi"));
    }

    #[test]
    fn envelope_rejects_array_root() {
        assert_eq!(
            BroadcastEnvelope::from_value(&json!(["id", "message"])),
            Err(EnvelopeError::NotObject)
        );
    }

    #[test]
    fn envelope_rejects_primitive_root() {
        assert_eq!(
            BroadcastEnvelope::from_value(&json!("hi")),
            Err(EnvelopeError::NotObject)
        );
        assert_eq!(
            BroadcastEnvelope::from_value(&json!(42)),
            Err(EnvelopeError::NotObject)
        );
    }

    #[test]
    fn envelope_rejects_missing_keys() {
        assert_eq!(
            BroadcastEnvelope::from_value(&json!({"id": "x"})),
            Err(EnvelopeError::MissingKeys)
        );
        assert_eq!(
            BroadcastEnvelope::from_value(&json!({"message": "x"})),
            Err(EnvelopeError::MissingKeys)
        );
    }

    #[test]
    fn envelope_rejects_non_string_id() {
        assert_eq!(
            BroadcastEnvelope::from_value(&json!({"id": 7, "message": "x"})),
            Err(EnvelopeError::MissingKeys)
        );
    }

    #[test]
    fn envelope_ignores_extra_keys() {
        let value = json!({"id": "x", "message": null, "hops": 3});
        let env = BroadcastEnvelope::from_value(&value).unwrap();
        assert_eq!(env.id, "x");
        assert_eq!(env.message, Value::Null);
    }

    #[test]
    fn replies_carry_status_in_body() {
        for reply in [&*SENDING, &*BROKEN, &*INVALID, &*UNKNOWN_SOCKET, &*BAD_REQUEST] {
            let body: Value = serde_json::from_str(&reply.body).unwrap();
            assert_eq!(body["status"], json!(reply.status));
            assert_eq!(body["type"], json!(reply.kind));
            assert!(body["description"].is_string());
        }
    }

    #[test]
    fn reply_statuses() {
        assert_eq!(SENDING.status, 200);
        assert_eq!(BROKEN.status, 400);
        assert_eq!(INVALID.status, 400);
        assert_eq!(UNKNOWN_SOCKET.status, 404);
        assert_eq!(BAD_REQUEST.status, 400);
    }

    #[test]
    fn powered_by_names_gateway_and_version() {
        assert!(POWERED_BY.starts_with("primacron/"));
        assert!(POWERED_BY.len() > "primacron/".len());
    }
}
