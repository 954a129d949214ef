//! Peer broadcast: both directions of node-to-node delivery.
//!
//! Outbound: `forward()` PUTs a broadcast envelope to a peer's broadcast
//! endpoint and classifies the response. No retries at this layer; the
//! caller decides.
//!
//! Inbound: `receive()` runs the full acceptance pipeline for a peer PUT
//! (codec decode, envelope shape, local-connection lookup) and dispatches
//! the message by its runtime type: a string is a tailgator copy written to
//! the client verbatim, an array grows the connection's tail list, anything
//! else is a generic message frame.

use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::gateway::connection::ClientFrame;
use crate::gateway::error::GatewayError;
use crate::gateway::events::GatewayEvent;
use crate::gateway::metrics as metric;
use crate::gateway::server::SharedState;
use crate::gateway::wire::{self, BroadcastEnvelope, EnvelopeError, Reply};

/// Outbound node-to-node delivery over HTTP PUT.
#[derive(Clone)]
pub struct PeerBroadcaster {
    http: reqwest::Client,
    path: String,
}

impl PeerBroadcaster {
    pub fn new(broadcast_path: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            path: broadcast_path.to_owned(),
        }
    }

    /// PUT `{"id": conn_id, "message": message}` to `peer_url`'s broadcast
    /// endpoint.
    ///
    /// 200 → `Ok(body)`. Any other status → `PeerDelivery` carrying the
    /// status and body. Transport failure → `PeerDelivery` with no status.
    pub async fn forward(
        &self,
        peer_url: &str,
        conn_id: &str,
        message: Value,
    ) -> Result<String, GatewayError> {
        let url = format!("{}{}", peer_url.trim_end_matches('/'), self.path);
        let envelope = BroadcastEnvelope::new(conn_id, message);

        let response = self
            .http
            .put(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| GatewayError::PeerDelivery {
                status: None,
                body: Some(e.to_string()),
            })?;

        counter!(metric::BROADCAST_SENT).increment(1);

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::OK {
            Ok(body)
        } else {
            Err(GatewayError::PeerDelivery {
                status: Some(status.as_u16()),
                body: (!body.is_empty()).then_some(body),
            })
        }
    }
}

/// Follow `(account, session)` from a local connection: every message that
/// session validates from now on is copied to `follower_conn`.
///
/// The follower address goes into the directory set so the next bootstrap of
/// the session picks it up, and is also forwarded to the node currently
/// holding the session so a live connection grows its tail immediately. A
/// 404 from that node means the entry was stale (session migrated or gone),
/// a soft miss, not an error; the directory write already took effect.
pub async fn pipe(
    state: &SharedState,
    follower_conn: &str,
    account: &str,
    session: &str,
) -> Result<(), GatewayError> {
    let (directory, broadcaster) = {
        let st = state.read().await;
        (st.directory.clone(), st.broadcaster.clone())
    };

    let follower = directory.own_address(follower_conn);
    directory.add_tailgator(account, session, &follower).await?;

    let Some(owner) = directory.lookup(account, session).await? else {
        // Session offline; the set entry waits for its next bootstrap.
        return Ok(());
    };

    match broadcaster
        .forward(&owner.node_url, &owner.conn_id, Value::Array(vec![Value::String(follower)]))
        .await
    {
        Ok(_) => Ok(()),
        Err(GatewayError::PeerDelivery { status: Some(404), .. }) => {
            debug!(account = %account, session = %session, "pipe: owner entry was stale");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// How an inbound envelope's `message` reaches the local connection.
#[derive(Debug, PartialEq)]
pub enum Delivery {
    /// String payload: written to the client verbatim.
    Pipe(String),
    /// Array payload: addresses appended to the connection's tail list.
    Tail(Vec<String>),
    /// Anything else: delivered as a generic message frame.
    Message(Value),
}

/// Classify an envelope payload by its runtime type.
pub fn classify(message: Value) -> Delivery {
    match message {
        Value::String(raw) => Delivery::Pipe(raw),
        Value::Array(members) => Delivery::Tail(
            members
                .into_iter()
                .filter_map(|m| match m {
                    Value::String(addr) => Some(addr),
                    _ => None,
                })
                .collect(),
        ),
        other => Delivery::Message(other),
    }
}

/// Accept one peer PUT body and dispatch it to the targeted local
/// connection. Returns the canned reply to answer with.
pub async fn receive(state: &SharedState, body: &str) -> &'static Reply {
    counter!(metric::BROADCAST_RECEIVED).increment(1);

    let (codec, events) = {
        let st = state.read().await;
        (st.codec.clone(), st.events.clone())
    };

    let value = match codec.decode(body) {
        Ok(value) => value,
        Err(reason) => {
            events.dispatch(GatewayEvent::Invalid {
                raw: body.to_owned(),
                user: None,
                reason,
            });
            return &wire::BROKEN;
        }
    };

    let envelope = match BroadcastEnvelope::from_value(&value) {
        Ok(envelope) => envelope,
        Err(shape) => {
            let reason = match shape {
                EnvelopeError::NotObject => "payload root must be an object",
                EnvelopeError::MissingKeys => "payload must carry id and message keys",
            };
            events.dispatch(GatewayEvent::Invalid {
                raw: body.to_owned(),
                user: None,
                reason: reason.to_owned(),
            });
            return &wire::INVALID;
        }
    };

    let mut st = state.write().await;
    let Some(conn) = st.connections.get_mut(&envelope.id) else {
        // The session usually just migrated to another node; the sender
        // observes the 404 and consults the directory again. Not an error.
        debug!(id = %envelope.id, "broadcast: no such local connection");
        return &wire::UNKNOWN_SOCKET;
    };

    match classify(envelope.message) {
        Delivery::Pipe(raw) => {
            let _ = conn.tx.send(ClientFrame::Raw(raw));
        }
        Delivery::Tail(members) => {
            for addr in members {
                if !conn.tail.contains(&addr) {
                    conn.tail.push(addr);
                }
            }
        }
        Delivery::Message(payload) => {
            let _ = conn.tx.send(ClientFrame::Message(payload));
        }
    }

    &wire::SENDING
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_string_is_pipe() {
        assert_eq!(classify(json!("hi")), Delivery::Pipe("hi".into()));
    }

    #[test]
    fn classify_array_is_tail() {
        assert_eq!(
            classify(json!(["http://a@1", "http://b@2"])),
            Delivery::Tail(vec!["http://a@1".into(), "http://b@2".into()])
        );
    }

    #[test]
    fn classify_array_skips_non_strings() {
        assert_eq!(
            classify(json!(["http://a@1", 7, null])),
            Delivery::Tail(vec!["http://a@1".into()])
        );
    }

    #[test]
    fn classify_object_is_message() {
        assert_eq!(
            classify(json!({"text": "hi"})),
            Delivery::Message(json!({"text": "hi"}))
        );
    }

    #[test]
    fn classify_number_is_message() {
        assert_eq!(classify(json!(42)), Delivery::Message(json!(42)));
    }
}
