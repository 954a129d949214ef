//! Connection manager: the node-local registry of attached clients.
//!
//! One owner, two lookup structures: connections are indexed by connection
//! id (the hot path for peer deliveries) and by session id. Insert and
//! remove touch both under the same state lock, so the indexes can never
//! disagree.
//!
//! Inbound client messages are classified here and handed to the validation
//! pipeline; nothing a client sends reaches application code without passing
//! a validator first.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::gateway::events::{GatewayEvent, User};
use crate::gateway::server::SharedState;
use crate::gateway::validate;

/// A frame queued for delivery to a local client socket.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    /// Pre-encoded text written to the client verbatim (tailgator copies).
    Raw(String),
    /// Structured payload, encoded by the configured codec before writing.
    Message(Value),
}

/// One attached client.
#[derive(Debug)]
pub struct Connection {
    /// Node-local connection id.
    pub id: String,
    pub account: String,
    pub session: String,
    /// Addresses receiving a copy of every validated message from this
    /// connection. Captured at bootstrap, grown by `pipe` requests. Strictly
    /// per-connection state.
    pub tail: Vec<String>,
    /// Outbound queue drained by the connection's socket task.
    pub tx: mpsc::UnboundedSender<ClientFrame>,
}

impl Connection {
    pub fn user(&self) -> User {
        User {
            id: self.id.clone(),
            account: self.account.clone(),
            session: self.session.clone(),
        }
    }
}

/// Dual-index registry of local connections.
#[derive(Default)]
pub struct ConnectionManager {
    by_id: HashMap<String, Connection>,
    by_session: HashMap<String, String>,
}

impl ConnectionManager {
    /// Store a connection under both indexes.
    pub fn insert(&mut self, conn: Connection) {
        self.by_session.insert(conn.session.clone(), conn.id.clone());
        self.by_id.insert(conn.id.clone(), conn);
    }

    /// Remove a connection from both indexes. Returns the record so the
    /// caller can unregister it from the directory.
    pub fn remove(&mut self, conn_id: &str) -> Option<Connection> {
        let conn = self.by_id.remove(conn_id)?;
        // Only drop the session index entry if it still points at us; a
        // re-bootstrapped session may have been claimed by a newer connection.
        if self.by_session.get(&conn.session).map(String::as_str) == Some(conn_id) {
            self.by_session.remove(&conn.session);
        }
        Some(conn)
    }

    pub fn get(&self, conn_id: &str) -> Option<&Connection> {
        self.by_id.get(conn_id)
    }

    pub fn get_mut(&mut self, conn_id: &str) -> Option<&mut Connection> {
        self.by_id.get_mut(conn_id)
    }

    pub fn get_by_session(&self, session: &str) -> Option<&Connection> {
        self.by_session
            .get(session)
            .and_then(|id| self.by_id.get(id))
    }

    /// Number of attached connections. Feeds the connections gauge.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}

/// A decoded client message, classified for the pipeline.
#[derive(Debug, PartialEq)]
pub enum ClientMessage {
    /// Event-shaped: `{"event": name, "args": [...]}`.
    Event { name: String, args: Vec<Value> },
    /// Any other object, validated under the `message` event.
    Plain(Value),
}

/// Classify a decoded client payload, or say why its shape is wrong.
pub fn classify_client(value: Value) -> Result<ClientMessage, &'static str> {
    let Some(obj) = value.as_object() else {
        return Err("payload root must be an object");
    };
    match obj.get("event") {
        Some(event) => {
            let Some(name) = event.as_str() else {
                return Err("event name must be a string");
            };
            let args = match obj.get("args") {
                None => Vec::new(),
                Some(Value::Array(args)) => args.clone(),
                Some(_) => return Err("args must be an array"),
            };
            Ok(ClientMessage::Event {
                name: name.to_owned(),
                args,
            })
        }
        None => Ok(ClientMessage::Plain(value)),
    }
}

/// Handle one raw inbound frame from a local client: decode, classify, and
/// hand to the validation pipeline.
pub async fn handle_client_message(state: &SharedState, conn_id: &str, raw: &str) {
    let (codec, events, user) = {
        let st = state.read().await;
        let Some(conn) = st.connections.get(conn_id) else {
            // Raced a close; nothing to deliver to.
            return;
        };
        (st.codec.clone(), st.events.clone(), conn.user())
    };

    let value = match codec.decode(raw) {
        Ok(value) => value,
        Err(reason) => {
            events.dispatch(GatewayEvent::Invalid {
                raw: raw.to_owned(),
                user: Some(user),
                reason,
            });
            return;
        }
    };

    match classify_client(value) {
        Ok(ClientMessage::Event { name, args }) => {
            validate::invoke(state, &name, args, user, raw.to_owned()).await;
        }
        Ok(ClientMessage::Plain(data)) => {
            validate::invoke(state, "message", vec![data], user, raw.to_owned()).await;
        }
        Err(reason) => {
            events.dispatch(GatewayEvent::Invalid {
                raw: raw.to_owned(),
                user: Some(user),
                reason: reason.to_owned(),
            });
        }
    }
}
