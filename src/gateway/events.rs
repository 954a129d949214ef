//! Typed observability channel for gateway events.
//!
//! The wire protocol speaks in dotted event names (`validate::<event>`,
//! `stream::<event>`, `error::invalid`, ...). Those names exist only at the
//! boundary; internally everything routes as tagged variants over a single
//! `tokio::sync::broadcast` hub. Each observer subscribes and filters
//! locally. Slow receivers that fall behind skip messages (`RecvError::Lagged`).

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel.
const EVENT_CAPACITY: usize = 4096;

/// The authenticated principal behind one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Node-local connection id.
    pub id: String,
    /// Account identifier supplied (and validated upstream) at handshake.
    pub account: String,
    /// Session id assigned at bootstrap.
    pub session: String,
}

/// Everything a node reports about itself.
///
/// `Stream` is the only variant application code should act on: it fires
/// exactly once per successful validator completion and is the sole channel
/// from raw input to application-visible message.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The HTTP front door is accepting connections.
    Listening { addr: SocketAddr },
    /// The server loop ended.
    Closed,
    /// Writing the session entry to the directory failed; the connection
    /// stays up but is unreachable across nodes.
    ConnectFailed { key: String, value: String },
    /// Deleting the session entry at teardown failed; the entry will lapse
    /// via TTL instead.
    DisconnectFailed { key: String },
    /// A peer or client sent something undecodable or mis-shaped.
    Invalid {
        raw: String,
        user: Option<User>,
        reason: String,
    },
    /// A message was dropped before any delivery: no validator, validator
    /// declined, or validator errored.
    ValidationFailed {
        event: String,
        user: User,
        raw: String,
        reason: String,
    },
    /// A validated application emission (`stream::<event>` at the boundary).
    Stream {
        event: String,
        data: Vec<Value>,
        raw: String,
        user: User,
    },
}

/// The node-wide event hub. Cloneable; lives in shared state.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Arc<GatewayEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the hub. Each observer calls this once for its own
    /// receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all observers.
    pub fn dispatch(&self, event: GatewayEvent) {
        // send() errors when there are no receivers. That's fine.
        let _ = self.sender.send(Arc::new(event));
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_reaches_subscriber() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        hub.dispatch(GatewayEvent::Closed);
        let event = rx.recv().await.unwrap();
        assert!(matches!(*event, GatewayEvent::Closed));
    }

    #[tokio::test]
    async fn dispatch_without_subscribers_is_silent() {
        let hub = EventHub::new();
        hub.dispatch(GatewayEvent::Closed); // must not panic
    }
}
