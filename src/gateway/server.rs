//! HTTP front door, client socket loop, and shared node state.
//!
//! One axum router serves three surfaces:
//! - the realtime endpoint (WebSocket upgrade, `account` query required),
//! - the broadcast endpoint (HTTP PUT from peer nodes),
//! - a fallback that redirects (when configured) or answers 400.
//!
//! Request classification happens here; the actual work lives in the
//! sibling modules. Peer broadcast responses, and only those, carry the
//! `X-Powered-By` header.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::Router;
use futures::{SinkExt, StreamExt};
use metrics::gauge;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::gateway::broadcast::{self, PeerBroadcaster};
use crate::gateway::codec::Codec;
use crate::gateway::config::GatewayConfig;
use crate::gateway::connection::{self, ClientFrame, Connection, ConnectionManager};
use crate::gateway::directory::SessionDirectory;
use crate::gateway::events::{EventHub, GatewayEvent};
use crate::gateway::metrics as metric;
use crate::gateway::session::{self, SessionIdGenerator};
use crate::gateway::store::DirectoryStore;
use crate::gateway::validate::{self, Completion, PipelineOutcome, ValidatorRegistry};
use crate::gateway::wire::{self, Reply};

/// Everything one node shares between its handlers and tasks.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub codec: Codec,
    pub connections: ConnectionManager,
    pub validators: ValidatorRegistry,
    pub directory: SessionDirectory,
    pub broadcaster: PeerBroadcaster,
    pub events: EventHub,
    pub outcome_tx: mpsc::UnboundedSender<PipelineOutcome>,
    pub session_ids: SessionIdGenerator,
}

/// Shared handle to the node state. The lock serializes mutations to the
/// connection indexes, the validator registry, and each connection's tail
/// list; directory calls, peer HTTP, and socket I/O all happen outside it.
pub type SharedState = Arc<RwLock<GatewayState>>;

impl GatewayState {
    /// Build the shared state and spawn the pipeline dispatcher.
    pub fn shared(config: GatewayConfig, store: DirectoryStore) -> SharedState {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let directory = SessionDirectory::new(store, &config);
        let broadcaster = PeerBroadcaster::new(&config.broadcast);

        let state = Arc::new(RwLock::new(GatewayState {
            codec: Codec::default(),
            connections: ConnectionManager::default(),
            validators: ValidatorRegistry::default(),
            directory,
            broadcaster,
            events: EventHub::new(),
            outcome_tx,
            session_ids: session::default_generator(),
            config,
        }));

        tokio::spawn(validate::run_dispatcher(state.clone(), outcome_rx));
        state
    }

    /// Register an application validator for `event` with the given arity.
    pub fn register_validator(
        &mut self,
        event: &str,
        arity: usize,
        validator: impl Fn(Vec<Option<Value>>, Completion) + Send + Sync + 'static,
    ) {
        self.validators.register(event, arity, validator);
    }

    /// Replace the session-id generator (deployments deriving ids from the
    /// handshake, tests pinning them).
    pub fn set_session_generator(&mut self, generator: SessionIdGenerator) {
        self.session_ids = generator;
    }

    /// Replace the payload codec.
    pub fn set_codec(&mut self, codec: Codec) {
        self.codec = codec;
    }
}

/// Build the node's router. Paths come from the configuration, so the
/// router is assembled at startup rather than declared statically.
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    Router::new()
        .route(&config.endpoint, get(stream_handler))
        .route(&config.broadcast, put(broadcast_handler))
        .fallback(front_door)
        .with_state(state)
}

/// Entry point: pick the directory backend, bind, serve.
pub async fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = match &config.redis_url {
        Some(url) => DirectoryStore::redis(url)?,
        None => {
            info!("no redis url configured, using in-process directory store");
            DirectoryStore::memory()
        }
    };
    let listener = TcpListener::bind(&config.bind).await?;
    let state = GatewayState::shared(config, store);
    serve(state, listener).await
}

/// Serve the gateway on an already-bound listener (tests bind ephemeral
/// ports themselves).
pub async fn serve(
    state: SharedState,
    listener: TcpListener,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (config, events) = {
        let st = state.read().await;
        (st.config.clone(), st.events.clone())
    };
    let addr = listener.local_addr()?;
    let app = build_router(state, &config);

    info!(%addr, endpoint = %config.endpoint, broadcast = %config.broadcast, "listening");
    events.dispatch(GatewayEvent::Listening { addr });

    axum::serve(listener, app).await?;
    events.dispatch(GatewayEvent::Closed);
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Realtime endpoint: upgrade to WebSocket when the handshake carries an
/// `account` query parameter.
async fn stream_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<SharedState>,
) -> Response {
    if !query.contains_key("account") {
        return plain_reply(&wire::BAD_REQUEST);
    }
    ws.on_upgrade(move |socket| handle_client(socket, state, query))
}

/// Broadcast endpoint: accept one envelope from a peer node.
async fn broadcast_handler(State(state): State<SharedState>, body: Bytes) -> Response {
    let reply = match std::str::from_utf8(&body) {
        Ok(text) => broadcast::receive(&state, text).await,
        Err(_) => {
            let events = {
                let st = state.read().await;
                st.events.clone()
            };
            events.dispatch(GatewayEvent::Invalid {
                raw: String::from_utf8_lossy(&body).into_owned(),
                user: None,
                reason: "body is not valid UTF-8".to_owned(),
            });
            &wire::BROKEN
        }
    };
    broadcast_reply(reply)
}

/// Everything the router couldn't place.
async fn front_door(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    // A WebSocket upgrade on the wrong path cannot be redirected; close
    // without a body.
    if is_websocket_upgrade(&headers) {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let redirect = {
        let st = state.read().await;
        st.config.redirect.clone()
    };
    match redirect {
        Some(url) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, url)]).into_response(),
        None => plain_reply(&wire::BAD_REQUEST),
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Canned reply with the broadcast endpoint's `X-Powered-By` stamp.
fn broadcast_reply(reply: &Reply) -> Response {
    (
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_REQUEST),
        [
            ("content-type", "application/json"),
            ("x-powered-by", wire::POWERED_BY),
        ],
        reply.body.clone(),
    )
        .into_response()
}

/// Canned reply for every other surface; no `X-Powered-By` here.
fn plain_reply(reply: &Reply) -> Response {
    (
        StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_REQUEST),
        [("content-type", "application/json")],
        reply.body.clone(),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Client socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_client(socket: WebSocket, state: SharedState, query: HashMap<String, String>) {
    let Some(account) = query.get("account").cloned() else {
        // stream_handler already enforced this; nothing sane to do here.
        return;
    };
    let conn_id = Uuid::new_v4().to_string();

    // Bootstrap. The handshake query is parsed by the time the upgrade
    // callback runs, so the ordering constraint is already satisfied.
    let (session, tail) = session::bootstrap(&state, &conn_id, &account, &query).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (codec, attached) = {
        let mut st = state.write().await;
        st.connections.insert(Connection {
            id: conn_id.clone(),
            account: account.clone(),
            session: session.clone(),
            tail,
            tx,
        });
        (st.codec.clone(), st.connections.len())
    };
    gauge!(metric::CONNECTIONS_ACTIVE).set(attached as f64);
    info!(conn = %conn_id, account = %account, session = %session, clients = attached, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Piggy-back the session/account pair on the handshake so the client
    // learns its directory identity.
    let hello = serde_json::json!({ "account": account, "session": session });
    let hello_ok = match codec.encode(&hello) {
        Ok(text) => ws_tx.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!(conn = %conn_id, error = %e, "handshake frame encode failed");
            true
        }
    };

    if hello_ok {
        loop {
            tokio::select! {
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            connection::handle_client_message(&state, &conn_id, &text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            warn!(conn = %conn_id, error = %e, "client read error");
                            break;
                        }
                        _ => {} // Binary, Ping, Pong
                    }
                }

                frame = rx.recv() => {
                    match frame {
                        Some(ClientFrame::Raw(text)) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(ClientFrame::Message(value)) => {
                            match codec.encode(&value) {
                                Ok(text) => {
                                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(conn = %conn_id, error = %e, "outbound encode failed");
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }

    // Teardown: both indexes first, then the directory entry. A failed
    // delete lapses via TTL instead.
    let (directory, events, attached) = {
        let mut st = state.write().await;
        st.connections.remove(&conn_id);
        (st.directory.clone(), st.events.clone(), st.connections.len())
    };
    gauge!(metric::CONNECTIONS_ACTIVE).set(attached as f64);

    if let Err(e) = directory.unregister(&account, &session, &conn_id).await {
        warn!(conn = %conn_id, error = %e, "directory unregister failed");
        events.dispatch(GatewayEvent::DisconnectFailed {
            key: directory.session_key(&account, &session),
        });
    }
    info!(conn = %conn_id, account = %account, clients = attached, "client disconnected");
}
