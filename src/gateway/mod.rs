//! Gateway core: cluster-wide routing fabric and per-node validation plane.
//!
//! Every node runs the same process: an HTTP front door that upgrades client
//! WebSockets, a broadcast endpoint that accepts deliveries from peer nodes,
//! and a shared directory that maps `(account, session)` to the node currently
//! holding that client. Any node can deliver to any client: look the session
//! up in the directory, PUT the message to the owning node, and that node
//! writes it to the local socket.
//!
//! Inbound client messages never reach application code directly: they pass
//! through the validation pipeline first, and only validated messages are
//! emitted downstream and fanned out to tail followers.

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod events;
pub mod metrics;
pub mod server;
pub mod session;
pub mod store;
pub mod validate;
pub mod wire;
