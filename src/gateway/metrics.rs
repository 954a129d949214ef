//! Metric name constants.
//!
//! Call sites use these constants rather than raw strings to prevent typos
//! and keep renaming centralized. Export is the application's choice of
//! `metrics` recorder; the gateway only emits.

/// Current number of attached local connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "primacron_connections_active";
/// Total broadcast envelopes received from peers (counter).
pub const BROADCAST_RECEIVED: &str = "primacron_broadcast_received_total";
/// Total broadcast envelopes sent to peers (counter).
pub const BROADCAST_SENT: &str = "primacron_broadcast_sent_total";
/// Total inbound messages that passed a validator (counter).
pub const MESSAGES_VALIDATED: &str = "primacron_messages_validated_total";
/// Total inbound messages dropped by the pipeline (counter).
pub const MESSAGES_REJECTED: &str = "primacron_messages_rejected_total";
/// Total tailgator copies forwarded to peers (counter).
pub const TAIL_FORWARDS: &str = "primacron_tail_forwards_total";
