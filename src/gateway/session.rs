//! Session bootstrap: runs once per new client connection, after the
//! handshake query has been parsed.
//!
//! The underlying realtime libraries this gateway grew up around fire their
//! "open" callback before the request's query state exists, forcing a
//! scheduler-tick deferral. Here the upgrade callback only runs with the
//! parsed query in hand, so the extractor itself is the "query ready"
//! signal and bootstrap can run first thing in the socket task.

use std::collections::HashMap;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

use crate::gateway::events::GatewayEvent;
use crate::gateway::server::SharedState;

/// Pluggable session-id generator. Receives the parsed handshake query so a
/// deployment can derive ids from it (or pin them, as tests do).
pub type SessionIdGenerator = Arc<dyn Fn(&HashMap<String, String>) -> String + Send + Sync>;

/// Four random alphanumeric blocks joined by `-`,
/// e.g. `"x7Kq2mZp-9fBv1cDw-..."`.
pub fn random_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..4)
        .map(|_| {
            (&mut rng)
                .sample_iter(Alphanumeric)
                .take(8)
                .map(char::from)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// The default generator: ignore the query, mint a random id.
pub fn default_generator() -> SessionIdGenerator {
    Arc::new(|_query| random_session_id())
}

/// Generate a session id, register the connection in the directory, and
/// return `(session, tailgators)`.
///
/// A directory failure is reported on the error channel but does not tear
/// the connection down; the client stays attached, just unreachable from
/// other nodes until a re-register succeeds.
pub async fn bootstrap(
    state: &SharedState,
    conn_id: &str,
    account: &str,
    query: &HashMap<String, String>,
) -> (String, Vec<String>) {
    let (generator, directory, events) = {
        let st = state.read().await;
        (st.session_ids.clone(), st.directory.clone(), st.events.clone())
    };

    let session = generator(query);

    match directory.register(account, &session, conn_id).await {
        Ok(tail) => (session, tail),
        Err(e) => {
            let key = directory.session_key(account, &session);
            let value = directory.own_address(conn_id);
            warn!(key = %key, error = %e, "bootstrap: directory register failed");
            events.dispatch(GatewayEvent::ConnectFailed { key, value });
            (session, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_have_four_blocks() {
        let id = random_session_id();
        let blocks: Vec<&str> = id.split('-').collect();
        assert_eq!(blocks.len(), 4);
        for block in blocks {
            assert_eq!(block.len(), 8);
            assert!(block.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(random_session_id(), random_session_id());
    }

    #[test]
    fn default_generator_ignores_query() {
        let gen = default_generator();
        let query = HashMap::from([("account".to_owned(), "foo".to_owned())]);
        let id = gen(&query);
        assert!(!id.contains("foo"));
    }
}
