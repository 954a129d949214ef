//! Gateway configuration: env-driven, with working defaults for a single
//! local node.
//!
//! Every option can be set through a `PRIMACRON_*` environment variable.
//! `address`/`port` form the externally reachable URL peers use to deliver
//! messages to this node; `bind` is the local listen socket and may differ
//! (e.g. behind NAT or a container port mapping).

use std::time::Duration;

/// Default session entry TTL in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Runtime configuration for one gateway node.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HTTP path peers PUT broadcast envelopes to.
    pub broadcast: String,
    /// HTTP path clients connect their realtime transport to.
    pub endpoint: String,
    /// Redirect target for unmatched requests. `None` → plain 400.
    pub redirect: Option<String>,
    /// Key prefix in the shared directory. All nodes of one cluster MUST
    /// agree on this; a mismatch silently partitions them.
    pub namespace: String,
    /// Session entry TTL in seconds.
    pub timeout: u64,
    /// Externally reachable hostname of this node.
    pub address: String,
    /// Externally reachable port, if not implied by the address.
    pub port: Option<u16>,
    /// Local listen socket.
    pub bind: String,
    /// Redis connection URL for the shared directory. `None` → in-process
    /// memory store (single-node operation and tests).
    pub redis_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            broadcast: "/primacron/broadcast".into(),
            endpoint: "/stream/".into(),
            redirect: None,
            namespace: "primacron".into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            address: "localhost".into(),
            port: None,
            bind: "0.0.0.0:8080".into(),
            redis_url: None,
        }
    }
}

impl GatewayConfig {
    /// Build a configuration from `PRIMACRON_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broadcast: env_or("PRIMACRON_BROADCAST", defaults.broadcast),
            endpoint: env_or("PRIMACRON_ENDPOINT", defaults.endpoint),
            redirect: std::env::var("PRIMACRON_REDIRECT").ok(),
            namespace: env_or("PRIMACRON_NAMESPACE", defaults.namespace),
            timeout: std::env::var("PRIMACRON_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            address: env_or("PRIMACRON_ADDRESS", defaults.address),
            port: std::env::var("PRIMACRON_PORT")
                .ok()
                .and_then(|v| v.parse().ok()),
            bind: env_or("PRIMACRON_BIND", defaults.bind),
            redis_url: std::env::var("PRIMACRON_REDIS_URL").ok(),
        }
    }

    /// The URL peers use to reach this node's HTTP endpoints.
    ///
    /// `"http://" + address`, with `":" + port` appended when a port is set.
    pub fn node_url(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.address, port),
            None => format!("http://{}", self.address),
        }
    }

    /// Session TTL as a [`Duration`].
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.broadcast, "/primacron/broadcast");
        assert_eq!(cfg.endpoint, "/stream/");
        assert_eq!(cfg.namespace, "primacron");
        assert_eq!(cfg.timeout, 900);
        assert!(cfg.redirect.is_none());
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn node_url_without_port() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.node_url(), "http://localhost");
    }

    #[test]
    fn node_url_with_port() {
        let cfg = GatewayConfig {
            address: "node-a.example".into(),
            port: Some(8080),
            ..Default::default()
        };
        assert_eq!(cfg.node_url(), "http://node-a.example:8080");
    }
}
