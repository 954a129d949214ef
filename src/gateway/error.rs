//! Gateway error types.
//!
//! These cover the two fallible seams the gateway owns: the shared directory
//! and peer HTTP delivery. Per-message failures (codec, shape, validation)
//! are not errors to the caller; they drop the message and surface on the
//! observability channel instead. Nothing here is retried automatically;
//! recovery is delegated to the TTL on directory entries and to the calling
//! application.

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A shared-directory operation failed. `key` names the entry involved.
    #[error("directory operation failed for {key}: {source}")]
    Directory {
        key: String,
        #[source]
        source: redis::RedisError,
    },

    /// A peer rejected or failed a delivery. `status` is `None` when the
    /// request never produced an HTTP response.
    #[error("peer delivery failed (status {status:?})")]
    PeerDelivery {
        status: Option<u16>,
        body: Option<String>,
    },
}

impl GatewayError {
    /// Wrap a store error with the key it was operating on.
    pub fn directory(key: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Directory { key: key.into(), source }
    }
}
