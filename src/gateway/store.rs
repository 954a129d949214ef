//! Directory client: the thin typed adapter over the shared KV store.
//!
//! Exposes only the operations the gateway needs: set-with-expiry, get,
//! delete, set-add, set-members, and the composite `put_and_members` (set a
//! value with TTL and read a set's members in one round trip). The Redis
//! backend runs the composite as a `MULTI`/`EXEC` pipeline; the memory
//! backend holds its lock across both halves, which is equivalent.
//!
//! All operations propagate store errors; callers decide whether a failure
//! surfaces to clients or only to the internal error channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::gateway::error::GatewayError;

/// The shared KV store behind the session directory.
///
/// `Memory` serves single-node operation and tests; `Redis` is the clustered
/// deployment. Both honor TTLs on plain values; set members carry no TTL.
#[derive(Clone)]
pub enum DirectoryStore {
    Memory(MemoryStore),
    Redis(redis::Client),
}

impl DirectoryStore {
    /// In-process store with no external dependency.
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::default())
    }

    /// Redis-backed store from a connection URL.
    pub fn redis(url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self::Redis(redis::Client::open(url)?))
    }

    /// Set `key` to `value`, expiring after `ttl`.
    pub async fn put(&self, key: &str, ttl: Duration, value: &str) -> Result<(), GatewayError> {
        match self {
            Self::Memory(mem) => {
                mem.put(key, ttl, value);
                Ok(())
            }
            Self::Redis(client) => {
                let mut conn = connect(client, key).await?;
                let _: () = redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs())
                    .arg(value)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| GatewayError::directory(key, e))?;
                Ok(())
            }
        }
    }

    /// Read `key`, or `None` when absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        match self {
            Self::Memory(mem) => Ok(mem.get(key)),
            Self::Redis(client) => {
                let mut conn = connect(client, key).await?;
                let value: Option<String> = redis::cmd("GET")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| GatewayError::directory(key, e))?;
                Ok(value)
            }
        }
    }

    /// Delete `key`. Deleting an absent key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), GatewayError> {
        match self {
            Self::Memory(mem) => {
                mem.delete(key);
                Ok(())
            }
            Self::Redis(client) => {
                let mut conn = connect(client, key).await?;
                let _: () = redis::cmd("DEL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| GatewayError::directory(key, e))?;
                Ok(())
            }
        }
    }

    /// Add `member` to the set at `set_key`.
    pub async fn add(&self, set_key: &str, member: &str) -> Result<(), GatewayError> {
        match self {
            Self::Memory(mem) => {
                mem.add(set_key, member);
                Ok(())
            }
            Self::Redis(client) => {
                let mut conn = connect(client, set_key).await?;
                let _: () = redis::cmd("SADD")
                    .arg(set_key)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| GatewayError::directory(set_key, e))?;
                Ok(())
            }
        }
    }

    /// List the members of the set at `set_key`. An absent set is empty.
    pub async fn members(&self, set_key: &str) -> Result<Vec<String>, GatewayError> {
        match self {
            Self::Memory(mem) => Ok(mem.members(set_key)),
            Self::Redis(client) => {
                let mut conn = connect(client, set_key).await?;
                let members: Vec<String> = redis::cmd("SMEMBERS")
                    .arg(set_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| GatewayError::directory(set_key, e))?;
                Ok(members)
            }
        }
    }

    /// Atomic composite: set `key` with TTL and read the members of
    /// `set_key` in one round trip.
    pub async fn put_and_members(
        &self,
        key: &str,
        ttl: Duration,
        value: &str,
        set_key: &str,
    ) -> Result<Vec<String>, GatewayError> {
        match self {
            Self::Memory(mem) => Ok(mem.put_and_members(key, ttl, value, set_key)),
            Self::Redis(client) => {
                let mut conn = connect(client, key).await?;
                let (members,): (Vec<String>,) = redis::pipe()
                    .atomic()
                    .cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs())
                    .arg(value)
                    .ignore()
                    .cmd("SMEMBERS")
                    .arg(set_key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| GatewayError::directory(key, e))?;
                Ok(members)
            }
        }
    }
}

async fn connect(
    client: &redis::Client,
    key: &str,
) -> Result<redis::aio::MultiplexedConnection, GatewayError> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| GatewayError::directory(key, e))
}

/// In-process KV store with value TTLs and insertion-ordered sets.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, (String, Instant)>,
    sets: HashMap<String, Vec<String>>,
}

impl MemoryStore {
    fn put(&self, key: &str, ttl: Duration, value: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .values
            .insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.values.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                // Lazy expiry on read.
                inner.values.remove(key);
                None
            }
            None => None,
        }
    }

    fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.values.remove(key);
    }

    fn add(&self, set_key: &str, member: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let set = inner.sets.entry(set_key.to_owned()).or_default();
        if !set.iter().any(|m| m == member) {
            set.push(member.to_owned());
        }
    }

    fn members(&self, set_key: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.sets.get(set_key).cloned().unwrap_or_default()
    }

    fn put_and_members(&self, key: &str, ttl: Duration, value: &str, set_key: &str) -> Vec<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .values
            .insert(key.to_owned(), (value.to_owned(), Instant::now() + ttl));
        inner.sets.get(set_key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DirectoryStore {
        DirectoryStore::memory()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let s = store();
        s.put("k", Duration::from_secs(900), "v").await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn test_get_absent() {
        assert_eq!(store().get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_overwrites_and_refreshes() {
        let s = store();
        s.put("k", Duration::from_secs(900), "old").await.unwrap();
        s.put("k", Duration::from_secs(900), "new").await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), Some("new".into()));
    }

    #[tokio::test]
    async fn test_expired_value_is_absent() {
        let s = store();
        s.put("k", Duration::ZERO, "v").await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_removes_value() {
        let s = store();
        s.put("k", Duration::from_secs(900), "v").await.unwrap();
        s.delete("k").await.unwrap();
        assert_eq!(s.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        store().delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_set_add_and_members() {
        let s = store();
        s.add("set", "a").await.unwrap();
        s.add("set", "b").await.unwrap();
        assert_eq!(s.members("set").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_set_add_deduplicates() {
        let s = store();
        s.add("set", "a").await.unwrap();
        s.add("set", "a").await.unwrap();
        assert_eq!(s.members("set").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_members_of_absent_set_is_empty() {
        assert!(store().members("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_and_members_composite() {
        let s = store();
        s.add("set", "follower").await.unwrap();
        let members = s
            .put_and_members("k", Duration::from_secs(900), "v", "set")
            .await
            .unwrap();
        assert_eq!(members, vec!["follower"]);
        assert_eq!(s.get("k").await.unwrap(), Some("v".into()));
    }

    #[tokio::test]
    async fn test_put_and_members_empty_set() {
        let s = store();
        let members = s
            .put_and_members("k", Duration::from_secs(900), "v", "set")
            .await
            .unwrap();
        assert!(members.is_empty());
    }
}
