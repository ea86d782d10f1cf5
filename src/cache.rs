//! Cache and broker access.
//!
//! One redis connection pool serves two purposes: a byte-valued key/value
//! cache with per-key TTLs (conversion status records and Zarr chunk blobs
//! written by the data-loading worker) and a publish channel on which
//! conversion requests are handed to that worker.
//!
//! All operations are individually atomic. Status updates additionally need
//! compare-and-swap semantics, implemented with small Lua scripts so that no
//! multi-key transactions are required.

use crate::config::ServerConfig;
use crate::error::FrevaRestError;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

/// Set `key` to `new` only if it currently holds `expected`, keeping the TTL.
const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
end
return nil
"#;

/// Delete `key` only if it currently holds `expected`.
const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Handle on the cache/broker service.
#[derive(Clone)]
pub struct CacheBroker {
    manager: ConnectionManager,
}

impl CacheBroker {
    /// Connect to the redis service described by the server configuration.
    pub async fn connect(config: &ServerConfig) -> Result<Self, FrevaRestError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    /// Check that the cache is reachable.
    pub async fn ping(&self) -> Result<(), FrevaRestError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// Fetch the raw bytes stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FrevaRestError> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    /// Store `value` under `key` with a TTL in seconds.
    pub async fn set_ex(&self, key: &str, value: &[u8], ttl: u64) -> Result<(), FrevaRestError> {
        let mut conn = self.manager.clone();
        let _: () = conn.set_ex(key, value, ttl as usize).await?;
        Ok(())
    }

    /// Store `value` under `key` with a TTL, but only if the key does not
    /// exist yet. Returns whether the value was written.
    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: u64,
    ) -> Result<bool, FrevaRestError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Atomically replace the value under `key` if it still equals
    /// `expected`, preserving the remaining TTL. Returns whether the swap
    /// took place.
    pub async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, FrevaRestError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = Script::new(CAS_SCRIPT)
            .key(key)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    /// Atomically delete `key` if it still holds `expected`. Returns whether
    /// a key was removed.
    pub async fn delete_if_equals(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, FrevaRestError> {
        let mut conn = self.manager.clone();
        let removed: i64 = Script::new(DELETE_IF_EQUALS_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    /// Remove `key` unconditionally.
    pub async fn delete(&self, key: &str) -> Result<(), FrevaRestError> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Publish a message on a broker channel.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), FrevaRestError> {
        let mut conn = self.manager.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }
}
