//! Distributed tier: Redis-backed cache and sliding-window counters.
//!
//! Used by the two-tier auth cache and the sliding-window limiter when
//! `REDIS_URL` is configured. Key namespacing follows `{prefix}:{category}:{id}`.

use redis::AsyncCommands;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedisStoreError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),
}

pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self, RedisStoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            prefix: "aegis".to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    pub async fn ping(&self) -> Result<(), RedisStoreError> {
        let mut conn = self.connection().await?;
        let _: Option<String> = conn.get(self.key_ping()).await?;
        Ok(())
    }

    fn key_ping(&self) -> String {
        format!("{}:__ping__", self.prefix)
    }

    fn key_auth_cache(&self, credential_hash: &str) -> String {
        format!("{}:auth:{}", self.prefix, credential_hash)
    }

    fn key_window(&self, tenant_id: &str, dimension: &str) -> String {
        format!("{}:window:{}:{}", self.prefix, tenant_id, dimension)
    }

    /// Two-tier auth cache: set a serialized tenant context with TTL.
    pub async fn cache_set(
        &self,
        credential_hash: &str,
        value: &str,
        ttl_secs: i64,
    ) -> Result<(), RedisStoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(self.key_auth_cache(credential_hash), value, ttl_secs.max(1) as u64)
            .await?;
        Ok(())
    }

    pub async fn cache_get(&self, credential_hash: &str) -> Result<Option<String>, RedisStoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.key_auth_cache(credential_hash)).await?;
        Ok(value)
    }

    pub async fn cache_invalidate(&self, credential_hash: &str) -> Result<(), RedisStoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key_auth_cache(credential_hash)).await?;
        Ok(())
    }

    /// Log-based sliding window: trim everything older than
    /// `window_start_millis`, add one entry scored at `now_millis`, refresh
    /// the key TTL, then return every score still inside the window. The
    /// caller sums either cardinality (requests dimensions) or the encoded
    /// weight (cost dimensions) from the returned members.
    pub async fn sliding_window_add(
        &self,
        tenant_id: &str,
        dimension: &str,
        now_millis: i64,
        window_start_millis: i64,
        window_secs: i64,
        member: &str,
    ) -> Result<Vec<(String, f64)>, RedisStoreError> {
        let key = self.key_window(tenant_id, dimension);
        let mut conn = self.connection().await?;

        let _: () = conn.zrembyscore(&key, 0, window_start_millis).await?;
        let _: () = conn.zadd(&key, member, now_millis as f64).await?;
        let _: () = conn.expire(&key, window_secs).await?;

        let members: Vec<(String, f64)> = conn.zrange_withscores(&key, 0, -1).await?;
        Ok(members)
    }

    /// Remove a single event from a window (used to roll back a
    /// pre-call estimate once the real usage is known and differs).
    pub async fn sliding_window_remove_member(
        &self,
        tenant_id: &str,
        dimension: &str,
        member: &str,
    ) -> Result<(), RedisStoreError> {
        let key = self.key_window(tenant_id, dimension);
        let mut conn = self.connection().await?;
        let _: () = conn.zrem(&key, member).await?;
        Ok(())
    }

    pub async fn window_remove(&self, tenant_id: &str, dimension: &str) -> Result<(), RedisStoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key_window(tenant_id, dimension)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_namespacing_is_stable() {
        let store = RedisStore::new("redis://127.0.0.1:6379").unwrap().with_prefix("test");
        assert_eq!(store.key_auth_cache("abc"), "test:auth:abc");
        assert_eq!(store.key_window("tenant-1", "requests_per_minute"), "test:window:tenant-1:requests_per_minute");
    }
}
