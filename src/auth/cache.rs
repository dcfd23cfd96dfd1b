//! Two-tier authentication cache
//!
//! Caches the resolved `TenantContext` for a credential hash so repeat
//! requests skip the admin backend round trip. Writes go to both tiers in
//! parallel; reads prefer the distributed tier and fall back to local.

use once_cell::sync::OnceCell;

use crate::redis_store::RedisStore;

static STORE: OnceCell<Option<RedisStore>> = OnceCell::new();

fn distributed() -> Option<&'static RedisStore> {
    STORE
        .get_or_init(|| {
            crate::config::load()
                .redis_url
                .as_ref()
                .and_then(|url| match RedisStore::new(url) {
                    Ok(store) => Some(store.with_prefix("aegis")),
                    Err(e) => {
                        crate::logger::error("auth_cache", &format!("failed to init redis store: {}", e));
                        None
                    }
                })
        })
        .as_ref()
}

fn local_key(credential_hash: &str) -> String {
    format!("auth:{}", credential_hash)
}

/// Write the serialized tenant context to both tiers. Distributed-tier
/// failure is logged but not fatal: the local tier still holds the value
/// for this process.
pub async fn set(credential_hash: &str, serialized: &str, ttl_secs: i64) {
    crate::local_cache::set(&local_key(credential_hash), serialized, ttl_secs);

    if let Some(store) = distributed() {
        if let Err(e) = store.cache_set(credential_hash, serialized, ttl_secs).await {
            crate::logger::warn(
                "auth_cache",
                &format!("distributed cache write failed, local tier only: {}", e),
            );
        }
    }
}

/// Read from the distributed tier first, falling back to local. On a
/// local-tier hit that followed a distributed-tier miss, asynchronously
/// backfills the distributed tier so the next process to see this
/// credential doesn't also have to fall back. Returns `None` on a clean
/// cache miss in both tiers.
pub async fn get(credential_hash: &str) -> Option<String> {
    if let Some(store) = distributed() {
        match store.cache_get(credential_hash).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => {
                crate::logger::warn(
                    "auth_cache",
                    &format!("distributed cache read failed, falling back to local tier: {}", e),
                );
            }
        }
    }

    let local = crate::local_cache::get(&local_key(credential_hash))?;

    if distributed().is_some() {
        let hash = credential_hash.to_string();
        let value = local.clone();
        let ttl = crate::config::load().auth_cache_ttl_secs;
        tokio::spawn(async move {
            if let Some(store) = distributed() {
                if let Err(e) = store.cache_set(&hash, &value, ttl).await {
                    crate::logger::warn("auth_cache", &format!("distributed backfill failed: {}", e));
                }
            }
        });
    }

    Some(local)
}

pub async fn invalidate(credential_hash: &str) {
    crate::local_cache::invalidate(&local_key(credential_hash));
    if let Some(store) = distributed() {
        if let Err(e) = store.cache_invalidate(credential_hash).await {
            crate::logger::warn("auth_cache", &format!("distributed cache invalidate failed: {}", e));
        }
    }
}

/// Drop every cached tenant context in the local tier, so the next request
/// for each tenant re-resolves against the admin backend and picks up any
/// rate-limit override changed there. The distributed tier is left alone:
/// its entries expire on their own TTL, which is never longer than this
/// sweep's interval.
pub fn invalidate_all_local() {
    crate::local_cache::clear_prefix("auth:");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_only_roundtrip_without_redis_configured() {
        set("hash-1", "{\"tenant_id\":\"t1\"}", 60).await;
        let value = get("hash-1").await;
        assert_eq!(value, Some("{\"tenant_id\":\"t1\"}".to_string()));
    }
}
