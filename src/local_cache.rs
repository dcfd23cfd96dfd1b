//! In-process local tier: TTL key-value map plus a sliding-window log,
//! used when Redis is absent or unreachable.
//!
//! Falling back here must never silently relax a limit: callers log a
//! warning whenever they take this path (see `limiter.rs`), this module
//! only provides the storage primitive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

struct CacheEntry {
    value: String,
    expires_at_millis: i64,
}

static CACHE: Lazy<Arc<Mutex<HashMap<String, CacheEntry>>>> =
    Lazy::new(|| Arc::new(Mutex::new(HashMap::new())));

static WINDOWS: Lazy<Arc<Mutex<HashMap<String, Vec<(String, f64)>>>>> =
    Lazy::new(|| Arc::new(Mutex::new(HashMap::new())));

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub fn set(key: &str, value: &str, ttl_secs: i64) {
    let mut cache = CACHE.lock().unwrap();
    cache.insert(
        key.to_string(),
        CacheEntry {
            value: value.to_string(),
            expires_at_millis: now_millis() + ttl_secs.max(0) * 1000,
        },
    );
}

pub fn get(key: &str) -> Option<String> {
    let mut cache = CACHE.lock().unwrap();
    match cache.get(key) {
        Some(entry) if entry.expires_at_millis > now_millis() => Some(entry.value.clone()),
        Some(_) => {
            cache.remove(key);
            None
        }
        None => None,
    }
}

pub fn invalidate(key: &str) {
    CACHE.lock().unwrap().remove(key);
}

/// Drop every entry whose TTL has already passed. `get` already expires
/// lazily on read, so this is housekeeping for keys nobody reads again
/// (a revoked credential, a tenant that stopped sending traffic).
pub fn sweep_expired() {
    let now = now_millis();
    CACHE.lock().unwrap().retain(|_, entry| entry.expires_at_millis > now);
}

/// Drop every cached key starting with `prefix`, regardless of TTL.
pub fn clear_prefix(prefix: &str) {
    CACHE.lock().unwrap().retain(|key, _| !key.starts_with(prefix));
}

/// Same semantics as `RedisStore::sliding_window_add`: trim stale
/// entries, add the new one, return the surviving members.
pub fn sliding_window_add(
    window_key: &str,
    now: i64,
    window_start: i64,
    member: &str,
) -> Vec<(String, f64)> {
    let mut windows = WINDOWS.lock().unwrap();
    let entry = windows.entry(window_key.to_string()).or_default();
    entry.retain(|(_, score)| *score as i64 > window_start);
    entry.push((member.to_string(), now as f64));
    entry.clone()
}

pub fn sliding_window_remove_member(window_key: &str, member: &str) {
    let mut windows = WINDOWS.lock().unwrap();
    if let Some(entry) = windows.get_mut(window_key) {
        entry.retain(|(m, _)| m != member);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_roundtrip_respects_ttl() {
        set("k1", "v1", 60);
        assert_eq!(get("k1"), Some("v1".to_string()));
    }

    #[test]
    fn expired_entry_is_removed_on_read() {
        set("k2", "v2", -1);
        assert_eq!(get("k2"), None);
    }

    #[test]
    fn sliding_window_trims_stale_entries() {
        let key = "tenant-1:requests_per_minute";
        sliding_window_add(key, 1000, 0, "evt-1");
        let members = sliding_window_add(key, 70_000, 60_000, "evt-2");
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "evt-2");
    }
}
