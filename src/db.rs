//! SQLite persistence for ambient concerns: usage accounting, the local
//! cache fallback tier, and structured application logs.
//!
//! The request path itself does not block on SQLite for auth or limiting
//! decisions (those live in `redis_store`/`local_cache`); this module is
//! the system of record for usage history and logs, queried by `/status`
//! and by operators, not by the hot path.

use std::sync::Once;

use dirs::data_dir;
use rusqlite::{params, Connection};

static INIT: Once = Once::new();

pub fn db_path() -> std::path::PathBuf {
    if let Some(path) = crate::config::load().database_path.as_ref() {
        return std::path::PathBuf::from(path);
    }
    let mut p = data_dir().unwrap_or_else(std::env::temp_dir);
    p.push("aegis-relay");
    std::fs::create_dir_all(&p).ok();
    p.push("aegis.db");
    p
}

pub fn open_conn() -> Connection {
    Connection::open(db_path()).expect("failed to open sqlite database")
}

fn optimize_connection(conn: &Connection) {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )
    .ok();
}

/// Create tables/indexes if missing. Idempotent, called once at boot.
pub fn init() {
    INIT.call_once(|| {
        let conn = open_conn();
        optimize_connection(&conn);

        conn.execute(
            "CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                request_id TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_usage_logs_tenant ON usage_logs(tenant_id, timestamp DESC)",
            [],
        )
        .ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS local_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS app_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                level TEXT NOT NULL,
                source TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT
            )",
            [],
        )
        .unwrap();
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_app_logs_timestamp ON app_logs(timestamp DESC)",
            [],
        )
        .ok();
    });
}

/// Record a completed (or failed) proxied request for usage accounting.
#[allow(clippy::too_many_arguments)]
pub fn log_usage(
    tenant_id: &str,
    provider: &str,
    model: &str,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    cost_usd: f64,
    request_id: &str,
    status_code: u16,
    latency_ms: u64,
) {
    let conn = open_conn();
    let timestamp = chrono::Utc::now().timestamp();
    let _ = conn.execute(
        "INSERT INTO usage_logs (tenant_id, provider, model, prompt_tokens, completion_tokens,
            total_tokens, cost_usd, request_id, status_code, latency_ms, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            tenant_id,
            provider,
            model,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost_usd,
            request_id,
            status_code as i64,
            latency_ms as i64,
            timestamp
        ],
    );
}

pub struct UsageSummary {
    pub requests: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

/// Usage for a tenant within the trailing `since_secs` window. Used for
/// the `/status` endpoint, not on the authorization hot path.
pub fn usage_since(tenant_id: &str, since_secs: i64) -> UsageSummary {
    let conn = open_conn();
    let cutoff = chrono::Utc::now().timestamp() - since_secs;
    conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(total_tokens), 0), COALESCE(SUM(cost_usd), 0.0)
         FROM usage_logs WHERE tenant_id = ?1 AND timestamp >= ?2",
        params![tenant_id, cutoff],
        |row| {
            Ok(UsageSummary {
                requests: row.get(0)?,
                total_tokens: row.get(1)?,
                cost_usd: row.get(2)?,
            })
        },
    )
    .unwrap_or(UsageSummary {
        requests: 0,
        total_tokens: 0,
        cost_usd: 0.0,
    })
}

/// Fallback local-cache persistence, used only when a restart needs to
/// survive without Redis; the in-memory `local_cache` module is the hot
/// path, this is a cold-start seed.
pub fn cache_set(key: &str, value: &str, ttl_secs: i64) {
    let conn = open_conn();
    let expires_at = chrono::Utc::now().timestamp() + ttl_secs;
    let _ = conn.execute(
        "INSERT INTO local_cache (key, value, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        params![key, value, expires_at],
    );
}

pub fn cache_get(key: &str) -> Option<String> {
    let conn = open_conn();
    let now = chrono::Utc::now().timestamp();
    conn.query_row(
        "SELECT value FROM local_cache WHERE key = ?1 AND expires_at > ?2",
        params![key, now],
        |row| row.get(0),
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                request_id TEXT NOT NULL,
                status_code INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn usage_insert_and_query_roundtrip() {
        let conn = temp_conn();
        conn.execute(
            "INSERT INTO usage_logs (tenant_id, provider, model, prompt_tokens, completion_tokens,
                total_tokens, cost_usd, request_id, status_code, latency_ms, timestamp)
             VALUES ('t1','openai','gpt-4o',10,5,15,0.002,'req-1',200,120,1000)",
            [],
        )
        .unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM usage_logs WHERE tenant_id='t1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
