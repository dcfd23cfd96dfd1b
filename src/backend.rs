//! Admin backend client
//!
//! Outbound HTTP calls to the admin backend: credential verification (on an
//! auth-cache miss), vendor-key lookup for BYOK resolution, and
//! fire-and-forget telemetry (auth events, auth errors, usage cost ticks).
//! Kept separate from `forward/client.rs`, which talks to LLM providers,
//! because this client always carries the service-to-service
//! `ADMIN_BACKEND_TOKEN` and a per-call `X-Request-ID`.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// An organization with its own credentials and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub active: bool,
    pub allowed_providers: Vec<String>,
    pub rate_limits: RateLimits,
}

/// A single API token belonging to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: String,
    pub tenant_id: String,
    pub active: bool,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub allowed_ips: Vec<String>,
    pub allowed_endpoints: Vec<String>,
    pub allowed_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub requests_per_day: Option<u32>,
    pub cost_per_minute_usd: Option<f64>,
    pub cost_per_hour_usd: Option<f64>,
    pub cost_per_day_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyKeyResult {
    pub tenant: Tenant,
    pub credential: Credential,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("admin backend request failed: {0}")]
    Request(String),
    #[error("credential not recognized by admin backend")]
    NotFound,
    #[error("credential revoked")]
    Revoked,
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build admin backend http client")
}

fn authed(request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    let cfg = crate::config::load();
    let mut request = request.header("x-request-id", uuid::Uuid::new_v4().to_string());
    if let Some(token) = cfg.admin_backend_token.as_ref() {
        request = request.bearer_auth(token);
    }
    request
}

#[derive(Serialize)]
struct VerifyKeyRequest<'a> {
    api_key_hash: &'a str,
    include_company: bool,
    include_permissions: bool,
}

/// Resolve a credential hash to its tenant and credential records. Called
/// only on an auth-cache miss.
pub async fn verify_key(credential_hash: &str) -> Result<VerifyKeyResult, BackendError> {
    let cfg = crate::config::load();
    let url = format!("{}/auth/verify-key", cfg.admin_backend_url);

    let request = authed(client().post(&url).json(&VerifyKeyRequest {
        api_key_hash: credential_hash,
        include_company: true,
        include_permissions: true,
    }));

    let response = request.send().await.map_err(|e| BackendError::Request(e.to_string()))?;

    match response.status() {
        StatusCode::OK => response
            .json::<VerifyKeyResult>()
            .await
            .map_err(|e| BackendError::Request(e.to_string())),
        StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED => Err(BackendError::NotFound),
        StatusCode::FORBIDDEN => Err(BackendError::Revoked),
        status => Err(BackendError::Request(format!("status {}", status))),
    }
}

#[derive(Deserialize)]
struct VendorKeyResponse {
    encrypted_key: String,
    is_active: bool,
}

/// Look up a tenant-supplied provider key. Returns `None` on a 404 (no
/// BYOK key configured for this tenant/provider) so the caller can fall
/// back to the shared system key.
///
/// Decryption of `encrypted_key` against `Config::encryption_key` is left
/// for a future pass (see DESIGN.md) — no cipher crate is pulled in yet,
/// so the field is passed through as received.
pub async fn get_vendor_key(tenant_id: &str, provider: &str) -> Result<Option<String>, BackendError> {
    let cfg = crate::config::load();
    let url = format!("{}/vendor-keys/{}/{}", cfg.admin_backend_url, tenant_id, provider);

    let response = authed(client().get(&url))
        .send()
        .await
        .map_err(|e| BackendError::Request(e.to_string()))?;

    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        return Err(BackendError::Request(format!("status {}", response.status())));
    }

    let body: VendorKeyResponse = response.json().await.map_err(|e| BackendError::Request(e.to_string()))?;
    if !body.is_active {
        return Ok(None);
    }
    Ok(Some(body.encrypted_key))
}

/// Fire-and-forget auth audit event. Failures are logged, never surfaced.
pub fn post_auth_event(tenant_id: String, credential_id: String, success: bool, reason: Option<String>) {
    tokio::spawn(async move {
        let cfg = crate::config::load();
        let url = format!("{}/auth/events", cfg.admin_backend_url);
        let body = serde_json::json!({
            "tenant_id": tenant_id,
            "credential_id": credential_id,
            "success": success,
            "reason": reason,
        });
        if let Err(e) = authed(client().post(&url).json(&body)).send().await {
            crate::logger::warn("backend", &format!("auth event send failed: {}", e));
        }
    });
}

/// Fire-and-forget auth error audit log (extractor/gate rejections with no
/// resolved tenant to attach an auth event to).
pub fn post_auth_error(credential_hash: String, reason: String) {
    tokio::spawn(async move {
        let cfg = crate::config::load();
        let url = format!("{}/logs/auth-errors", cfg.admin_backend_url);
        let body = serde_json::json!({"credential_hash": credential_hash, "reason": reason});
        if let Err(e) = authed(client().post(&url).json(&body)).send().await {
            crate::logger::warn("backend", &format!("auth error log send failed: {}", e));
        }
    });
}

#[derive(Debug, Serialize)]
struct UsageCostReport<'a> {
    provider: &'a str,
    model: &'a str,
    prompt_tokens: i64,
    completion_tokens: i64,
    cost_usd: f64,
    request_id: &'a str,
}

/// Fire-and-forget usage telemetry. Failures are logged, never surfaced
/// to the caller: local SQLite (`db::log_usage`) is the system of record,
/// this is best-effort enrichment for the admin backend's own dashboards.
#[allow(clippy::too_many_arguments)]
pub fn report_usage_async(
    tenant_id: String,
    provider: String,
    model: String,
    prompt_tokens: i64,
    completion_tokens: i64,
    cost_usd: f64,
    request_id: String,
) {
    tokio::spawn(async move {
        let cfg = crate::config::load();
        let url = format!("{}/companies/{}/usage/cost", cfg.admin_backend_url, tenant_id);
        let report = UsageCostReport {
            provider: &provider,
            model: &model,
            prompt_tokens,
            completion_tokens,
            cost_usd,
            request_id: &request_id,
        };

        if let Err(e) = authed(client().post(&url).json(&report)).send().await {
            crate::logger::warn("backend", &format!("usage telemetry send failed: {}", e));
        }
    });
}
