//! Authenticator
//!
//! Resolves a request down to a `TenantContext` (tenant + credential),
//! coalescing concurrent lookups for the same credential into a single
//! admin-backend call, then runs the ordered validity gates: tenant
//! active, credential active, credential expiry, source IP allowlist,
//! endpoint allowlist, provider allowlist (intersected across tenant and
//! credential).

pub mod cache;
pub mod extractor;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tokio::sync::Notify;

use crate::backend::{self, Credential, Tenant, VerifyKeyResult};
use crate::error::{AppError, AppResult};
use crate::forward::context::Provider;

pub use extractor::ExtractedCredential;

/// Resolved, request-independent tenant+credential state. Cheap to clone;
/// carried through the pipeline after authentication succeeds.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub credential: Credential,
}

impl TenantContext {
    pub fn tenant_id(&self) -> &str {
        &self.tenant.tenant_id
    }

    pub fn rate_limits(&self) -> &backend::RateLimits {
        &self.tenant.rate_limits
    }
}

impl From<VerifyKeyResult> for TenantContext {
    fn from(result: VerifyKeyResult) -> Self {
        Self {
            tenant: result.tenant,
            credential: result.credential,
        }
    }
}

static INFLIGHT: Lazy<Mutex<HashMap<String, Arc<Notify>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve a credential hash to a `TenantContext`, consulting the cache
/// first and coalescing concurrent misses for the same hash into one
/// admin-backend call.
async fn resolve_tenant(credential_hash: &str) -> AppResult<TenantContext> {
    if let Some(cached) = cache::get(credential_hash).await {
        let result: VerifyKeyResult = serde_json::from_str(&cached)
            .map_err(|e| AppError::Internal(format!("corrupt auth cache entry: {}", e)))?;
        return Ok(result.into());
    }

    let notify = {
        let mut inflight = INFLIGHT.lock().unwrap();
        if let Some(existing) = inflight.get(credential_hash) {
            Some(existing.clone())
        } else {
            inflight.insert(credential_hash.to_string(), Arc::new(Notify::new()));
            None
        }
    };

    if let Some(notify) = notify {
        // Another request is already resolving this credential: wait for
        // it to finish, then read whatever it put in the cache.
        notify.notified().await;
        if let Some(cached) = cache::get(credential_hash).await {
            let result: VerifyKeyResult = serde_json::from_str(&cached)
                .map_err(|e| AppError::Internal(format!("corrupt auth cache entry: {}", e)))?;
            return Ok(result.into());
        }
        return Err(AppError::CredentialNotFound);
    }

    // We are the leader for this hash: fetch from the admin backend, then
    // release every waiter regardless of outcome.
    let result = fetch_and_cache(credential_hash).await;

    let notify = INFLIGHT.lock().unwrap().remove(credential_hash);
    if let Some(notify) = notify {
        notify.notify_waiters();
    }

    result
}

async fn fetch_and_cache(credential_hash: &str) -> AppResult<TenantContext> {
    let result = match backend::verify_key(credential_hash).await {
        Ok(result) => result,
        Err(backend::BackendError::NotFound) => return Err(AppError::CredentialNotFound),
        Err(backend::BackendError::Revoked) => return Err(AppError::CredentialRevoked),
        Err(backend::BackendError::Request(msg)) => return Err(AppError::BackendError(msg)),
    };

    let serialized = serde_json::to_string(&result)
        .map_err(|e| AppError::Internal(format!("failed to serialize tenant context: {}", e)))?;
    cache::set(credential_hash, &serialized, crate::config::load().auth_cache_ttl_secs).await;

    Ok(result.into())
}

fn check_ip_allowed(allowed_ips: &[String], source_ip: Option<IpAddr>) -> bool {
    if allowed_ips.is_empty() {
        return true;
    }
    let Some(ip) = source_ip else {
        return false;
    };
    allowed_ips.iter().any(|entry| {
        if entry == "*" {
            true
        } else if let Ok(net) = entry.parse::<ipnet::IpNet>() {
            net.contains(&ip)
        } else if let Ok(exact) = entry.parse::<IpAddr>() {
            exact == ip
        } else {
            false
        }
    })
}

/// An empty list or a bare `"*"` entry means "all providers allowed".
/// `vendor` is permitted only if both the credential's and the tenant's
/// lists allow it.
fn provider_allowed(credential_providers: &[String], tenant_providers: &[String], provider: &str) -> bool {
    let list_allows = |list: &[String]| list.is_empty() || list.iter().any(|p| p == "*" || p == provider);
    list_allows(credential_providers) && list_allows(tenant_providers)
}

/// Run every validity gate for an incoming request and return the
/// resolved tenant context, or the first `AppError` that applies.
pub async fn authenticate(
    credential: &ExtractedCredential,
    source_ip: Option<IpAddr>,
    endpoint: &str,
    provider: Provider,
) -> AppResult<TenantContext> {
    let ctx = resolve_tenant(&credential.hash).await?;

    let outcome = check_gates(&ctx, source_ip, endpoint, provider);

    backend::post_auth_event(
        ctx.tenant.tenant_id.clone(),
        ctx.credential.credential_id.clone(),
        outcome.is_ok(),
        outcome.as_ref().err().map(|e| e.to_string()),
    );

    outcome.map(|_| ctx)
}

fn check_gates(
    ctx: &TenantContext,
    source_ip: Option<IpAddr>,
    endpoint: &str,
    provider: Provider,
) -> AppResult<()> {
    if !ctx.tenant.active {
        return Err(AppError::TenantSuspended);
    }

    if !ctx.credential.active {
        return Err(AppError::CredentialRevoked);
    }

    if let Some(expires_at) = ctx.credential.expires_at {
        if expires_at <= chrono::Utc::now() {
            return Err(AppError::CredentialExpired);
        }
    }

    if !check_ip_allowed(&ctx.credential.allowed_ips, source_ip) {
        return Err(AppError::IpNotAllowed);
    }

    if !ctx.credential.allowed_endpoints.is_empty()
        && !ctx.credential.allowed_endpoints.iter().any(|e| e == endpoint)
    {
        return Err(AppError::EndpointNotAllowed);
    }

    if !provider_allowed(&ctx.credential.allowed_providers, &ctx.tenant.allowed_providers, provider.as_str()) {
        return Err(AppError::ProviderNotAllowed);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_allowlist_empty_means_unrestricted() {
        assert!(check_ip_allowed(&[], None));
    }

    #[test]
    fn ip_allowlist_matches_cidr() {
        let allowed = vec!["10.0.0.0/8".to_string()];
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert!(check_ip_allowed(&allowed, Some(ip)));
    }

    #[test]
    fn ip_allowlist_rejects_unknown_source() {
        let allowed = vec!["10.0.0.0/8".to_string()];
        assert!(!check_ip_allowed(&allowed, None));
    }

    #[test]
    fn ip_allowlist_rejects_out_of_range() {
        let allowed = vec!["10.0.0.0/8".to_string()];
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(!check_ip_allowed(&allowed, Some(ip)));
    }

    #[test]
    fn provider_allowed_requires_both_lists_to_permit() {
        assert!(provider_allowed(&[], &[], "openai"));
        assert!(provider_allowed(&["openai".to_string()], &[], "openai"));
        assert!(!provider_allowed(&["anthropic".to_string()], &[], "openai"));
        assert!(!provider_allowed(&[], &["anthropic".to_string()], "openai"));
        assert!(provider_allowed(&["*".to_string()], &["openai".to_string()], "openai"));
    }

    fn test_ctx(active_tenant: bool, active_credential: bool) -> TenantContext {
        TenantContext {
            tenant: Tenant {
                tenant_id: "t1".to_string(),
                active: active_tenant,
                allowed_providers: vec![],
                rate_limits: backend::RateLimits {
                    requests_per_minute: None,
                    requests_per_hour: None,
                    requests_per_day: None,
                    cost_per_minute_usd: None,
                    cost_per_hour_usd: None,
                    cost_per_day_usd: None,
                },
            },
            credential: Credential {
                credential_id: "c1".to_string(),
                tenant_id: "t1".to_string(),
                active: active_credential,
                expires_at: None,
                allowed_ips: vec![],
                allowed_endpoints: vec![],
                allowed_providers: vec![],
            },
        }
    }

    #[test]
    fn suspended_tenant_fails_before_credential_checks() {
        let ctx = test_ctx(false, false);
        assert!(matches!(
            check_gates(&ctx, None, "/proxy/openai", Provider::OpenAI),
            Err(AppError::TenantSuspended)
        ));
    }

    #[test]
    fn revoked_credential_fails_when_tenant_is_active() {
        let ctx = test_ctx(true, false);
        assert!(matches!(
            check_gates(&ctx, None, "/proxy/openai", Provider::OpenAI),
            Err(AppError::CredentialRevoked)
        ));
    }

    #[test]
    fn expired_credential_is_rejected() {
        let mut ctx = test_ctx(true, true);
        ctx.credential.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        assert!(matches!(
            check_gates(&ctx, None, "/proxy/openai", Provider::OpenAI),
            Err(AppError::CredentialExpired)
        ));
    }

    #[test]
    fn fully_permitted_context_passes() {
        let ctx = test_ctx(true, true);
        assert!(check_gates(&ctx, None, "/proxy/openai", Provider::OpenAI).is_ok());
    }
}
