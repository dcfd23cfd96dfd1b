//! Sliding-window rate/cost limiter
//!
//! Six dimensions per tenant: requests and cost, each over a 1-minute,
//! 1-hour, and 1-day window. Each dimension is a Redis sorted set (or the
//! in-process fallback) scored by event time; checking a dimension trims
//! everything outside the window, records the new event, and sums what's
//! left. A distributed-tier failure falls back to the local tier for that
//! one check and is always logged — it must never silently relax a limit.

use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;

use crate::auth::TenantContext;
use crate::backend::RateLimits;
use crate::error::{AppError, AppResult};
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
                        crate::logger::error("limiter", &format!("failed to init redis store: {}", e));
                        None
                    }
                })
        })
        .as_ref()
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    RequestsPerMinute,
    RequestsPerHour,
    RequestsPerDay,
    CostPerMinute,
    CostPerHour,
    CostPerDay,
}

impl Dimension {
    const ALL: [Dimension; 6] = [
        Dimension::RequestsPerMinute,
        Dimension::RequestsPerHour,
        Dimension::RequestsPerDay,
        Dimension::CostPerMinute,
        Dimension::CostPerHour,
        Dimension::CostPerDay,
    ];

    fn key(&self) -> &'static str {
        match self {
            Dimension::RequestsPerMinute => "requests_per_minute",
            Dimension::RequestsPerHour => "requests_per_hour",
            Dimension::RequestsPerDay => "requests_per_day",
            Dimension::CostPerMinute => "cost_per_minute",
            Dimension::CostPerHour => "cost_per_hour",
            Dimension::CostPerDay => "cost_per_day",
        }
    }

    fn window_secs(&self) -> i64 {
        match self {
            Dimension::RequestsPerMinute | Dimension::CostPerMinute => 60,
            Dimension::RequestsPerHour | Dimension::CostPerHour => 3600,
            Dimension::RequestsPerDay | Dimension::CostPerDay => 86_400,
        }
    }

    fn is_cost(&self) -> bool {
        matches!(self, Dimension::CostPerMinute | Dimension::CostPerHour | Dimension::CostPerDay)
    }

    fn limit(&self, limits: &RateLimits) -> Option<f64> {
        match self {
            Dimension::RequestsPerMinute => limits.requests_per_minute.map(|v| v as f64),
            Dimension::RequestsPerHour => limits.requests_per_hour.map(|v| v as f64),
            Dimension::RequestsPerDay => limits.requests_per_day.map(|v| v as f64),
            Dimension::CostPerMinute => limits.cost_per_minute_usd,
            Dimension::CostPerHour => limits.cost_per_hour_usd,
            Dimension::CostPerDay => limits.cost_per_day_usd,
        }
    }
}

/// Fill any dimension the backend left unset (`None`) with the config
/// default for that dimension. A dimension still unset after this is
/// genuinely unlimited.
fn effective_rate_limits(limits: &RateLimits) -> RateLimits {
    let cfg = crate::config::load();
    RateLimits {
        requests_per_minute: limits.requests_per_minute.or(cfg.default_rate_limit_per_minute),
        requests_per_hour: limits.requests_per_hour.or(cfg.default_rate_limit_per_hour),
        requests_per_day: limits.requests_per_day.or(cfg.default_rate_limit_per_day),
        cost_per_minute_usd: limits.cost_per_minute_usd.or(cfg.default_cost_limit_per_minute_usd),
        cost_per_hour_usd: limits.cost_per_hour_usd.or(cfg.default_cost_limit_per_hour_usd),
        cost_per_day_usd: limits.cost_per_day_usd.or(cfg.default_cost_limit_per_day_usd),
    }
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Distributed,
    Local,
}

async fn window_add(
    tenant_id: &str,
    dim: Dimension,
    now: i64,
    window_start: i64,
    member: &str,
) -> (Tier, Vec<(String, f64)>) {
    if let Some(store) = distributed() {
        match store
            .sliding_window_add(tenant_id, dim.key(), now, window_start, dim.window_secs(), member)
            .await
        {
            Ok(members) => return (Tier::Distributed, members),
            Err(e) => {
                crate::logger::warn(
                    "limiter",
                    &format!(
                        "distributed tier failed for tenant={} dimension={}, falling back to local tier: {}",
                        tenant_id,
                        dim.key(),
                        e
                    ),
                );
            }
        }
    }

    let window_key = format!("{}:{}", tenant_id, dim.key());
    (Tier::Local, crate::local_cache::sliding_window_add(&window_key, now, window_start, member))
}

async fn window_remove(tier: Tier, tenant_id: &str, dim: Dimension, member: &str) {
    match tier {
        Tier::Distributed => {
            if let Some(store) = distributed() {
                if let Err(e) = store.sliding_window_remove_member(tenant_id, dim.key(), member).await {
                    crate::logger::warn("limiter", &format!("failed to roll back window member: {}", e));
                }
            }
        }
        Tier::Local => {
            let window_key = format!("{}:{}", tenant_id, dim.key());
            crate::local_cache::sliding_window_remove_member(&window_key, member);
        }
    }
}

fn sum_members(dim: Dimension, members: &[(String, f64)]) -> f64 {
    if dim.is_cost() {
        members
            .iter()
            .filter_map(|(m, _)| m.rsplit_once(':').and_then(|(_, cost)| cost.parse::<f64>().ok()))
            .sum()
    } else {
        members.len() as f64
    }
}

/// Check every configured dimension for this tenant and record the event
/// if all pass. Rolls back everything it recorded if a later dimension
/// rejects the request, so a denied request leaves no trace in any window.
/// On success, returns the `X-RateLimit-*` response headers for every
/// configured dimension plus a summary for the most restrictive one.
pub async fn check_and_record(
    tenant: &TenantContext,
    request_id: &str,
    estimated_cost: f64,
) -> AppResult<Vec<(String, String)>> {
    let now = now_millis();
    let mut recorded: Vec<(Dimension, Tier, String)> = Vec::new();
    let mut reports: Vec<(Dimension, f64, f64)> = Vec::new();

    let effective_limits = effective_rate_limits(tenant.rate_limits());

    for dim in Dimension::ALL {
        let Some(limit) = dim.limit(&effective_limits) else {
            continue;
        };

        let window_start = now - dim.window_secs() * 1000;
        let member = if dim.is_cost() {
            format!("{}:{:.6}", request_id, estimated_cost)
        } else {
            request_id.to_string()
        };

        let (tier, members) = window_add(tenant.tenant_id(), dim, now, window_start, &member).await;
        let total = sum_members(dim, &members);

        if total > limit {
            window_remove(tier, tenant.tenant_id(), dim, &member).await;
            for (recorded_dim, recorded_tier, recorded_member) in recorded {
                window_remove(recorded_tier, tenant.tenant_id(), recorded_dim, &recorded_member).await;
            }

            let message = format!(
                "{} limit of {} exceeded for tenant {}",
                dim.key(),
                limit,
                tenant.tenant_id()
            );
            let retry_after = dim.window_secs().max(1) as u64;
            return Err(if dim.is_cost() {
                AppError::QuotaExceeded(message, retry_after)
            } else {
                AppError::RateLimitExceeded(message, retry_after)
            });
        }

        reports.push((dim, limit, total));
        recorded.push((dim, tier, member));
    }

    Ok(rate_limit_headers(&reports))
}

/// After the upstream responds with real usage, swap the pre-call cost
/// estimate recorded by `check_and_record` for the actual cost in every
/// cost window, so later checks within the same window aren't left
/// skewed by the conservative pre-call guess. Best-effort: a failure here
/// only means the next window check runs against a slightly stale total,
/// never a lost or double-counted request.
pub async fn record_actual(tenant: &TenantContext, request_id: &str, estimated_cost: f64, actual_cost: f64) {
    if (actual_cost - estimated_cost).abs() < 1e-9 {
        return;
    }

    let old_member = format!("{}:{:.6}", request_id, estimated_cost);
    let new_member = format!("{}:{:.6}", request_id, actual_cost);

    for dim in [Dimension::CostPerMinute, Dimension::CostPerHour, Dimension::CostPerDay] {
        window_remove(Tier::Distributed, tenant.tenant_id(), dim, &old_member).await;
        window_remove(Tier::Local, tenant.tenant_id(), dim, &old_member).await;

        let now = now_millis();
        let window_start = now - dim.window_secs() * 1000;
        window_add(tenant.tenant_id(), dim, now, window_start, &new_member).await;
    }
}

fn rate_limit_headers(reports: &[(Dimension, f64, f64)]) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    let mut most_restrictive: Option<(f64, Dimension, f64, f64)> = None;

    for (dim, limit, used) in reports {
        let remaining = (limit - used).max(0.0);
        let label = match dim {
            Dimension::RequestsPerMinute => "requests-minute",
            Dimension::RequestsPerHour => "requests-hour",
            Dimension::RequestsPerDay => "requests-day",
            Dimension::CostPerMinute => "cost-minute",
            Dimension::CostPerHour => "cost-hour",
            Dimension::CostPerDay => "cost-day",
        };
        headers.push((format!("x-ratelimit-{}-limit", label), limit.to_string()));
        headers.push((format!("x-ratelimit-{}-remaining", label), remaining.to_string()));
        headers.push((format!("x-ratelimit-{}-reset", label), dim.window_secs().to_string()));

        let ratio = if *limit > 0.0 { remaining / limit } else { 0.0 };
        let is_more_restrictive = most_restrictive.map(|(r, ..)| ratio < r).unwrap_or(true);
        if is_more_restrictive {
            most_restrictive = Some((ratio, *dim, *limit, remaining));
        }
    }

    if let Some((_, dim, limit, remaining)) = most_restrictive {
        headers.push(("x-ratelimit-limit".to_string(), limit.to_string()));
        headers.push(("x-ratelimit-remaining".to_string(), remaining.to_string()));
        headers.push(("x-ratelimit-reset".to_string(), dim.window_secs().to_string()));
        headers.push(("x-ratelimit-type".to_string(), dim.key().to_string()));
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Credential, Tenant};

    fn tenant_with_limits(id: &str, limits: RateLimits) -> TenantContext {
        TenantContext {
            tenant: Tenant {
                tenant_id: id.to_string(),
                active: true,
                allowed_providers: vec![],
                rate_limits: limits,
            },
            credential: Credential {
                credential_id: format!("{}-cred", id),
                tenant_id: id.to_string(),
                active: true,
                expires_at: None,
                allowed_ips: vec![],
                allowed_endpoints: vec![],
                allowed_providers: vec![],
            },
        }
    }

    fn no_limits() -> RateLimits {
        RateLimits {
            requests_per_minute: None,
            requests_per_hour: None,
            requests_per_day: None,
            cost_per_minute_usd: None,
            cost_per_hour_usd: None,
            cost_per_day_usd: None,
        }
    }

    #[tokio::test]
    async fn unconfigured_limits_always_pass() {
        let tenant = tenant_with_limits("tenant-unlimited", no_limits());
        assert!(check_and_record(&tenant, "req-1", 0.01).await.is_ok());
    }

    #[tokio::test]
    async fn request_limit_denies_once_exceeded() {
        let mut limits = no_limits();
        limits.requests_per_minute = Some(1);
        let tenant = tenant_with_limits("tenant-req-limit", limits);

        assert!(check_and_record(&tenant, "req-a", 0.0).await.is_ok());
        assert!(check_and_record(&tenant, "req-b", 0.0).await.is_err());
    }

    #[tokio::test]
    async fn cost_limit_denies_once_exceeded() {
        let mut limits = no_limits();
        limits.cost_per_minute_usd = Some(1.0);
        let tenant = tenant_with_limits("tenant-cost-limit", limits);

        assert!(check_and_record(&tenant, "req-c", 0.5).await.is_ok());
        assert!(check_and_record(&tenant, "req-d", 0.6).await.is_err());
    }
}
