//! Request pipeline
//!
//! Every proxied request advances through a fixed sequence of stages:
//! `Received -> Extracted -> Authenticated -> RateLimitChecked -> Forwarded
//! -> Accounted -> Done`. A failure at any stage short-circuits straight to
//! the error taxonomy; nothing past the failing stage runs.

use std::net::IpAddr;

use axum::response::{IntoResponse, Response};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{self, TenantContext};
use crate::error::{AppError, AppResult};
use crate::forward::{self, context::AuthMode, context::ForwardContext, context::RequestMeta, Provider};
use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Extracted,
    Authenticated,
    RateLimitChecked,
    Forwarded,
    Accounted,
}

impl Stage {
    fn label(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Extracted => "extracted",
            Stage::Authenticated => "authenticated",
            Stage::RateLimitChecked => "rate_limit_checked",
            Stage::Forwarded => "forwarded",
            Stage::Accounted => "accounted",
        }
    }
}

fn trace(request_id: &str, stage: Stage) {
    crate::logger::debug("pipeline", &format!("request {} reached stage {}", request_id, stage.label()));
}

/// Resolve which API key a request forwards with: a tenant-supplied BYOK
/// key from the admin backend if one is configured and active, otherwise
/// the shared system key for this provider.
async fn resolve_auth_mode(tenant: &TenantContext, provider: Provider) -> AuthMode {
    match crate::backend::get_vendor_key(tenant.tenant_id(), provider.as_str()).await {
        Ok(Some(key)) => AuthMode::TenantKey(key),
        Ok(None) => AuthMode::SystemKey,
        Err(e) => {
            crate::logger::warn(
                "pipeline",
                &format!("vendor key lookup failed for tenant {}, falling back to system key: {}", tenant.tenant_id(), e),
            );
            AuthMode::SystemKey
        }
    }
}

/// Run one request end to end and produce the HTTP response.
#[allow(clippy::too_many_arguments)]
pub async fn handle(
    provider: Provider,
    method: axum::http::Method,
    headers: axum::http::HeaderMap,
    query: &str,
    source_ip: Option<IpAddr>,
    body: Value,
    is_streaming: bool,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    trace(&request_id, Stage::Received);

    match run(provider, &method, &headers, query, source_ip, body, is_streaming, &request_id).await {
        Ok(response) => response,
        Err(err) => err.render(&request_id),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    provider: Provider,
    method: &axum::http::Method,
    headers: &axum::http::HeaderMap,
    query: &str,
    source_ip: Option<IpAddr>,
    body: Value,
    is_streaming: bool,
    request_id: &str,
) -> AppResult<Response> {
    let credential = auth::extractor::extract(headers, query, method, Some(&body)).map_err(|e| match e {
        auth::extractor::ExtractError::Missing => AppError::MissingCredential,
        auth::extractor::ExtractError::Malformed => AppError::MalformedCredential,
    })?;
    trace(request_id, Stage::Extracted);

    let endpoint = format!("/proxy/{}", provider.as_str());
    let tenant = auth::authenticate(&credential, source_ip, &endpoint, provider).await?;
    trace(request_id, Stage::Authenticated);

    let model_id = body.get("model").and_then(|v| v.as_str()).unwrap_or_default();
    if model_id.is_empty() {
        return Err(AppError::InvalidRequest("request body must include a \"model\" field".to_string()));
    }
    let model = registry::resolve_for_provider(model_id, provider);
    let pricing_known = registry::resolve(model_id).map(|m| m.provider) == Some(provider);

    let auth_mode = resolve_auth_mode(&tenant, provider).await;
    let meta = RequestMeta {
        tenant_id: tenant.tenant_id().to_string(),
        request_id: request_id.to_string(),
    };
    let ctx = ForwardContext {
        auth_mode,
        model,
        base_url: String::new(),
        meta,
        is_streaming,
    };

    if ctx.get_api_key().is_none() {
        return Err(AppError::NoProviderCredential);
    }

    let estimated_prompt_tokens = crate::forward::context::estimate_tokens(&body.to_string());
    let cost_estimate = crate::pricing::estimate(
        estimated_prompt_tokens,
        ctx.model.price_prompt_per_1k,
        ctx.model.minimum_cost_usd,
        pricing_known,
    );

    let rate_headers = crate::limiter::check_and_record(&tenant, request_id, cost_estimate.estimated_cost_usd).await?;
    trace(request_id, Stage::RateLimitChecked);

    if is_streaming {
        let mut response = forward::dispatch_stream(ctx, body).await?;
        trace(request_id, Stage::Forwarded);
        apply_headers(&mut response, &rate_headers);
        apply_headers(&mut response, &[("x-request-id".to_string(), request_id.to_string())]);
        return Ok(response);
    }

    let upstream = forward::dispatch_request(ctx.clone(), body).await?;
    trace(request_id, Stage::Forwarded);

    ctx.log_usage(&upstream.usage, upstream.status, upstream.latency_ms);
    trace(request_id, Stage::Accounted);

    let cost_total = ctx.calculate_cost(&upstream.usage);
    crate::limiter::record_actual(&tenant, request_id, cost_estimate.estimated_cost_usd, cost_total).await;
    crate::backend::report_usage_async(
        ctx.meta.tenant_id.clone(),
        ctx.model.provider.as_str().to_string(),
        ctx.model.upstream_model().to_string(),
        upstream.usage.prompt_tokens,
        upstream.usage.completion_tokens,
        cost_total,
        ctx.meta.request_id.clone(),
    );

    let monthly = crate::db::usage_since(tenant.tenant_id(), 30 * 86_400);
    let cost_headers = crate::pricing::cost_headers(
        upstream.usage.prompt_tokens,
        upstream.usage.completion_tokens,
        ctx.model.price_prompt_per_1k,
        ctx.model.price_completion_per_1k,
        cost_total,
        monthly.cost_usd + cost_total,
        None,
        tenant.rate_limits().cost_per_day_usd,
    );

    let mut response = axum::Json(upstream.body).into_response();
    apply_headers(&mut response, &cost_headers);
    apply_headers(&mut response, &rate_headers);
    apply_headers(&mut response, &[("x-request-id".to_string(), request_id.to_string())]);

    Ok(response)
}

fn apply_headers(response: &mut Response, headers: &[(String, String)]) {
    for (name, value) in headers {
        let (Ok(header_name), Ok(header_value)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            axum::http::HeaderValue::from_str(value),
        ) else {
            continue;
        };
        response.headers_mut().insert(header_name, header_value);
    }
}
