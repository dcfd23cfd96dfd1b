//! Top-level error taxonomy
//!
//! Every error that can terminate a request pipeline resolves to one of
//! these stable kinds, each with a fixed HTTP status and a retryable flag.
//! Handlers and middleware construct `AppError` directly; provider-driver
//! internals raise `crate::forward::error::ForwardError` first and get
//! converted at the pipeline boundary (`From<ForwardError> for AppError`).

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing credential")]
    MissingCredential,
    #[error("malformed credential")]
    MalformedCredential,
    #[error("credential not found")]
    CredentialNotFound,
    #[error("credential expired")]
    CredentialExpired,
    #[error("credential revoked")]
    CredentialRevoked,
    #[error("tenant suspended")]
    TenantSuspended,
    #[error("source ip not allowed")]
    IpNotAllowed,
    #[error("endpoint not allowed for this credential")]
    EndpointNotAllowed,
    #[error("provider not allowed for this credential")]
    ProviderNotAllowed,
    #[error("tenant not found")]
    TenantNotFound,
    /// Second field is the advisory `Retry-After` in seconds (the
    /// dimension's window size — the decision is recomputed per request,
    /// so this is an upper bound rather than a precise reset time).
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String, u64),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String, u64),
    #[error("upstream provider error: {0}")]
    UpstreamError(String),
    #[error("upstream timed out")]
    Timeout,
    #[error("admin backend error: {0}")]
    BackendError(String),
    #[error("distributed tier unavailable: {0}")]
    DistributedTierError(String),
    #[error("no provider credential available")]
    NoProviderCredential,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::MissingCredential => "missing_credential",
            AppError::MalformedCredential => "malformed_credential",
            AppError::CredentialNotFound => "credential_not_found",
            AppError::CredentialExpired => "credential_expired",
            AppError::CredentialRevoked => "credential_revoked",
            AppError::TenantSuspended => "tenant_suspended",
            AppError::IpNotAllowed => "ip_not_allowed",
            AppError::EndpointNotAllowed => "endpoint_not_allowed",
            AppError::ProviderNotAllowed => "provider_not_allowed",
            AppError::TenantNotFound => "tenant_not_found",
            AppError::RateLimitExceeded(..) => "rate_limit_exceeded",
            AppError::QuotaExceeded(..) => "quota_exceeded",
            AppError::UpstreamError(_) => "upstream_error",
            AppError::Timeout => "timeout",
            AppError::BackendError(_) => "backend_error",
            AppError::DistributedTierError(_) => "distributed_tier_error",
            AppError::NoProviderCredential => "no_provider_credential",
            AppError::ModelNotFound(_) => "model_not_found",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Internal(_) => "internal_error",
            AppError::Database(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::MissingCredential
            | AppError::MalformedCredential
            | AppError::CredentialNotFound
            | AppError::CredentialExpired
            | AppError::CredentialRevoked => StatusCode::UNAUTHORIZED,
            AppError::TenantSuspended
            | AppError::IpNotAllowed
            | AppError::EndpointNotAllowed
            | AppError::ProviderNotAllowed => StatusCode::FORBIDDEN,
            AppError::TenantNotFound | AppError::ModelNotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimitExceeded(..) | AppError::QuotaExceeded(..) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            AppError::BackendError(_)
            | AppError::DistributedTierError(_)
            | AppError::NoProviderCredential
            | AppError::Internal(_)
            | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a client can reasonably retry the exact same request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimitExceeded(..)
                | AppError::QuotaExceeded(..)
                | AppError::Timeout
                | AppError::UpstreamError(_)
                | AppError::DistributedTierError(_)
                | AppError::BackendError(_)
        )
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AppError::RateLimitExceeded(_, secs) | AppError::QuotaExceeded(_, secs) => Some(*secs),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(rename = "requestId")]
    request_id: String,
    timestamp: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    documentation: Option<String>,
}

impl AppError {
    /// Render the full response envelope (§6), given the request id
    /// assigned by the pipeline. Unlike the blanket `IntoResponse` impl
    /// below, this carries `requestId` through to the body and attaches
    /// the advisory `WWW-Authenticate`/`Retry-After` headers the taxonomy
    /// calls for.
    pub fn render(self, request_id: &str) -> Response {
        let status = self.status();
        if status.is_server_error() {
            crate::logger::error("pipeline", &format!("{}: {}", self.kind(), self));
        } else {
            crate::logger::warn("pipeline", &format!("{}: {}", self.kind(), self));
        }

        let retry_after = self.retry_after_secs();
        let body = ErrorBody {
            error: self.kind().to_string(),
            message: self.to_string(),
            code: status.as_u16(),
            details: None,
            request_id: request_id.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            retry_after,
            documentation: None,
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(value) = HeaderValue::from_str("Bearer realm=\"aegis-relay\", error=\"invalid_token\"") {
                response.headers_mut().insert(axum::http::header::WWW_AUTHENTICATE, value);
            }
        }
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Fallback for call sites with no request id in scope. Prefer `render`
/// on the pipeline's hot path.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.render("unknown")
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<crate::forward::error::ForwardError> for AppError {
    fn from(err: crate::forward::error::ForwardError) -> Self {
        use crate::forward::error::ForwardError as FE;
        match err {
            FE::Unauthorized(m) | FE::Forbidden(m) => AppError::UpstreamError(m),
            FE::ModelNotFound(m) | FE::UpstreamNotFound(m) => AppError::ModelNotFound(m),
            FE::RequestFailed(m) => AppError::UpstreamError(m),
            FE::InvalidRequest(m) => AppError::InvalidRequest(m),
            FE::RateLimited(m) => AppError::RateLimitExceeded(m, 60),
            FE::UpstreamStatus(code, m) => AppError::UpstreamError(format!("upstream status {}: {}", code, m)),
            FE::Timeout(_) => AppError::Timeout,
            FE::Internal(m) => AppError::Internal(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::MissingCredential.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::TenantSuspended.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimitExceeded("x".into(), 30).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert!(AppError::Timeout.retryable());
        assert!(!AppError::MissingCredential.retryable());
    }

    #[test]
    fn rate_limit_error_carries_retry_after() {
        let err = AppError::RateLimitExceeded("too many requests".into(), 45);
        assert_eq!(err.retry_after_secs(), Some(45));
    }

    #[tokio::test]
    async fn render_includes_request_id_and_www_authenticate() {
        use axum::body::to_bytes;

        let response = AppError::MissingCredential.render("req-123");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(axum::http::header::WWW_AUTHENTICATE));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["requestId"], "req-123");
        assert_eq!(body["error"], "missing_credential");
    }
}
