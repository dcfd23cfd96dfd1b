//! Forward module
//!
//! Builds and sends the single upstream request a `ForwardContext` describes,
//! retrying on transient failures. Provider selection and request assembly
//! happen upstream in `pipeline`; this module only knows how to talk to one
//! provider at a time.
//!
//! ## Components
//!
//! - `handlers`: provider-specific request/response handling
//! - `client`: HTTP client utilities with retry logic
//! - `context`: shared data structures
//! - `error`: error types

pub mod client;
pub mod context;
pub mod error;
pub mod handlers;

use axum::response::Response;
use serde_json::{json, Value};

pub use context::{ForwardContext, Provider, RetryConfig, TokenUsage, UpstreamResponse};
pub use error::{ForwardError, ForwardResult};
pub use handlers::{get_handler, ProviderHandler};

/// Supported API styles, in priority order.
pub fn api_styles() -> Vec<&'static str> {
    vec!["openai", "anthropic", "gemini"]
}

fn should_retry_error(err: &ForwardError, provider: context::Provider) -> bool {
    match err {
        ForwardError::Timeout(_) => true,
        ForwardError::RequestFailed(_) => true,
        ForwardError::RateLimited(_) => client::should_retry_for_provider(provider, 429),
        ForwardError::UpstreamStatus(code, _) => client::should_retry_for_provider(provider, *code),
        _ => false,
    }
}

/// Send one request to the provider named in `ctx.model.provider`, retrying
/// transient failures with exponential backoff. Returns the raw upstream
/// body on success, or the final `ForwardError` once retries are exhausted.
pub async fn dispatch_request(ctx: ForwardContext, payload: Value) -> Result<UpstreamResponse, ForwardError> {
    let retry_config = ctx.retry_config();
    let handler = get_handler(ctx.model.provider);

    let mut attempt = 0u32;
    loop {
        match handler.handle_request(ctx.clone(), payload.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                attempt += 1;
                if !should_retry_error(&err, ctx.model.provider) || attempt >= retry_config.max_attempts {
                    return Err(err);
                }
                let delay = client::calculate_retry_delay(attempt, &retry_config);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Send a streaming request; streaming responses are relayed as-is and are
/// not retried once bytes start flowing to the client.
pub async fn dispatch_stream(ctx: ForwardContext, payload: Value) -> Result<Response, ForwardError> {
    let handler = get_handler(ctx.model.provider);
    handler.handle_stream(ctx, payload).await
}

/// Health probe endpoint body listing the providers this build can reach.
pub fn health_body() -> Value {
    json!({
        "status": "ok",
        "providers": api_styles(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_styles() {
        let styles = api_styles();
        assert!(styles.contains(&"openai"));
        assert!(styles.contains(&"anthropic"));
        assert!(styles.contains(&"gemini"));
    }
}
