//! Anthropic (Claude) API handler
//!
//! Builds and relays requests to Anthropic's native Messages API. Each
//! request targets Anthropic directly — no cross-provider translation.

use axum::{
    body::{Body, Bytes},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::forward::client::{self, drain_sse_lines, is_sse_done, parse_sse_data};
use crate::forward::context::{estimate_tokens, ForwardContext, TokenUsage, UpstreamResponse};
use crate::forward::error::{ForwardError, ForwardResult};

use super::ProviderHandlerImpl;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic API handler
pub struct AnthropicHandler;

fn base_endpoint(ctx: &ForwardContext) -> &str {
    if ctx.base_url.is_empty() {
        DEFAULT_ENDPOINT
    } else {
        &ctx.base_url
    }
}

fn extract_usage(response: &Value) -> TokenUsage {
    let usage = response.get("usage");
    let prompt = usage.and_then(|u| u.get("input_tokens")).and_then(|v| v.as_i64()).unwrap_or(0);
    let completion = usage.and_then(|u| u.get("output_tokens")).and_then(|v| v.as_i64()).unwrap_or(0);
    TokenUsage::new(prompt, completion)
}

impl ProviderHandlerImpl for AnthropicHandler {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        format!("{}{}", base_endpoint(ctx).trim_end_matches('/'), path)
    }

    fn build_headers(&self, ctx: &ForwardContext) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = ctx.get_api_key() {
            if let Ok(value) = HeaderValue::from_str(&api_key) {
                headers.insert("x-api-key", value);
            }
        }

        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers
    }

    fn transform_request(&self, ctx: &ForwardContext, payload: &Value) -> Value {
        let mut body = payload.clone();
        let Some(obj) = body.as_object_mut() else {
            return body;
        };

        obj.insert("model".to_string(), Value::String(ctx.model.upstream_model().to_string()));

        // Anthropic has no system-role message: lift it out of `messages` into
        // the top-level `system` field, preserving the rest in order.
        if let Some(Value::Array(messages)) = obj.get("messages") {
            let mut system_parts = Vec::new();
            let mut rest = Vec::new();
            for message in messages {
                let is_system = message.get("role").and_then(|r| r.as_str()) == Some("system");
                if is_system {
                    if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                        system_parts.push(content.to_string());
                    }
                } else {
                    rest.push(message.clone());
                }
            }
            if !system_parts.is_empty() {
                obj.insert("system".to_string(), Value::String(system_parts.join("\n")));
            }
            obj.insert("messages".to_string(), Value::Array(rest));
        }

        if obj.get("max_tokens").and_then(|v| v.as_i64()).is_none() {
            obj.insert("max_tokens".to_string(), Value::Number(4096.into()));
        }

        if let Some(stop) = obj.remove("stop") {
            obj.insert("stop_sequences".to_string(), stop);
        }

        body
    }

    fn parse_response(&self, response: &Value) -> TokenUsage {
        extract_usage(response)
    }

    fn estimate_request_tokens(&self, payload: &Value) -> i64 {
        let messages = payload.get("messages").map(|m| m.to_string()).unwrap_or_default();
        estimate_tokens(&messages)
    }

    async fn handle_request(&self, ctx: ForwardContext, payload: Value) -> ForwardResult<UpstreamResponse> {
        let request_body = self.transform_request(&ctx, &payload);
        let headers = self.build_headers(&ctx);
        let url = self.build_url(&ctx, "/v1/messages");

        let client = client::default_client()?;
        let result = client::make_request(&client, &url, headers, &request_body).await?;
        let latency_ms = result.latency_ms;
        let status = result.response.status();

        let body_text = result
            .response
            .text()
            .await
            .map_err(|e| ForwardError::RequestFailed(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(map_error_status(status.as_u16(), &body_text));
        }

        let body: Value = client::parse_json_response(&body_text)
            .map_err(|e| ForwardError::RequestFailed(format!("invalid JSON from upstream: {}", e)))?;
        let usage = extract_usage(&body);

        Ok(UpstreamResponse {
            body,
            latency_ms,
            status: status.as_u16(),
            usage,
        })
    }

    async fn handle_stream(&self, ctx: ForwardContext, payload: Value) -> ForwardResult<Response> {
        let mut request_body = self.transform_request(&ctx, &payload);
        if let Some(obj) = request_body.as_object_mut() {
            obj.insert("stream".to_string(), Value::Bool(true));
        }
        let headers = self.build_headers(&ctx);
        let url = self.build_url(&ctx, "/v1/messages");

        let client = client::streaming_client()?;
        let upstream = client
            .post(&url)
            .headers(headers)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ForwardError::RequestFailed(format!("streaming request failed: {}", e)))?;

        let status = upstream.status();
        if !status.is_success() {
            let body_text = upstream.text().await.unwrap_or_default();
            return Err(map_error_status(status.as_u16(), &body_text));
        }

        let usage_tracker = Arc::new(Mutex::new(TokenUsage::default()));
        let usage_for_stream = Arc::clone(&usage_tracker);
        let line_buffer = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let stream = upstream
            .bytes_stream()
            .map(move |chunk_result| {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        crate::logger::error("anthropic", &format!("stream read error: {}", e));
                        return vec![Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))];
                    }
                };

                let lines = {
                    let mut buffer = line_buffer.lock().unwrap();
                    drain_sse_lines(&mut buffer, &bytes)
                };

                for line in &lines {
                    let Some(data) = parse_sse_data(line) else { continue };
                    if is_sse_done(data) {
                        continue;
                    }
                    let Ok(event) = serde_json::from_str::<Value>(data) else { continue };
                    let Some(event_usage) =
                        event.get("message").and_then(|m| m.get("usage")).or_else(|| event.get("usage"))
                    else {
                        continue;
                    };
                    let mut tracker = usage_for_stream.lock().unwrap();
                    if let Some(input) = event_usage.get("input_tokens").and_then(|v| v.as_i64()) {
                        tracker.prompt_tokens = input;
                    }
                    if let Some(output_tok) = event_usage.get("output_tokens").and_then(|v| v.as_i64()) {
                        tracker.completion_tokens = output_tok;
                    }
                }

                let rejoined: Vec<u8> = lines.iter().flat_map(|l| format!("{}\n", l).into_bytes()).collect();
                vec![Ok(Bytes::from(rejoined))]
            })
            .flat_map(futures_util::stream::iter);

        let ctx_for_log = ctx;
        let usage_for_log = Arc::clone(&usage_tracker);
        let logged_stream = stream
            .chain(futures_util::stream::once(async move {
                let usage = usage_for_log.lock().unwrap().clone();
                ctx_for_log.log_usage(&usage, 200, start.elapsed().as_millis() as u64);
                Err(std::io::Error::new(std::io::ErrorKind::Other, "stream_end"))
            }))
            .filter_map(|result| async move {
                match result {
                    Ok(bytes) => Some(Ok::<Bytes, std::io::Error>(bytes)),
                    Err(e) if e.to_string() == "stream_end" => None,
                    Err(e) => Some(Err(e)),
                }
            });

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .body(Body::from_stream(logged_stream))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
    }
}

fn map_error_status(status: u16, body: &str) -> ForwardError {
    match status {
        401 => ForwardError::Unauthorized(body.to_string()),
        403 => ForwardError::Forbidden(body.to_string()),
        404 => ForwardError::ModelNotFound(body.to_string()),
        429 => ForwardError::RateLimited(body.to_string()),
        400 => ForwardError::InvalidRequest(body.to_string()),
        // Covers Anthropic's 529 overloaded_error alongside the standard 5xx set.
        500..=599 => ForwardError::UpstreamStatus(status, body.to_string()),
        _ => ForwardError::RequestFailed(format!("upstream status {}: {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::context::{AuthMode, ModelInfo, Provider, RequestMeta};

    fn test_ctx() -> ForwardContext {
        ForwardContext {
            auth_mode: AuthMode::SystemKey,
            model: ModelInfo {
                id: "claude-3-5-sonnet-20241022".to_string(),
                provider: Provider::Anthropic,
                upstream_model_id: None,
                price_prompt_per_1k: 0.0,
                price_completion_per_1k: 0.0,
                minimum_cost_usd: 0.0,
                context_window: 200_000,
            },
            base_url: String::new(),
            meta: RequestMeta::default(),
            is_streaming: false,
        }
    }

    #[test]
    fn lifts_system_message_to_top_level() {
        let handler = AnthropicHandler;
        let ctx = test_ctx();
        let payload = serde_json::json!({
            "model": "claude-3-5-sonnet-20241022",
            "messages": [
                {"role": "system", "content": "S"},
                {"role": "user", "content": "U"}
            ]
        });
        let transformed = handler.transform_request(&ctx, &payload);
        assert_eq!(transformed["system"], "S");
        assert_eq!(transformed["messages"], serde_json::json!([{"role": "user", "content": "U"}]));
    }

    #[test]
    fn defaults_max_tokens_and_renames_stop() {
        let handler = AnthropicHandler;
        let ctx = test_ctx();
        let payload = serde_json::json!({"messages": [], "stop": ["END"]});
        let transformed = handler.transform_request(&ctx, &payload);
        assert_eq!(transformed["max_tokens"], 4096);
        assert_eq!(transformed["stop_sequences"], serde_json::json!(["END"]));
        assert!(transformed.get("stop").is_none());
    }

    #[test]
    fn extracts_usage_from_response() {
        let response = serde_json::json!({
            "usage": { "input_tokens": 10, "output_tokens": 20 }
        });
        let usage = extract_usage(&response);
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 20);
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let response = serde_json::json!({});
        let usage = extract_usage(&response);
        assert_eq!(usage.total(), 0);
    }
}
