//! Gemini API handler
//!
//! Builds and relays requests to Google's Gemini API (AI Studio) in its
//! native `generateContent`/`streamGenerateContent` form.

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

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Gemini API handler
pub struct GeminiHandler;

fn base_endpoint(ctx: &ForwardContext) -> &str {
    if ctx.base_url.is_empty() {
        DEFAULT_ENDPOINT
    } else {
        &ctx.base_url
    }
}

fn extract_usage(response: &Value) -> TokenUsage {
    let usage = response.get("usageMetadata");
    let prompt = usage.and_then(|u| u.get("promptTokenCount")).and_then(|v| v.as_i64()).unwrap_or(0);
    let completion = usage
        .and_then(|u| u.get("candidatesTokenCount"))
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    TokenUsage::new(prompt, completion)
}

impl ProviderHandlerImpl for GeminiHandler {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn build_url(&self, ctx: &ForwardContext, path: &str) -> String {
        let base = format!("{}{}", base_endpoint(ctx).trim_end_matches('/'), path);
        if let Some(api_key) = ctx.get_api_key() {
            let separator = if base.contains('?') { "&" } else { "?" };
            format!("{}{}key={}", base, separator, api_key)
        } else {
            base
        }
    }

    fn build_headers(&self, _ctx: &ForwardContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers
    }

    fn transform_request(&self, _ctx: &ForwardContext, payload: &Value) -> Value {
        let Some(messages) = payload.get("messages").and_then(|m| m.as_array()) else {
            return payload.clone();
        };

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.get("role").and_then(|r| r.as_str()) != Some("system"))
            .map(|m| {
                let role = match m.get("role").and_then(|r| r.as_str()) {
                    Some("assistant") => "model",
                    _ => "user",
                };
                let text = m.get("content").and_then(|c| c.as_str()).unwrap_or("").to_string();
                serde_json::json!({"role": role, "parts": [{"text": text}]})
            })
            .collect();

        let mut body = serde_json::Map::new();
        body.insert("contents".to_string(), Value::Array(contents));

        let mut generation_config = serde_json::Map::new();
        if let Some(temperature) = payload.get("temperature").cloned() {
            generation_config.insert("temperature".to_string(), temperature);
        }
        if let Some(max_tokens) = payload.get("max_tokens").cloned() {
            generation_config.insert("maxOutputTokens".to_string(), max_tokens);
        }
        if !generation_config.is_empty() {
            body.insert("generationConfig".to_string(), Value::Object(generation_config));
        }

        if let Some(stream) = payload.get("stream").cloned() {
            body.insert("stream".to_string(), stream);
        }

        Value::Object(body)
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
        let model = ctx.model.upstream_model();
        let path = format!("/v1beta/models/{}:generateContent", model);
        let url = self.build_url(&ctx, &path);

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
        let request_body = self.transform_request(&ctx, &payload);
        let headers = self.build_headers(&ctx);
        let model = ctx.model.upstream_model();
        let path = format!("/v1beta/models/{}:streamGenerateContent?alt=sse", model);
        let url = self.build_url(&ctx, &path);

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
                        crate::logger::error("gemini", &format!("stream read error: {}", e));
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
                    let event_usage = extract_usage(&event);
                    if event_usage.total() > 0 {
                        *usage_for_stream.lock().unwrap() = event_usage;
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
                id: "gemini-1.5-pro".to_string(),
                provider: Provider::Gemini,
                upstream_model_id: None,
                price_prompt_per_1k: 0.0,
                price_completion_per_1k: 0.0,
                minimum_cost_usd: 0.0,
                context_window: 2_000_000,
            },
            base_url: String::new(),
            meta: RequestMeta::default(),
            is_streaming: false,
        }
    }

    #[test]
    fn reshapes_messages_into_contents() {
        let handler = GeminiHandler;
        let ctx = test_ctx();
        let payload = serde_json::json!({
            "messages": [
                {"role": "system", "content": "S"},
                {"role": "user", "content": "U"},
                {"role": "assistant", "content": "A"}
            ],
            "temperature": 0.5,
            "max_tokens": 256
        });
        let transformed = handler.transform_request(&ctx, &payload);
        assert_eq!(
            transformed["contents"],
            serde_json::json!([
                {"role": "user", "parts": [{"text": "U"}]},
                {"role": "model", "parts": [{"text": "A"}]}
            ])
        );
        assert_eq!(transformed["generationConfig"]["temperature"], 0.5);
        assert_eq!(transformed["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn extracts_usage_from_response() {
        let response = serde_json::json!({
            "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 7 }
        });
        let usage = extract_usage(&response);
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 7);
    }
}
