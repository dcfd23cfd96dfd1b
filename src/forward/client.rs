//! HTTP client utilities for forwarding requests
//!
//! Provides common functionality for making HTTP requests to upstream providers.

use std::time::{Duration, Instant};

use rand::{rngs::OsRng, RngCore};
use reqwest::{header::HeaderMap, Client, Response};
use serde_json::Value;

use super::context::{Provider, RetryConfig};
use super::error::{ForwardError, ForwardResult};

/// Create a new HTTP client with standard configuration
pub fn create_client(timeout_secs: u64) -> ForwardResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ForwardError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Create a default client for non-streaming requests
pub fn default_client() -> ForwardResult<Client> {
    create_client(crate::config::load().request_timeout_secs)
}

/// Create a client for streaming requests (longer timeout)
pub fn streaming_client() -> ForwardResult<Client> {
    create_client(crate::config::load().request_timeout_secs.max(300))
}

/// Determine if an HTTP status code should trigger a retry
pub fn should_retry(status: u16) -> bool {
    // Only retry on server errors (5xx) and rate limiting (429)
    // Do NOT retry on client errors (4xx) as they indicate bad requests
    matches!(status, 500..=599 | 429)
}

/// Provider-aware retry policy. Anthropic's `529 overloaded_error` is a
/// server-side capacity signal like any other 5xx, already covered by the
/// `500..=599` range in `should_retry`; providers are free to diverge from
/// the base set here as their error codes require.
pub fn should_retry_for_provider(_provider: Provider, status: u16) -> bool {
    should_retry(status)
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = config.initial_delay_ms;
    let max_delay = config.max_delay_ms;

    // Exponential backoff: 2^attempt * base_delay
    let exp_delay = (1u64 << attempt.min(10)) * base_delay;
    let delay = exp_delay.min(max_delay);

    // Add jitter (up to 25% of delay)
    let mut jitter_bytes = [0u8; 8];
    OsRng.fill_bytes(&mut jitter_bytes);
    let jitter = u64::from_le_bytes(jitter_bytes) % (delay / 4 + 1);

    Duration::from_millis(delay + jitter)
}

/// Result of a single request attempt
pub struct RequestAttemptResult {
    pub response: Response,
    pub latency_ms: u64,
}

/// Make a single POST request attempt
pub async fn make_request(
    client: &Client,
    url: &str,
    headers: HeaderMap,
    body: &Value,
) -> ForwardResult<RequestAttemptResult> {
    let start = Instant::now();

    crate::logger::debug("client", &format!("Sending request to: {}", url));

    let response = client
        .post(url)
        .headers(headers)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            crate::logger::error("client", &format!("Request failed: {}", e));
            if e.is_timeout() {
                ForwardError::Timeout("Request timeout".to_string())
            } else if e.is_connect() {
                ForwardError::RequestFailed(format!("Connection failed: {}", e))
            } else {
                ForwardError::RequestFailed(format!("Request error: {}", e))
            }
        })?;

    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status();

    crate::logger::debug("client", &format!("Response status: {} ({}ms)", status, latency_ms));

    Ok(RequestAttemptResult { response, latency_ms })
}

/// Send a request to a single upstream base URL, retrying on transient
/// failures with exponential backoff and jitter. There is no cross-upstream
/// fallback: each request targets exactly one provider's base URL.
pub async fn send_with_retry(
    client: &Client,
    base_url: &str,
    path: &str,
    headers: HeaderMap,
    body: &Value,
    config: &RetryConfig,
) -> ForwardResult<RequestAttemptResult> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);

    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if attempt >= config.max_attempts {
            return Err(ForwardError::RequestFailed(format!(
                "Max retries ({}) exceeded. Last error: {}",
                config.max_attempts,
                last_error.unwrap_or_else(|| "Unknown".to_string())
            )));
        }

        match make_request(client, &url, headers.clone(), body).await {
            Ok(result) => {
                let status = result.response.status();

                if status.is_success() {
                    return Ok(result);
                } else if !should_retry(status.as_u16()) {
                    // Don't retry on client errors (4xx except 429)
                    let error_body = result.response.text().await.unwrap_or_default();
                    return Err(ForwardError::RequestFailed(format!(
                        "Upstream returned {}: {}",
                        status, error_body
                    )));
                } else {
                    last_error = Some(format!("HTTP {}", status));
                }
            }
            Err(e) => {
                last_error = Some(e.to_string());
            }
        }

        attempt += 1;
        let delay = calculate_retry_delay(attempt, config);
        tokio::time::sleep(delay).await;
    }
}

/// Parse SSE (Server-Sent Events) data line
pub fn parse_sse_data(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("data:") {
        return Some(rest.strip_prefix(' ').unwrap_or(rest));
    }
    None
}

/// Check if SSE line indicates stream end
pub fn is_sse_done(data: &str) -> bool {
    data.trim() == "[DONE]"
}

/// Normalize stream flag to a boolean if present.
pub fn normalize_stream_flag(payload: &mut Value) -> bool {
    let Some(obj) = payload.as_object_mut() else {
        return false;
    };

    let is_streaming = match obj.get("stream") {
        Some(Value::Bool(stream)) => *stream,
        Some(Value::Number(value)) => value.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(Value::String(value)) => {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "true" | "1" | "yes" | "on")
        }
        _ => false,
    };

    if obj.contains_key("stream") {
        obj.insert("stream".to_string(), Value::Bool(is_streaming));
    }

    is_streaming
}

/// Parse JSON response text with a fallback for SSE `[DONE]` payloads.
pub fn parse_json_response(response_text: &str) -> Result<Value, serde_json::Error> {
    let trimmed = response_text.trim();
    let parse_err = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    if response_text.contains("data:") {
        let mut last_value = None;
        for line in response_text.lines() {
            if let Some(data) = parse_sse_data(line) {
                let data = data.trim();
                if data.is_empty() || is_sse_done(data) {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(data) {
                    last_value = Some(value);
                }
            }
        }
        if let Some(value) = last_value {
            return Ok(value);
        }
    }

    if trimmed.contains("[DONE]") {
        let cleaned = trimmed.replace("[DONE]", "");
        if let Ok(value) = serde_json::from_str::<Value>(cleaned.trim()) {
            return Ok(value);
        }
    }

    Err(parse_err)
}

/// Drain complete SSE lines from a byte buffer.
///
/// This handles chunked responses where line breaks may split across reads.
pub fn drain_sse_lines(buffer: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    if !chunk.is_empty() {
        buffer.extend_from_slice(chunk);
    }

    let mut lines = Vec::new();
    loop {
        let Some(pos) = buffer.iter().position(|&b| b == b'\n') else {
            break;
        };

        let mut line = buffer.drain(..=pos).collect::<Vec<u8>>();
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        lines.push(String::from_utf8_lossy(&line).to_string());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        assert!(should_retry(500));
        assert!(should_retry(502));
        assert!(should_retry(503));
        assert!(should_retry(504));
        assert!(should_retry(429));

        assert!(!should_retry(400));
        assert!(!should_retry(401));
        assert!(!should_retry(403));
        assert!(!should_retry(404));
        assert!(!should_retry(200));
    }

    #[test]
    fn test_calculate_retry_delay() {
        let config = RetryConfig::default();

        let delay0 = calculate_retry_delay(0, &config);
        let delay1 = calculate_retry_delay(1, &config);
        let delay2 = calculate_retry_delay(2, &config);

        // Each delay should be larger (exponential backoff)
        assert!(delay1 >= delay0);
        assert!(delay2 >= delay1);

        // Should not exceed max delay
        let delay_max = calculate_retry_delay(20, &config);
        assert!(delay_max.as_millis() <= (config.max_delay_ms + config.max_delay_ms / 4) as u128);
    }

    #[test]
    fn test_parse_sse_data() {
        assert_eq!(parse_sse_data("data: hello"), Some("hello"));
        assert_eq!(parse_sse_data("data:hello"), Some("hello"));
        assert_eq!(parse_sse_data("data: [DONE]"), Some("[DONE]"));
        assert_eq!(parse_sse_data("event: message"), None);
        assert_eq!(parse_sse_data("hello"), None);
    }

    #[test]
    fn test_is_sse_done() {
        assert!(is_sse_done("[DONE]"));
        assert!(is_sse_done("  [DONE]  "));
        assert!(!is_sse_done("{}"));
        assert!(!is_sse_done("data"));
    }

    #[test]
    fn test_drain_sse_lines_partial() {
        let mut buffer = Vec::new();
        let lines = drain_sse_lines(&mut buffer, b"data: {\"id\":");
        assert!(lines.is_empty());

        let lines = drain_sse_lines(&mut buffer, b"1}\n");
        assert_eq!(lines, vec!["data: {\"id\":1}"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_sse_lines_crlf() {
        let mut buffer = Vec::new();
        let lines = drain_sse_lines(&mut buffer, b"data: ok\r\n");
        assert_eq!(lines, vec!["data: ok"]);
        assert!(buffer.is_empty());
    }
}
