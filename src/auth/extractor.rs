//! Credential extractor
//!
//! Pulls a tenant credential out of a request from any of five carriers,
//! canonicalizes it, gates it on format, and hashes it for use as a cache
//! key (the raw credential is never logged or stored).

use axum::http::{HeaderMap, Method};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

static LIVE_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^als_[A-Za-z0-9]{43}$").unwrap());
static TEST_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^test_[A-Za-z0-9]{39}$").unwrap());
static NON_TOKEN_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());

const PLACEHOLDER_TERMS: &[&str] = &["test123", "dummy", "example", "sample", "placeholder"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    AuthorizationBearer,
    AuthorizationBasic,
    XApiKey,
    QueryParam,
    JsonBody,
}

#[derive(Debug, Clone)]
pub struct ExtractedCredential {
    pub raw: String,
    pub carrier: Carrier,
    pub hash: String,
    pub preview: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    Missing,
    Malformed,
}

/// Strip whitespace and any character outside `[A-Za-z0-9_]`.
fn canonicalize(raw: &str) -> String {
    NON_TOKEN_CHAR.replace_all(raw.trim(), "").to_string()
}

fn looks_like_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDER_TERMS.iter().any(|term| lower.contains(term))
}

fn is_valid_format(value: &str) -> bool {
    LIVE_FORMAT.is_match(value) || TEST_FORMAT.is_match(value)
}

fn hash_credential(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// First 8 chars + `...` + last 4, or the whole string if it's under 12
/// characters long.
fn preview(value: &str) -> String {
    if value.chars().count() < 12 {
        return value.to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Decode an `Authorization: Basic <base64(user:pass)>` header, accepting
/// either half as the credential if it matches the format gate.
fn basic_candidate(value: &str) -> Option<String> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    if is_valid_format(&canonicalize(user)) {
        Some(user.to_string())
    } else if is_valid_format(&canonicalize(pass)) {
        Some(pass.to_string())
    } else {
        // Neither half is a recognizable credential; let the format gate
        // downstream reject the raw username so the error kind is
        // consistent regardless of which half looked more plausible.
        Some(user.to_string())
    }
}

/// Try each carrier in order: `Authorization: Bearer`, `Authorization:
/// Basic`, `X-API-Key`, a `key`/`api_key` query parameter, then (POST +
/// JSON body only) a top-level `api_key` field.
fn find_raw_candidate(headers: &HeaderMap, query: &str, method: &Method, body: Option<&Value>) -> Option<(String, Carrier)> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some((token.to_string(), Carrier::AuthorizationBearer));
        }
        if let Some(token) = basic_candidate(value) {
            return Some((token, Carrier::AuthorizationBasic));
        }
    }
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some((value.to_string(), Carrier::XApiKey));
    }
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        if key == "key" || key == "api_key" {
            if let Some(value) = parts.next() {
                crate::logger::warn("extractor", "credential supplied via query parameter");
                return Some((value.to_string(), Carrier::QueryParam));
            }
        }
    }
    if method == Method::POST {
        if let Some(value) = body.and_then(|b| b.get("api_key")).and_then(|v| v.as_str()) {
            return Some((value.to_string(), Carrier::JsonBody));
        }
    }
    None
}

/// Extract and validate a credential from a request's headers, raw query
/// string, method, and (non-destructively read) JSON body.
pub fn extract(
    headers: &HeaderMap,
    query: &str,
    method: &Method,
    body: Option<&Value>,
) -> Result<ExtractedCredential, ExtractError> {
    let (raw, carrier) = find_raw_candidate(headers, query, method, body).ok_or(ExtractError::Missing)?;
    let canonical = canonicalize(&raw);

    if canonical.is_empty() || looks_like_placeholder(&canonical) {
        return Err(ExtractError::Malformed);
    }
    if !is_valid_format(&canonical) {
        return Err(ExtractError::Malformed);
    }

    let hash = hash_credential(&canonical);
    Ok(ExtractedCredential {
        preview: preview(&canonical),
        raw: canonical,
        carrier,
        hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, value.parse().unwrap());
        headers
    }

    fn live_key() -> String {
        format!("als_{}", "a".repeat(43))
    }

    fn get(headers: &HeaderMap, query: &str) -> Result<ExtractedCredential, ExtractError> {
        extract(headers, query, &Method::GET, None)
    }

    #[test]
    fn extracts_bearer_token() {
        let key = live_key();
        let headers = headers_with("authorization", &format!("Bearer {}", key));
        let extracted = get(&headers, "").unwrap();
        assert_eq!(extracted.carrier, Carrier::AuthorizationBearer);
        assert_eq!(extracted.raw, key);
    }

    #[test]
    fn extracts_basic_auth_password_half() {
        let key = live_key();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("user:{}", key));
        let headers = headers_with("authorization", &format!("Basic {}", encoded));
        let extracted = get(&headers, "").unwrap();
        assert_eq!(extracted.carrier, Carrier::AuthorizationBasic);
        assert_eq!(extracted.raw, key);
    }

    #[test]
    fn extracts_x_api_key_header() {
        let key = live_key();
        let headers = headers_with("x-api-key", &key);
        let extracted = get(&headers, "").unwrap();
        assert_eq!(extracted.carrier, Carrier::XApiKey);
    }

    #[test]
    fn extracts_query_param() {
        let key = live_key();
        let headers = HeaderMap::new();
        let extracted = get(&headers, &format!("key={}", key)).unwrap();
        assert_eq!(extracted.carrier, Carrier::QueryParam);
    }

    #[test]
    fn extracts_json_body_field_on_post_only() {
        let key = live_key();
        let body = serde_json::json!({"api_key": key});
        let headers = HeaderMap::new();
        assert_eq!(
            extract(&headers, "", &Method::POST, Some(&body)).unwrap().carrier,
            Carrier::JsonBody
        );
        assert_eq!(extract(&headers, "", &Method::GET, Some(&body)), Err(ExtractError::Missing));
    }

    #[test]
    fn rejects_missing_credential() {
        let headers = HeaderMap::new();
        assert_eq!(get(&headers, ""), Err(ExtractError::Missing));
    }

    #[test]
    fn rejects_malformed_format() {
        let headers = headers_with("x-api-key", "not-a-real-key");
        assert_eq!(get(&headers, ""), Err(ExtractError::Malformed));
    }

    #[test]
    fn rejects_placeholder_value() {
        let key = format!("als_example{}", "a".repeat(36));
        let headers = headers_with("x-api-key", &key);
        assert_eq!(get(&headers, ""), Err(ExtractError::Malformed));
    }

    #[test]
    fn canonicalize_strips_non_token_characters() {
        assert_eq!(canonicalize(" als_abc-def!! "), "als_abcdef");
    }

    #[test]
    fn preview_keeps_short_strings_whole() {
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn preview_truncates_long_strings() {
        let key = live_key();
        let preview = preview(&key);
        assert_eq!(preview, format!("{}...{}", &key[..8], &key[key.len() - 4..]));
    }

    #[test]
    fn hash_is_deterministic_and_does_not_echo_raw() {
        let key = live_key();
        let headers = headers_with("x-api-key", &key);
        let a = get(&headers, "").unwrap();
        let b = get(&headers, "").unwrap();
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, key);
    }
}
