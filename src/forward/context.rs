//! Forward context structures
//!
//! Defines the data passed from the pipeline into a provider handler.

use serde::{Deserialize, Serialize};

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Gemini,
}

impl Provider {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "gemini" | "google" => Some(Provider::Gemini),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the upstream API key comes from for this request.
#[derive(Debug, Clone)]
pub enum AuthMode {
    /// Tenant supplied their own provider key (BYOK).
    TenantKey(String),
    /// Fall back to the shared system key for this provider.
    SystemKey,
}

/// Resolved model pricing/routing information, sourced from the registry.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub provider: Provider,
    pub upstream_model_id: Option<String>,
    pub price_prompt_per_1k: f64,
    pub price_completion_per_1k: f64,
    pub minimum_cost_usd: f64,
    pub context_window: i64,
}

impl ModelInfo {
    pub fn upstream_model(&self) -> &str {
        self.upstream_model_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }
}

/// Request metadata carried through the pipeline for accounting/logging.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub tenant_id: String,
    pub request_id: String,
}

/// Everything a provider handler needs to build and send one upstream
/// request.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub auth_mode: AuthMode,
    pub model: ModelInfo,
    pub base_url: String,
    pub meta: RequestMeta,
    pub is_streaming: bool,
}

impl ForwardContext {
    /// Effective API key: tenant-supplied key wins, otherwise the shared
    /// system key for this provider from `Config`.
    pub fn get_api_key(&self) -> Option<String> {
        match &self.auth_mode {
            AuthMode::TenantKey(key) => Some(key.clone()),
            AuthMode::SystemKey => {
                let cfg = crate::config::load();
                match self.model.provider {
                    Provider::OpenAI => cfg.openai_api_key.clone(),
                    Provider::Anthropic => cfg.anthropic_api_key.clone(),
                    Provider::Gemini => cfg.gemini_api_key.clone(),
                }
            }
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from_config()
    }

    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        crate::pricing::calculate_cost(
            usage.prompt_tokens,
            usage.completion_tokens,
            self.model.price_prompt_per_1k,
            self.model.price_completion_per_1k,
            self.model.minimum_cost_usd,
        )
    }

    pub fn efficiency(&self, usage: &TokenUsage) -> f64 {
        crate::pricing::efficiency_ratio(self.model.context_window, usage.prompt_tokens, usage.completion_tokens)
    }

    /// Persist usage accounting for a completed (or failed) request.
    #[allow(clippy::too_many_arguments)]
    pub fn log_usage(&self, usage: &TokenUsage, status_code: u16, latency_ms: u64) {
        let cost = self.calculate_cost(usage);

        crate::db::log_usage(
            &self.meta.tenant_id,
            self.model.provider.as_str(),
            self.model.upstream_model(),
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.total(),
            cost,
            &self.meta.request_id,
            status_code,
            latency_ms,
        );

        crate::logger::info(
            "forward",
            &format!(
                "request completed: tenant={}, model={}, tokens={}/{}, cost=${:.6}",
                self.meta.tenant_id,
                self.model.upstream_model(),
                usage.prompt_tokens,
                usage.completion_tokens,
                cost
            ),
        );
    }
}

/// Exponential-backoff-with-jitter retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 300,
            max_delay_ms: 3000,
        }
    }
}

impl RetryConfig {
    pub fn from_config() -> Self {
        let cfg = crate::config::load();
        Self {
            max_attempts: cfg.retry_max_attempts,
            initial_delay_ms: cfg.retry_initial_ms,
            max_delay_ms: cfg.retry_max_ms,
        }
    }
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub body: serde_json::Value,
    pub latency_ms: u64,
    pub status: u16,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
}

impl TokenUsage {
    pub fn new(prompt: i64, completion: i64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    pub fn total(&self) -> i64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Token estimate used before the upstream response is available (pre-call
/// estimate for limiter/telemetry) and as a streaming fallback when a
/// provider omits usage: `ceil(len(text) / 4)`.
pub fn estimate_tokens(text: &str) -> i64 {
    let char_count = text.chars().count() as i64;
    (char_count + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_model_falls_back_to_id() {
        let model = ModelInfo {
            id: "gpt-4o".to_string(),
            provider: Provider::OpenAI,
            upstream_model_id: None,
            price_prompt_per_1k: 0.0,
            price_completion_per_1k: 0.0,
            minimum_cost_usd: 0.0,
            context_window: 128_000,
        };
        assert_eq!(model.upstream_model(), "gpt-4o");
    }

    #[test]
    fn estimate_tokens_scales_with_length() {
        assert!(estimate_tokens("hello world") > 0);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_tokens_matches_ceil_div_4() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
