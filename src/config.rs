//! Runtime configuration
//!
//! Twelve-factor style: everything comes from the environment, loaded once
//! at boot into an immutable `Config`. There is no UI to persist settings
//! back to, so (unlike a desktop app) config is never rewritten at runtime.

use std::env;

use once_cell::sync::OnceCell;

static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn from_env() -> Self {
        match env::var("ENVIRONMENT").unwrap_or_default().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub port: u16,
    pub log_level: String,
    pub database_path: Option<String>,
    pub admin_backend_url: String,
    pub admin_backend_token: Option<String>,
    pub encryption_key: Option<String>,
    pub redis_url: Option<String>,
    pub redis_token: Option<String>,
    pub auth_cache_ttl_secs: i64,
    pub request_timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,
    pub cors_origins: Vec<String>,
    pub max_request_size_bytes: u64,
    /// System-wide fallback provider keys (BYOK means these are optional).
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub cohere_api_key: Option<String>,
    pub mistral_api_key: Option<String>,
    /// Floor applied when the backend returns no override for a dimension
    /// (`limiter::effective_rate_limits`).
    pub default_rate_limit_per_minute: Option<u32>,
    pub default_rate_limit_per_hour: Option<u32>,
    pub default_rate_limit_per_day: Option<u32>,
    pub default_cost_limit_per_minute_usd: Option<f64>,
    pub default_cost_limit_per_hour_usd: Option<f64>,
    pub default_cost_limit_per_day_usd: Option<f64>,
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt_u32(key: &str) -> Option<u32> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_opt_f64(key: &str) -> Option<f64> {
    env_string(key).and_then(|v| v.parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    env_string(key)
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

impl Config {
    fn load_from_env() -> Self {
        let environment = Environment::from_env();

        let cfg = Self {
            environment,
            port: env_u64("PORT", 8787) as u16,
            log_level: env_string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            database_path: env_string("DATABASE_PATH"),
            admin_backend_url: env_string("ADMIN_BACKEND_URL")
                .unwrap_or_else(|| "http://127.0.0.1:9000".to_string()),
            admin_backend_token: env_string("ADMIN_BACKEND_TOKEN"),
            encryption_key: env_string("ENCRYPTION_KEY"),
            redis_url: env_string("REDIS_URL"),
            redis_token: env_string("REDIS_TOKEN"),
            auth_cache_ttl_secs: env_i64("AUTH_CACHE_TTL_SECS", 300),
            request_timeout_secs: env_u64("REQUEST_TIMEOUT", 120),
            retry_max_attempts: env_u32("RETRY_MAX_ATTEMPTS", 4),
            retry_initial_ms: env_u64("RETRY_INITIAL_MS", 300),
            retry_max_ms: env_u64("RETRY_MAX_MS", 3000),
            cors_origins: env_list("CORS_ORIGINS"),
            max_request_size_bytes: env_u64("MAX_REQUEST_SIZE", 10 * 1024 * 1024),
            openai_api_key: env_string("OPENAI_API_KEY"),
            anthropic_api_key: env_string("ANTHROPIC_API_KEY"),
            gemini_api_key: env_string("GOOGLE_AI_API_KEY"),
            cohere_api_key: env_string("COHERE_API_KEY"),
            mistral_api_key: env_string("MISTRAL_API_KEY"),
            default_rate_limit_per_minute: env_opt_u32("DEFAULT_RATE_LIMIT_PER_MINUTE"),
            default_rate_limit_per_hour: env_opt_u32("DEFAULT_RATE_LIMIT_PER_HOUR"),
            default_rate_limit_per_day: env_opt_u32("DEFAULT_RATE_LIMIT_PER_DAY"),
            default_cost_limit_per_minute_usd: env_opt_f64("DEFAULT_COST_LIMIT_PER_MINUTE"),
            default_cost_limit_per_hour_usd: env_opt_f64("DEFAULT_COST_LIMIT_PER_HOUR"),
            default_cost_limit_per_day_usd: env_opt_f64("DEFAULT_COST_LIMIT_PER_DAY"),
        };

        if cfg.environment == Environment::Production {
            if cfg.encryption_key.is_none() {
                panic!("ENCRYPTION_KEY is required when ENVIRONMENT=production");
            }
            if cfg.admin_backend_token.is_none() {
                panic!("ADMIN_BACKEND_TOKEN is required when ENVIRONMENT=production");
            }
        }

        cfg
    }
}

/// Load (and cache) the process-wide config. Safe to call from anywhere;
/// only reads the environment once.
pub fn load() -> &'static Config {
    CONFIG.get_or_init(Config::load_from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        // Can't safely mutate process env in parallel test runs, so this
        // only checks the parse helpers directly.
        assert_eq!(env_u64("CCR_TEST_DOES_NOT_EXIST", 8787), 8787);
        assert_eq!(env_i64("CCR_TEST_DOES_NOT_EXIST", 300), 300);
    }
}
