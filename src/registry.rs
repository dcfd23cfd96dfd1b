//! Model/provider registry
//!
//! A compiled-in table of known models and their pricing, plus alias
//! resolution and a prefix heuristic for models that aren't in the table
//! yet but clearly belong to a known provider. The registry is canonical
//! for pricing on the request path: nothing the admin backend returns can
//! override it.

use once_cell::sync::Lazy;

use crate::forward::context::{ModelInfo, Provider};

struct StaticModel {
    id: &'static str,
    aliases: &'static [&'static str],
    provider: Provider,
    upstream_model_id: Option<&'static str>,
    price_prompt_per_1k: f64,
    price_completion_per_1k: f64,
    minimum_cost_usd: f64,
    context_window: i64,
}

static TABLE: Lazy<Vec<StaticModel>> = Lazy::new(|| {
    vec![
        StaticModel {
            id: "gpt-4o",
            aliases: &["gpt-4o-latest"],
            provider: Provider::OpenAI,
            upstream_model_id: None,
            price_prompt_per_1k: 0.005,
            price_completion_per_1k: 0.015,
            minimum_cost_usd: 0.0,
            context_window: 128_000,
        },
        StaticModel {
            id: "gpt-4o-mini",
            aliases: &[],
            provider: Provider::OpenAI,
            upstream_model_id: None,
            price_prompt_per_1k: 0.00015,
            price_completion_per_1k: 0.0006,
            minimum_cost_usd: 0.0,
            context_window: 128_000,
        },
        StaticModel {
            id: "claude-3-5-sonnet-20241022",
            aliases: &["claude-3.5-sonnet", "claude-sonnet"],
            provider: Provider::Anthropic,
            upstream_model_id: None,
            price_prompt_per_1k: 0.003,
            price_completion_per_1k: 0.015,
            minimum_cost_usd: 0.0,
            context_window: 200_000,
        },
        StaticModel {
            id: "claude-3-5-haiku-20241022",
            aliases: &["claude-3.5-haiku", "claude-haiku"],
            provider: Provider::Anthropic,
            upstream_model_id: None,
            price_prompt_per_1k: 0.0008,
            price_completion_per_1k: 0.004,
            minimum_cost_usd: 0.0,
            context_window: 200_000,
        },
        StaticModel {
            id: "gemini-1.5-pro",
            aliases: &["gemini-pro"],
            provider: Provider::Gemini,
            upstream_model_id: None,
            price_prompt_per_1k: 0.00125,
            price_completion_per_1k: 0.005,
            minimum_cost_usd: 0.0,
            context_window: 2_000_000,
        },
        StaticModel {
            id: "gemini-1.5-flash",
            aliases: &["gemini-flash"],
            provider: Provider::Gemini,
            upstream_model_id: None,
            price_prompt_per_1k: 0.000075,
            price_completion_per_1k: 0.0003,
            minimum_cost_usd: 0.0,
            context_window: 1_000_000,
        },
    ]
});

fn find(model_id: &str) -> Option<&'static StaticModel> {
    TABLE
        .iter()
        .find(|m| m.id == model_id || m.aliases.contains(&model_id))
}

/// Prefix heuristics for models not yet in the table: infer the provider
/// (and a conservative default price) so an unseen model name from a
/// known family doesn't hard-fail before the upstream even sees it.
fn infer_from_prefix(model_id: &str) -> Option<ModelInfo> {
    let (provider, price_prompt_per_1k, price_completion_per_1k, context_window) = if model_id
        .starts_with("gpt-")
        || model_id.starts_with("o1")
        || model_id.starts_with("o3")
    {
        (Provider::OpenAI, 0.005, 0.015, 128_000)
    } else if model_id.starts_with("claude-") {
        (Provider::Anthropic, 0.003, 0.015, 200_000)
    } else if model_id.starts_with("gemini-") {
        (Provider::Gemini, 0.00125, 0.005, 1_000_000)
    } else {
        return None;
    };

    Some(ModelInfo {
        id: model_id.to_string(),
        provider,
        upstream_model_id: None,
        price_prompt_per_1k,
        price_completion_per_1k,
        minimum_cost_usd: 0.0,
        context_window,
    })
}

/// Resolve a client-facing model id to registry pricing/routing info.
/// Returns `None` only for names that match no known model and no known
/// provider prefix.
pub fn resolve(model_id: &str) -> Option<ModelInfo> {
    if let Some(entry) = find(model_id) {
        return Some(ModelInfo {
            id: entry.id.to_string(),
            provider: entry.provider,
            upstream_model_id: entry.upstream_model_id.map(|s| s.to_string()),
            price_prompt_per_1k: entry.price_prompt_per_1k,
            price_completion_per_1k: entry.price_completion_per_1k,
            minimum_cost_usd: entry.minimum_cost_usd,
            context_window: entry.context_window,
        });
    }
    infer_from_prefix(model_id)
}

/// Resolve a model for an explicit provider route (`/proxy/:provider/...`):
/// unknown models under a known provider still resolve, with a
/// provider-default price, so routing never depends on the table being
/// exhaustive.
pub fn resolve_for_provider(model_id: &str, provider: Provider) -> ModelInfo {
    if let Some(info) = resolve(model_id) {
        if info.provider == provider {
            return info;
        }
    }
    let (price_prompt_per_1k, price_completion_per_1k, context_window) = match provider {
        Provider::OpenAI => (0.005, 0.015, 128_000),
        Provider::Anthropic => (0.003, 0.015, 200_000),
        Provider::Gemini => (0.00125, 0.005, 1_000_000),
    };
    ModelInfo {
        id: model_id.to_string(),
        provider,
        upstream_model_id: None,
        price_prompt_per_1k,
        price_completion_per_1k,
        minimum_cost_usd: 0.0,
        context_window,
    }
}

pub fn list_models() -> Vec<ModelInfo> {
    TABLE
        .iter()
        .map(|entry| ModelInfo {
            id: entry.id.to_string(),
            provider: entry.provider,
            upstream_model_id: entry.upstream_model_id.map(|s| s.to_string()),
            price_prompt_per_1k: entry.price_prompt_per_1k,
            price_completion_per_1k: entry.price_completion_per_1k,
            minimum_cost_usd: entry.minimum_cost_usd,
            context_window: entry.context_window,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_alias() {
        let info = resolve("claude-sonnet").unwrap();
        assert_eq!(info.id, "claude-3-5-sonnet-20241022");
        assert_eq!(info.provider, Provider::Anthropic);
    }

    #[test]
    fn infers_unknown_model_from_prefix() {
        let info = resolve("gpt-5-preview").unwrap();
        assert_eq!(info.provider, Provider::OpenAI);
    }

    #[test]
    fn unknown_model_no_prefix_is_none() {
        assert!(resolve("totally-unknown-model").is_none());
    }
}
