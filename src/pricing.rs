//! Cost calculator
//!
//! Turns token counts into USD, rounded to 6 decimal places, with a
//! configurable per-request minimum cost floor (some providers bill a
//! minimum even for trivial requests).

/// Round to 6 decimal places, matching provider billing precision.
fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Raw USD cost for the given token counts at the given per-1k prices.
pub fn calculate_cost(
    prompt_tokens: i64,
    completion_tokens: i64,
    prompt_price_per_1k: f64,
    completion_price_per_1k: f64,
    minimum_cost_usd: f64,
) -> f64 {
    let raw = (prompt_tokens as f64 / 1000.0) * prompt_price_per_1k
        + (completion_tokens as f64 / 1000.0) * completion_price_per_1k;
    round6(raw.max(minimum_cost_usd))
}

/// Pre-call cost estimate from an estimated prompt token count alone
/// (no completion tokens observed yet). Used to seed the sliding-window
/// limiter and telemetry before the upstream responds.
pub fn estimate_cost(
    estimated_prompt_tokens: i64,
    prompt_price_per_1k: f64,
    minimum_cost_usd: f64,
) -> f64 {
    let raw = (estimated_prompt_tokens as f64 / 1000.0) * prompt_price_per_1k;
    round6(raw.max(minimum_cost_usd))
}

/// Pre-call cost estimate, carrying a confidence scalar alongside the dollar
/// figure: 0.7 when the model matched a known catalog entry, 0 when it was
/// priced off a bare provider-prefix heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub estimated_prompt_tokens: i64,
    pub estimated_cost_usd: f64,
    pub confidence: f64,
}

pub fn estimate(
    estimated_prompt_tokens: i64,
    prompt_price_per_1k: f64,
    minimum_cost_usd: f64,
    pricing_known: bool,
) -> CostEstimate {
    CostEstimate {
        estimated_prompt_tokens,
        estimated_cost_usd: estimate_cost(estimated_prompt_tokens, prompt_price_per_1k, minimum_cost_usd),
        confidence: if pricing_known { 0.7 } else { 0.0 },
    }
}

/// Cost accounting headers attached to every proxied response. `monthly_limit_usd`
/// is `None`: the limiter (§4.6) only enforces minute/hour/day windows, so the
/// monthly figure is informational only, never an enforced quota.
#[allow(clippy::too_many_arguments)]
pub fn cost_headers(
    prompt_tokens: i64,
    completion_tokens: i64,
    price_prompt_per_1k: f64,
    price_completion_per_1k: f64,
    cost_total_usd: f64,
    monthly_total_usd: f64,
    monthly_limit_usd: Option<f64>,
    daily_limit_usd: Option<f64>,
) -> Vec<(String, String)> {
    let cost_input = round6((prompt_tokens as f64 / 1000.0) * price_prompt_per_1k);
    let cost_output = round6((completion_tokens as f64 / 1000.0) * price_completion_per_1k);

    let mut headers = vec![
        ("x-cost-input".to_string(), format!("{:.6}", cost_input)),
        ("x-cost-output".to_string(), format!("{:.6}", cost_output)),
        ("x-cost-total".to_string(), format!("{:.6}", cost_total_usd)),
        ("x-cost-currency".to_string(), "USD".to_string()),
        ("x-cost-tokens-input".to_string(), prompt_tokens.to_string()),
        ("x-cost-tokens-output".to_string(), completion_tokens.to_string()),
        ("x-cost-rate-input".to_string(), format!("{:.6}", price_prompt_per_1k)),
        ("x-cost-rate-output".to_string(), format!("{:.6}", price_completion_per_1k)),
        ("x-cost-monthly-total".to_string(), format!("{:.6}", monthly_total_usd)),
    ];

    if let Some(limit) = monthly_limit_usd {
        headers.push(("x-cost-monthly-limit".to_string(), format!("{:.6}", limit)));
        headers.push((
            "x-cost-monthly-remaining".to_string(),
            format!("{:.6}", (limit - monthly_total_usd).max(0.0)),
        ));
    }
    if let Some(limit) = daily_limit_usd {
        headers.push(("x-cost-daily-limit".to_string(), format!("{:.6}", limit)));
    }

    headers
}

/// How many multiples of this request's average token footprint the
/// model's context window could hold: `floor(context_window /
/// ((input+output)/2))`. Zero usage is undefined and reported as 0.0
/// rather than dividing by zero.
pub fn efficiency_ratio(context_window: i64, prompt_tokens: i64, completion_tokens: i64) -> f64 {
    let average_tokens = (prompt_tokens + completion_tokens) as f64 / 2.0;
    if average_tokens <= 0.0 {
        return 0.0;
    }
    (context_window as f64 / average_tokens).floor()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_cost() {
        assert!((calculate_cost(1000, 2000, 1.0, 2.0, 0.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn calc_cost_applies_minimum_floor() {
        assert_eq!(calculate_cost(1, 0, 0.01, 0.01, 0.001), 0.001);
    }

    #[test]
    fn rounds_to_six_decimals() {
        let cost = calculate_cost(333, 0, 0.0033333, 0.0, 0.0);
        assert_eq!(cost, round6(cost));
    }

    #[test]
    fn efficiency_ratio_handles_zero_usage() {
        assert_eq!(efficiency_ratio(128_000, 0, 0), 0.0);
    }

    #[test]
    fn efficiency_ratio_floors_the_multiple() {
        // context_window=128_000, avg tokens=(1000+500)/2=750 -> 128/0.75 = 170.67 -> floor 170
        assert_eq!(efficiency_ratio(128_000, 1000, 500), 170.0);
    }

    #[test]
    fn cost_headers_includes_quota_fields_only_when_present() {
        let without_quotas = cost_headers(100, 50, 0.005, 0.015, 0.001250, 0.5, None, None);
        assert!(!without_quotas.iter().any(|(k, _)| k == "x-cost-daily-limit"));

        let with_quotas = cost_headers(100, 50, 0.005, 0.015, 0.001250, 0.5, Some(10.0), Some(1.0));
        assert!(with_quotas.iter().any(|(k, v)| k == "x-cost-daily-limit" && v == "1.000000"));
        assert!(with_quotas.iter().any(|(k, v)| k == "x-cost-monthly-remaining" && v == "9.500000"));
    }
}
