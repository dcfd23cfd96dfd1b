//! HTTP surface
//!
//! Four small endpoints for operators and one wildcard that carries the
//! whole request pipeline: `/proxy/:provider/*rest`.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Path, RawQuery},
    http::{HeaderMap, Method},
    routing::{any, get},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{config, db, error::AppError, forward, pipeline, registry};

async fn health() -> Json<Value> {
    let cfg = config::load();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": format!("{:?}", cfg.environment).to_lowercase(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status() -> Json<Value> {
    let cfg = config::load();
    let reachable = match cfg.redis_url.as_ref() {
        Some(url) => match crate::redis_store::RedisStore::new(url) {
            Ok(store) => store.ping().await.is_ok(),
            Err(_) => false,
        },
        None => false,
    };
    Json(json!({
        "status": "ok",
        "distributed_tier": {
            "configured": cfg.redis_url.is_some(),
            "reachable": reachable,
        },
        "database_path": db::db_path().to_string_lossy(),
    }))
}

async fn models() -> Json<Value> {
    let models: Vec<Value> = registry::list_models()
        .into_iter()
        .map(|m| {
            json!({
                "id": m.id,
                "provider": m.provider.as_str(),
                "price_prompt_per_1k": m.price_prompt_per_1k,
                "price_completion_per_1k": m.price_completion_per_1k,
            })
        })
        .collect();
    let total = models.len();
    Json(json!({"models": models, "total": total}))
}

async fn health_vendors() -> Json<Value> {
    Json(forward::health_body())
}

/// `ALL /proxy/:provider/*rest` — the request pipeline. `rest` is accepted
/// but not currently used for path-based endpoint selection: every
/// supported provider exposes exactly one native endpoint shape, chosen by
/// the handler, not by the client's trailing path.
async fn proxy(
    Path((provider, _rest)): Path<(String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let Some(provider) = forward::Provider::from_str(&provider) else {
        return AppError::ModelNotFound(format!("unknown provider: {}", provider)).render(&request_id);
    };

    let mut payload: Value = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                return AppError::InvalidRequest(format!("malformed JSON body: {}", e)).render(&request_id)
            }
        }
    };

    let is_streaming = forward::client::normalize_stream_flag(&mut payload);

    pipeline::handle(
        provider,
        method,
        headers,
        query.as_deref().unwrap_or(""),
        Some(addr.ip()),
        payload,
        is_streaming,
    )
    .await
}

fn cors_layer() -> CorsLayer {
    let origins = &config::load().cors_origins;
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<axum::http::HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

pub fn app() -> Router {
    let max_body = config::load().max_request_size_bytes as usize;
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/models", get(models))
        .route("/health/vendors", get(health_vendors))
        .route("/proxy/:provider/*rest", any(proxy))
        .layer(cors_layer())
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve() {
    db::init();
    let app = app().into_make_service_with_connect_info::<SocketAddr>();
    let addr: SocketAddr = format!("0.0.0.0:{}", config::load().port).parse().unwrap();
    crate::logger::info("server", &format!("listening on {}", addr));
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr as StdSocketAddr;
    use tower::ServiceExt;

    #[tokio::test]
    async fn unknown_route_is_404() {
        let request = axum::http::Request::builder()
            .uri("/nonexistent")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_ok() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app().into_make_service_with_connect_info::<StdSocketAddr>();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{}", addr);
        let r = reqwest::get(format!("{}/health", url)).await.unwrap();
        let s = r.json::<serde_json::Value>().await.unwrap();
        assert_eq!(s["status"], "ok");
        h.abort();
    }

    #[tokio::test]
    async fn models_lists_known_models() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app().into_make_service_with_connect_info::<StdSocketAddr>();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{}", addr);
        let r = reqwest::get(format!("{}/models", url)).await.unwrap();
        let s = r.json::<serde_json::Value>().await.unwrap();
        assert!(s["total"].as_u64().unwrap() > 0);
        h.abort();
    }

    #[tokio::test]
    async fn proxy_without_credential_is_unauthorized() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let a = app().into_make_service_with_connect_info::<StdSocketAddr>();
        let h = tokio::spawn(async move { axum::serve(listener, a).await.unwrap() });
        let url = format!("http://{}", addr);
        let client = reqwest::Client::new();
        let r = client
            .post(format!("{}/proxy/openai/v1/chat/completions", url))
            .json(&json!({"model": "gpt-4o", "messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(r.status(), reqwest::StatusCode::UNAUTHORIZED);
        h.abort();
    }
}
