pub mod chat;
pub mod maps;

use std::sync::Arc;

use axum::{
    Json,
    Router,
    extract::State,
    routing::get,
};
use serde_json::{Value, json};

use crate::{
    config::{APP_NAME, APP_VERSION, AppConfig},
    error::AppError,
    services::{llm::LlmClient, maps::MapsClient},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub llm: Arc<LlmClient>,
    pub maps: Arc<MapsClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(chat::router())
        .merge(maps::router())
        .fallback(not_found)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "name": APP_NAME,
        "version": APP_VERSION,
        "description": "Local LLM-powered location finder with Google Maps",
        "docs": "/docs",
        "health": "/health",
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let llm_up = state.llm.check_health().await;
    let maps_configured = state.maps.is_configured();

    Json(json!({
        "status": if llm_up && maps_configured { "healthy" } else { "degraded" },
        "services": {
            "llm": {
                "status": if llm_up { "up" } else { "down" },
                "model": state.llm.model(),
                "url": state.llm.base_url(),
            },
            "maps": {
                "status": if maps_configured { "configured" } else { "not_configured" },
            },
        },
        "version": APP_VERSION,
        "environment": state.config.environment,
    }))
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}


#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::{router, test_support};

    #[tokio::test]
    async fn health_is_degraded_when_llm_is_down() {
        let mut ollama = mockito::Server::new_async().await;
        let _tags = ollama
            .mock("GET", "/api/tags")
            .with_status(503)
            .create_async()
            .await;

        let (state, _quota) = test_support::state(&ollama.url(), "http://maps.invalid", 10);
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["services"]["llm"]["status"], "down");
        assert_eq!(json["services"]["maps"]["status"], "configured");
    }

    #[tokio::test]
    async fn unknown_paths_are_json_404s() {
        let (state, _quota) = test_support::state("http://ollama.invalid", "http://maps.invalid", 10);
        let response = router(state)
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "not_found");
    }
}
