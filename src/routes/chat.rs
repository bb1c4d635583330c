use axum::{
    Json,
    Router,
    extract::{State, rejection::JsonRejection},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    context::ClientKey,
    error::{AppError, AppResult},
    routes::AppState,
    services::{
        llm::{ChatTurn, LocationIntent},
        maps::PlaceResult,
    },
    validators::{ChatInput, PlaceSearch, normalize_place_type, parse_location_string},
};

const TOP_PLACES: usize = 3;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Default, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    pub places: Vec<PlaceResult>,
    pub has_map_results: bool,
    pub search_query: Option<String>,
    pub error: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/chat/health", get(chat_health))
}

async fn chat(
    State(state): State<AppState>,
    client: ClientKey,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Json<ChatResponse>> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let input = ChatInput::validate(&request.message, request.location.as_deref())?;

    let intent = match state
        .llm
        .generate(&input.message, &request.conversation_history)
        .await
    {
        Ok(intent) => intent,
        Err(err) => {
            tracing::error!(client_key = %client.as_str(), error = %err, "llm request failed");
            return Ok(Json(ChatResponse {
                success: false,
                message: "I'm having trouble processing your request. Please try again.".to_string(),
                error: Some(err.public_message()),
                ..Default::default()
            }));
        }
    };

    if !intent.is_place_search() {
        return Ok(Json(ChatResponse {
            success: true,
            message: intent.response_text,
            ..Default::default()
        }));
    }

    let location = search_location(&state, &client, input.location.as_deref(), &intent).await;
    let search_query = match &intent.cuisine_type {
        Some(cuisine) => format!("{cuisine} {}", intent.search_query),
        None => intent.search_query.clone(),
    };
    let search = PlaceSearch {
        query: search_query.clone(),
        location: Some(location),
        radius: None,
        place_type: normalize_place_type(&intent.query_type),
    };

    let results = match state.maps.search_places(client.as_str(), &search).await {
        Ok(results) => results,
        Err(err) => {
            tracing::warn!(client_key = %client.as_str(), error = %err, "place search failed");
            return Ok(Json(ChatResponse {
                success: true,
                message: format!(
                    "{} However, I couldn't find any results. {}",
                    intent.response_text,
                    err.public_message()
                ),
                search_query: Some(search_query),
                ..Default::default()
            }));
        }
    };

    if results.places.is_empty() {
        return Ok(Json(ChatResponse {
            success: true,
            message: format!(
                "{} Unfortunately, I couldn't find any places matching your criteria. \
                 Try broadening your search or checking a different area.",
                intent.response_text
            ),
            search_query: Some(search_query),
            ..Default::default()
        }));
    }

    let top = results
        .places
        .iter()
        .take(TOP_PLACES)
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!(
        "{} I found {} places for you. Top recommendations include: {top}.",
        intent.response_text,
        results.places.len()
    );

    Ok(Json(ChatResponse {
        success: true,
        message,
        places: results.places,
        has_map_results: true,
        search_query: Some(search_query),
        error: None,
    }))
}

/// User-supplied coordinates, then the geocoded location hint, then the
/// configured default.
async fn search_location(
    state: &AppState,
    client: &ClientKey,
    user_location: Option<&str>,
    intent: &LocationIntent,
) -> (f64, f64) {
    if let Some(coords) = user_location.and_then(parse_location_string) {
        return coords;
    }

    if let Some(hint) = intent.location_hint.as_deref() {
        match state.maps.geocode(client.as_str(), hint).await {
            Ok(geocoded) => return (geocoded.lat, geocoded.lng),
            Err(err) => {
                tracing::debug!(hint = %hint, error = %err, "could not geocode location hint");
            }
        }
    }

    state.maps.default_location()
}

async fn chat_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "llm_available": state.llm.check_health().await,
        "model": state.llm.model(),
        "ollama_url": state.llm.base_url(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use mockito::Matcher;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{
        context::ClientKey,
        routes::{router, test_support},
    };

    fn ollama_reply(content: &str) -> String {
        serde_json::json!({ "message": { "role": "assistant", "content": content } }).to_string()
    }

    async fn post_chat(app: axum::Router, body: Value) -> (StatusCode, Value) {
        let mut request = Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        request
            .extensions_mut()
            .insert(ClientKey("198.51.100.4".to_string()));

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn place_queries_are_searched_and_summarized() {
        let mut ollama = mockito::Server::new_async().await;
        let _chat = ollama
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(ollama_reply(
                r#"{"query_type":"restaurant","search_query":"restaurant","location_hint":null,"cuisine_type":"japanese","preferences":[],"response_text":"Here you go!"}"#,
            ))
            .create_async()
            .await;

        let mut maps = mockito::Server::new_async().await;
        let search = maps
            .mock("GET", "/place/textsearch/json")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "japanese restaurant".into()),
                Matcher::UrlEncoded("location".into(), "-6.2,106.8".into()),
                Matcher::UrlEncoded("type".into(), "restaurant".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"OK","results":[{"place_id":"a","name":"Sushi Tei"},
                    {"place_id":"b","name":"Ichiban"},{"place_id":"c","name":"Genki"},
                    {"place_id":"d","name":"Yoshinoya"}]}"#,
            )
            .create_async()
            .await;

        let (state, quota) = test_support::state(&ollama.url(), &maps.url(), 10);
        let (status, json) = post_chat(
            router(state),
            serde_json::json!({ "message": "sushi?", "location": "-6.2,106.8" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["has_map_results"], true);
        assert_eq!(json["search_query"], "japanese restaurant");
        assert_eq!(json["places"].as_array().unwrap().len(), 4);
        assert_eq!(
            json["message"],
            "Here you go! I found 4 places for you. Top recommendations include: Sushi Tei, Ichiban, Genki."
        );
        assert_eq!(quota.usage("198.51.100.4"), 1);
        search.assert_async().await;
    }

    #[tokio::test]
    async fn general_replies_skip_the_maps_api() {
        let mut ollama = mockito::Server::new_async().await;
        let _chat = ollama
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(ollama_reply("Hi there! Ask me about places."))
            .create_async()
            .await;

        let (state, quota) = test_support::state(&ollama.url(), "http://maps.invalid", 10);
        let (status, json) = post_chat(router(state), serde_json::json!({ "message": "hello" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Hi there! Ask me about places.");
        assert_eq!(json["has_map_results"], false);
        assert_eq!(quota.usage("198.51.100.4"), 0);
    }

    #[tokio::test]
    async fn llm_failure_is_reported_in_band() {
        let mut ollama = mockito::Server::new_async().await;
        let _chat = ollama
            .mock("POST", "/api/chat")
            .with_status(500)
            .create_async()
            .await;

        let (state, _quota) = test_support::state(&ollama.url(), "http://maps.invalid", 10);
        let (status, json) = post_chat(router(state), serde_json::json!({ "message": "cafe" })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "LLM API error: 500");
    }

    #[tokio::test]
    async fn exhausted_quota_yields_an_apology() {
        let mut ollama = mockito::Server::new_async().await;
        let _chat = ollama
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(ollama_reply(
                r#"{"query_type":"cafe","search_query":"coffee","response_text":"Searching."}"#,
            ))
            .create_async()
            .await;

        let (state, quota) = test_support::state(&ollama.url(), "http://maps.invalid", 1);
        quota.increment_usage("198.51.100.4", 1);

        let (_status, json) = post_chat(router(state), serde_json::json!({ "message": "coffee" })).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["has_map_results"], false);
        assert!(
            json["message"]
                .as_str()
                .unwrap()
                .starts_with("Searching. However, I couldn't find any results.")
        );
    }

    #[tokio::test]
    async fn invalid_messages_are_rejected() {
        let (state, _quota) = test_support::state("http://ollama.invalid", "http://maps.invalid", 10);
        let (status, json) = post_chat(router(state), serde_json::json!({ "message": "<b></b>" })).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }
}
