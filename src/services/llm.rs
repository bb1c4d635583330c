use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    config::LlmConfig,
    error::{AppError, AppResult},
    services::http_client,
};

const HISTORY_TURNS: usize = 5;

const SYSTEM_PROMPT: &str = r#"You are a helpful location assistant that helps users find places to go, eat, visit, or explore.

When a user asks about finding places, you MUST respond with a valid JSON object containing:
1. "query_type": The type of place (restaurant, cafe, bar, attraction, parking, hotel, shop, etc.)
2. "search_query": A search query optimized for Google Places API (e.g., "best sushi restaurant", "coffee shop with wifi")
3. "location_hint": Any specific location mentioned by the user (city, neighborhood, landmark), or null if not specified
4. "cuisine_type": For food places, the specific cuisine (japanese, italian, etc.), or null
5. "preferences": Array of user preferences mentioned (cheap, fancy, romantic, family-friendly, etc.)
6. "response_text": A friendly, helpful response to show the user (2-3 sentences)

IMPORTANT: Always respond with ONLY the JSON object, no additional text before or after.

Example user query: "Where can I find good Italian food near Central Park?"
Example response:
{
    "query_type": "restaurant",
    "search_query": "italian restaurant",
    "location_hint": "Central Park, New York",
    "cuisine_type": "italian",
    "preferences": ["good quality"],
    "response_text": "I'd be happy to help you find great Italian restaurants near Central Park! Let me search for the best options in that area."
}

Example user query: "I need parking downtown"
Example response:
{
    "query_type": "parking",
    "search_query": "parking garage",
    "location_hint": "downtown",
    "cuisine_type": null,
    "preferences": [],
    "response_text": "I'll help you find convenient parking options downtown. Let me search for available parking facilities in the area."
}

If the user's message is NOT about finding places (e.g., just a greeting or unrelated question), respond with:
{
    "query_type": "general",
    "search_query": "",
    "location_hint": null,
    "cuisine_type": null,
    "preferences": [],
    "response_text": "Your helpful response here"
}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Structured search intent extracted from the model's reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationIntent {
    pub query_type: String,
    pub search_query: String,
    pub location_hint: Option<String>,
    pub cuisine_type: Option<String>,
    pub preferences: Vec<String>,
    pub response_text: String,
}

impl LocationIntent {
    fn general(response_text: String) -> Self {
        Self {
            query_type: "general".to_string(),
            search_query: String::new(),
            location_hint: None,
            cuisine_type: None,
            preferences: Vec::new(),
            response_text,
        }
    }

    pub fn is_place_search(&self) -> bool {
        self.query_type != "general" && !self.search_query.trim().is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawIntent {
    query_type: Option<String>,
    search_query: Option<String>,
    location_hint: Option<String>,
    cuisine_type: Option<String>,
    preferences: Option<Vec<String>>,
    response_text: Option<String>,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize, Default)]
struct ChatResponseBody {
    #[serde(default)]
    message: Option<ChatTurnContent>,
}

#[derive(Deserialize, Default)]
struct ChatTurnContent {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, Default)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize, Default)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

/// Client for a local Ollama server.
pub struct LlmClient {
    client: reqwest::Client,
    cfg: LlmConfig,
}

impl LlmClient {
    pub fn new(cfg: LlmConfig) -> AppResult<Self> {
        Ok(Self {
            client: http_client(cfg.timeout_secs)?,
            cfg,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    pub fn base_url(&self) -> &str {
        &self.cfg.base_url
    }

    /// True when Ollama answers and has the configured model pulled.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/api/tags", self.cfg.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "ollama health check failed");
                return false;
            }
            Err(err) => {
                tracing::warn!(error = %err, "ollama health check failed");
                return false;
            }
        };

        let tags = response.json::<TagsResponse>().await.unwrap_or_default();
        let wanted = base_model_name(&self.cfg.model);
        tags.models.iter().any(|tag| {
            base_model_name(&tag.name) == wanted || tag.name.contains(self.cfg.model.as_str())
        })
    }

    pub async fn generate(&self, message: &str, history: &[ChatTurn]) -> AppResult<LocationIntent> {
        let mut messages = Vec::with_capacity(history.len().min(HISTORY_TURNS) + 2);
        messages.push(ChatTurn {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        });
        let skip = history.len().saturating_sub(HISTORY_TURNS);
        messages.extend(history.iter().skip(skip).cloned());
        messages.push(ChatTurn {
            role: "user".to_string(),
            content: message.to_string(),
        });

        let body = ChatRequestBody {
            model: &self.cfg.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.cfg.temperature,
                num_predict: self.cfg.max_tokens,
            },
        };

        let url = format!("{}/api/chat", self.cfg.base_url);
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, detail = %detail, "ollama api error");
            return Err(AppError::Upstream(format!("LLM API error: {}", status.as_u16())));
        }

        let raw = response
            .json::<ChatResponseBody>()
            .await?
            .message
            .map(|m| m.content)
            .unwrap_or_default();

        tracing::debug!(reply = %preview(&raw), "llm reply");
        Ok(parse_intent(&raw))
    }
}

/// Pulls the outermost `{...}` out of a model reply. Replies without usable
/// JSON are treated as plain conversation.
pub fn parse_intent(raw: &str) -> LocationIntent {
    let json = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => {
            tracing::warn!(preview = %preview(raw), "no JSON found in model reply");
            return LocationIntent::general(raw.to_string());
        }
    };

    match serde_json::from_str::<RawIntent>(json) {
        Ok(parsed) => LocationIntent {
            query_type: parsed.query_type.unwrap_or_else(|| "general".to_string()),
            search_query: parsed.search_query.unwrap_or_default(),
            location_hint: parsed.location_hint.filter(|h| !h.trim().is_empty()),
            cuisine_type: parsed.cuisine_type.filter(|c| !c.trim().is_empty()),
            preferences: parsed.preferences.unwrap_or_default(),
            response_text: parsed
                .response_text
                .unwrap_or_else(|| "I can help you find places!".to_string()),
        },
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse model reply as JSON");
            let text = if raw.is_empty() {
                "I'd be happy to help you find places!".to_string()
            } else {
                raw.to_string()
            };
            LocationIntent::general(text)
        }
    }
}

fn base_model_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: String) -> LlmConfig {
        LlmConfig {
            base_url,
            model: "llama3.2".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            timeout_secs: 5,
        }
    }

    #[test]
    fn extracts_intent_wrapped_in_prose() {
        let raw = r#"Sure! {"query_type":"cafe","search_query":"coffee shop","location_hint":"Kemang","cuisine_type":null,"preferences":["quiet"],"response_text":"Let me look."} Enjoy."#;
        let intent = parse_intent(raw);

        assert_eq!(intent.query_type, "cafe");
        assert_eq!(intent.search_query, "coffee shop");
        assert_eq!(intent.location_hint.as_deref(), Some("Kemang"));
        assert_eq!(intent.cuisine_type, None);
        assert_eq!(intent.preferences, vec!["quiet".to_string()]);
        assert!(intent.is_place_search());
    }

    #[test]
    fn plain_text_reply_is_general() {
        let intent = parse_intent("Hello! How can I help?");
        assert_eq!(intent.query_type, "general");
        assert_eq!(intent.response_text, "Hello! How can I help?");
        assert!(!intent.is_place_search());
    }

    #[test]
    fn malformed_json_falls_back_to_raw_text() {
        let intent = parse_intent("{not json}");
        assert_eq!(intent.query_type, "general");
        assert_eq!(intent.response_text, "{not json}");
    }

    #[test]
    fn missing_fields_use_defaults() {
        let intent = parse_intent(r#"{"search_query": null}"#);
        assert_eq!(intent.query_type, "general");
        assert_eq!(intent.search_query, "");
        assert_eq!(intent.response_text, "I can help you find places!");
    }

    #[tokio::test]
    async fn generate_sends_recent_history_and_parses_reply() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama3.2",
                "stream": false,
                "options": { "num_predict": 256 }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"message":{"role":"assistant","content":"{\"query_type\":\"restaurant\",\"search_query\":\"sushi\",\"response_text\":\"On it.\"}"}}"#,
            )
            .create_async()
            .await;

        let client = LlmClient::new(config(server.url())).unwrap();
        let history: Vec<ChatTurn> = (0..8)
            .map(|i| ChatTurn {
                role: "user".to_string(),
                content: format!("turn {i}"),
            })
            .collect();

        let intent = client.generate("sushi please", &history).await.unwrap();
        assert_eq!(intent.query_type, "restaurant");
        assert_eq!(intent.search_query, "sushi");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let client = LlmClient::new(config(server.url())).unwrap();
        let err = client.generate("hi", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "LLM API error: 500");
    }

    #[tokio::test]
    async fn health_requires_the_configured_model() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"mistral:latest"},{"name":"llama3.2:latest"}]}"#)
            .create_async()
            .await;

        let client = LlmClient::new(config(server.url())).unwrap();
        assert!(client.check_health().await);

        let mut other = config(server.url());
        other.model = "phi3".to_string();
        let client = LlmClient::new(other).unwrap();
        assert!(!client.check_health().await);
    }
}
