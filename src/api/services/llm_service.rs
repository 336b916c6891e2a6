//! Graph inference: turns a user prompt into a diagram graph through an LLM
//! provider.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::models::Graph;

/// Default provider endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// System prompt fixed at build time. The model must answer with a single
/// JSON object matching the [`Graph`] schema.
const SYSTEM_PROMPT: &str = r#"You are a software architect. Convert the user's description of a software system into a C4 container diagram graph.

Answer with a single JSON object and nothing else, following this schema:
{
  "title": "optional diagram title",
  "footer": "optional diagram footer",
  "containers": [
    {
      "id": "short unique identifier",
      "label": "display name",
      "technology": "optional technology",
      "description": "optional description",
      "system": "optional group name for containers forming one system",
      "is_user": false,
      "is_queue": false,
      "is_database": false,
      "is_external": false
    }
  ],
  "relations": [
    {
      "from": "container id",
      "to": "container id",
      "direction": "one of LR, RL, TD, DT or empty",
      "label": "optional action, e.g. Sends events",
      "technology": "optional protocol or transport"
    }
  ]
}

Every relation's "from" and "to" must reference a container "id". Include at least one container."#;

/// Provider failure. The payload is the verbatim provider response body and
/// is surfaced to the client unchanged.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct PredictionError(pub String);

/// Successful inference: the parsed graph plus the metadata persisted with
/// the prediction record.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub graph: Graph,
    pub raw: String,
    pub model: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

/// Capability converting a prompt into a diagram graph.
#[async_trait]
pub trait GraphInference: Send + Sync {
    async fn infer(&self, prompt: &str) -> Result<Prediction, PredictionError>;
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: i32,
    #[serde(default)]
    completion_tokens: i32,
}

/// OpenAI chat-completions client.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            base_url: OPENAI_BASE_URL.to_string(),
            api_key,
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Configure from `OPENAI_API_KEY`, `OPENAI_MODEL`, `OPENAI_MAX_TOKENS`,
    /// and `OPENAI_TEMPERATURE`.
    pub fn from_env(http: reqwest::Client) -> Result<Self, PredictionError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PredictionError("OPENAI_API_KEY must be provided".to_string()))?;

        let mut client = Self::new(http, api_key);
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            client.model = model;
        }
        client.max_tokens = std::env::var("OPENAI_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok());
        client.temperature = std::env::var("OPENAI_TEMPERATURE")
            .ok()
            .and_then(|v| v.parse().ok());
        Ok(client)
    }
}

#[async_trait]
impl GraphInference for OpenAiClient {
    async fn infer(&self, prompt: &str) -> Result<Prediction, PredictionError> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "response_format": {"type": "json_object"}
        });
        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| PredictionError(e.to_string()))?;

        if !response.status().is_success() {
            // the provider's error body is passed through verbatim
            let error_text = response.text().await.unwrap_or_default();
            return Err(PredictionError(error_text));
        }

        let envelope: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| PredictionError(e.to_string()))?;

        let content = envelope
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| PredictionError("provider returned no choices".to_string()))?;

        let graph: Graph = serde_json::from_str(&content)
            .map_err(|e| PredictionError(format!("cannot deserialize predicted graph: {e}")))?;

        Ok(Prediction {
            graph,
            raw: content,
            model: envelope.model,
            prompt_tokens: envelope.usage.prompt_tokens,
            completion_tokens: envelope.usage.completion_tokens,
        })
    }
}
