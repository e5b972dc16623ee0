//! OpenAI-compatible chat completions with JSON-schema structured output

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use schemex_core::{ExtractionOracle, OracleConfig, OracleFailure, OracleRequest, Result};

use crate::{http_client, messages, missing, parse_content, status_failure, transport_failure, Message};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API oracle
pub struct OpenAiOracle {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    schema: &'a Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

impl OpenAiOracle {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            max_tokens,
            temperature,
        })
    }

    /// Create from config
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| missing("OpenAI API key (OPENAI_API_KEY)"))?;

        let oracle = Self::new(
            api_key.clone(),
            config.model.clone(),
            config.max_tokens,
            config.temperature,
            config.timeout_secs,
        )?;

        Ok(match &config.openai_base_url {
            Some(url) => oracle.with_base_url(url.clone()),
            None => oracle,
        })
    }

    /// Set custom base URL (for Azure or compatible APIs)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn body<'a>(&'a self, request: &'a OracleRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages(request),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &request.contract.name,
                    schema: &request.contract.schema,
                    strict: true,
                },
            },
        }
    }
}

#[async_trait]
impl ExtractionOracle for OpenAiOracle {
    async fn extract(&self, request: &OracleRequest) -> std::result::Result<Value, OracleFailure> {
        debug!(
            class = %request.class_name,
            contract = %request.contract.name,
            model = %self.model,
            "Sending OpenAI request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&self.body(request))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_failure(status, &error_text));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleFailure::Malformed(format!("Failed to parse response: {e}")))?;

        let message = result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| OracleFailure::Malformed("No choices in response".to_string()))?;

        if let Some(refusal) = message.refusal {
            return Err(OracleFailure::Rejected(format!("Model refused: {refusal}")));
        }

        let content = message
            .content
            .ok_or_else(|| OracleFailure::Malformed("Empty message content".to_string()))?;
        parse_content(&content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::request;

    #[test]
    fn test_openai_oracle_creation() {
        let oracle = OpenAiOracle::new("test-key", "gpt-4o-mini", 2048, 0.0, 30).unwrap();
        assert_eq!(oracle.model, "gpt-4o-mini");
        assert_eq!(oracle.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_from_config_base_url() {
        let config = OracleConfig {
            openai_api_key: Some("key".to_string()),
            openai_base_url: Some("http://localhost:8000/v1".to_string()),
            ..Default::default()
        };
        let oracle = OpenAiOracle::from_config(&config).unwrap();
        assert_eq!(oracle.base_url, "http://localhost:8000/v1");
        assert_eq!(oracle.name(), "openai");
    }

    #[test]
    fn test_structured_output_body() {
        let oracle = OpenAiOracle::new("key", "gpt-4o", 512, 0.0, 30).unwrap();
        let request = request();
        let body = serde_json::to_value(oracle.body(&request)).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "Gene_instances");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["required"][0],
            "mentions"
        );
    }

    #[test]
    fn test_parse_refusal_shape() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": null, "refusal": "no"}}]}"#,
        )
        .unwrap();
        assert_eq!(response.choices[0].message.refusal.as_deref(), Some("no"));
    }
}
