//! Ollama chat API with schema-constrained `format`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use schemex_core::{ExtractionOracle, OracleConfig, OracleFailure, OracleRequest, Result};

use crate::{http_client, messages, parse_content, status_failure, transport_failure, Message};

/// Ollama API oracle
pub struct OllamaOracle {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    format: &'a Value,
    stream: bool,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Message,
}

impl OllamaOracle {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
        })
    }

    /// Create from config
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        Ok(Self::new(
            config.ollama_url.clone(),
            config.model.clone(),
            config.timeout_secs,
        )?
        .with_temperature(config.temperature))
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn body<'a>(&'a self, request: &'a OracleRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: messages(request),
            format: &request.contract.schema,
            stream: false,
            options: Options {
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl ExtractionOracle for OllamaOracle {
    async fn extract(&self, request: &OracleRequest) -> std::result::Result<Value, OracleFailure> {
        debug!(
            class = %request.class_name,
            contract = %request.contract.name,
            model = %self.model,
            "Sending Ollama request"
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
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
            .map_err(|e| OracleFailure::Malformed(format!("Failed to parse Ollama response: {e}")))?;

        parse_content(&result.message.content)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::request;

    #[test]
    fn test_ollama_oracle_creation() {
        let oracle = OllamaOracle::new("http://localhost:11434/", "llama3.1", 60).unwrap();
        assert_eq!(oracle.model, "llama3.1");
        assert_eq!(oracle.base_url, "http://localhost:11434");
    }

    #[test]
    fn test_chat_body_carries_schema() {
        let oracle = OllamaOracle::new("http://localhost:11434", "llama3.1", 60).unwrap();
        let request = request();
        let body = serde_json::to_value(oracle.body(&request)).unwrap();

        assert_eq!(body["stream"], false);
        assert_eq!(body["format"]["required"][0], "mentions");
        assert_eq!(body["messages"][2]["content"], "Text:\nTP53 regulates MDM2.");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        let oracle = OllamaOracle::new("http://127.0.0.1:1", "llama3.1", 5).unwrap();
        let failure = tokio_test::assert_err!(oracle.extract(&request()).await);
        assert!(failure.is_transient());
    }

    #[test]
    fn test_parse_chat_response() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"model": "llama3.1", "message": {"role": "assistant", "content": "{\"mentions\": [\"TP53\"]}"}, "done": true}"#,
        )
        .unwrap();
        assert_eq!(
            parse_content(&response.message.content).unwrap()["mentions"][0],
            "TP53"
        );
    }
}
