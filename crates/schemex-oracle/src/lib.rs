//! Schemex Oracle - HTTP extraction oracles
//!
//! Structured-output clients for OpenAI-compatible chat completion APIs
//! and Ollama. Both forward the contract's JSON schema so the model
//! answers in the declared shape; the engine still validates the answer.

mod ollama;
mod openai;

pub use ollama::OllamaOracle;
pub use openai::OpenAiOracle;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use schemex_core::{
    ConfigError, ExtractionOracle, OracleConfig, OracleFailure, OracleProvider, OracleRequest,
    Result, SchemexError,
};

// ============================================================================
// Shared request plumbing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// System message, the instruction, then the source text as its own turn
pub(crate) fn messages(request: &OracleRequest) -> Vec<Message> {
    vec![
        Message::new("system", request.system.as_str()),
        Message::new("user", request.instruction.as_str()),
        Message::new("user", format!("Text:\n{}", request.text)),
    ]
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| SchemexError::Other(anyhow::anyhow!("Failed to build HTTP client: {e}")))
}

/// Failure for a request that never produced a response
pub(crate) fn transport_failure(err: reqwest::Error) -> OracleFailure {
    if err.is_timeout() {
        OracleFailure::Timeout
    } else {
        OracleFailure::Transport(err.to_string())
    }
}

/// Failure for an unsuccessful HTTP status
pub(crate) fn status_failure(status: StatusCode, body: &str) -> OracleFailure {
    let detail = format!("{status}: {body}");
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => OracleFailure::Timeout,
        StatusCode::TOO_MANY_REQUESTS => OracleFailure::RateLimited(detail),
        s if s.is_server_error() => OracleFailure::Transport(detail),
        _ => OracleFailure::Rejected(detail),
    }
}

/// Parse the model's answer as JSON, tolerating a markdown code fence
pub(crate) fn parse_content(content: &str) -> std::result::Result<Value, OracleFailure> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).map_err(|e| OracleFailure::Malformed(e.to_string()))
}

// ============================================================================
// Factory
// ============================================================================

/// Create an extraction oracle from config
pub fn create_oracle(config: &OracleConfig) -> Result<Arc<dyn ExtractionOracle>> {
    match config.provider {
        OracleProvider::OpenAI | OracleProvider::Azure => {
            Ok(Arc::new(OpenAiOracle::from_config(config)?))
        }
        OracleProvider::Ollama => Ok(Arc::new(OllamaOracle::from_config(config)?)),
    }
}

pub(crate) fn missing(what: &str) -> SchemexError {
    SchemexError::Config(ConfigError::MissingRequired(what.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemex_core::{ContractKind, OutputContract};
    use serde_json::json;

    pub(crate) fn request() -> OracleRequest {
        OracleRequest {
            class_name: "Gene".to_string(),
            system: "You extract entities.".to_string(),
            instruction: "List every gene.".to_string(),
            text: "TP53 regulates MDM2.".to_string(),
            contract: OutputContract {
                name: "Gene_instances".to_string(),
                kind: ContractKind::Mentions,
                root_field: "mentions".to_string(),
                required_fields: Vec::new(),
                schema: json!({
                    "type": "object",
                    "properties": {"mentions": {"type": "array", "items": {"type": "string"}}},
                    "required": ["mentions"],
                    "additionalProperties": false
                }),
            },
        }
    }

    #[test]
    fn test_messages_layout() {
        let msgs = messages(&request());
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, "system");
        assert_eq!(msgs[1].content, "List every gene.");
        assert_eq!(msgs[2].content, "Text:\nTP53 regulates MDM2.");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_failure(StatusCode::GATEWAY_TIMEOUT, ""),
            OracleFailure::Timeout
        );
        assert!(matches!(
            status_failure(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            OracleFailure::RateLimited(_)
        ));
        assert!(matches!(
            status_failure(StatusCode::BAD_GATEWAY, ""),
            OracleFailure::Transport(_)
        ));
        let rejected = status_failure(StatusCode::BAD_REQUEST, "bad schema");
        assert!(matches!(rejected, OracleFailure::Rejected(ref m) if m.contains("bad schema")));
        assert!(!rejected.is_transient());
    }

    #[test]
    fn test_parse_content() {
        assert_eq!(
            parse_content(r#"{"mentions": ["TP53"]}"#).unwrap(),
            json!({"mentions": ["TP53"]})
        );
        assert_eq!(
            parse_content("```json\n{\"mentions\": []}\n```").unwrap(),
            json!({"mentions": []})
        );
        assert!(matches!(
            parse_content("TP53, MDM2"),
            Err(OracleFailure::Malformed(_))
        ));
    }

    #[test]
    fn test_factory_requires_api_key() {
        let config = OracleConfig::default();
        assert!(matches!(
            create_oracle(&config),
            Err(SchemexError::Config(ConfigError::MissingRequired(_)))
        ));
    }

    #[test]
    fn test_factory_ollama() {
        let config = OracleConfig {
            provider: OracleProvider::Ollama,
            model: "llama3.1".to_string(),
            ..Default::default()
        };
        let oracle = create_oracle(&config).unwrap();
        assert_eq!(oracle.name(), "ollama");
    }
}
