//! Schemex Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for development.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::schema::{NAMED_ENTITY, RELATIONSHIP_TYPE, TRIPLE};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Oracle provider configuration
    pub oracle: OracleConfig,

    /// Retry policy for oracle calls
    pub retry: RetryConfig,

    /// Extraction pipeline configuration
    pub extraction: ExtractionConfig,

    /// Span grounding configuration
    pub grounding: GroundingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env()?;
        Ok(self)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Oracle
        if let Ok(provider) = std::env::var("ORACLE_PROVIDER") {
            self.oracle.provider = provider.parse()?;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.oracle.openai_api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            self.oracle.openai_base_url = Some(url);
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.oracle.ollama_url = url;
        }
        if let Ok(model) = std::env::var("ORACLE_MODEL") {
            self.oracle.model = model;
        }
        if let Ok(secs) = std::env::var("ORACLE_TIMEOUT_SECS") {
            self.oracle.timeout_secs = parse_var("ORACLE_TIMEOUT_SECS", secs)?;
        }

        // Retry
        if let Ok(retries) = std::env::var("ORACLE_MAX_RETRIES") {
            self.retry.max_retries = parse_var("ORACLE_MAX_RETRIES", retries)?;
        }

        // Extraction
        if let Ok(n) = std::env::var("DOCUMENT_CONCURRENCY") {
            self.extraction.document_concurrency = parse_var("DOCUMENT_CONCURRENCY", n)?;
        }

        // Grounding
        if let Ok(policy) = std::env::var("GROUNDING_POLICY") {
            self.grounding.policy = policy.parse()?;
        }

        // Logging
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Oracle provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Oracle provider to use
    pub provider: OracleProvider,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI API base URL (for Azure or compatible APIs)
    pub openai_base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::OpenAI,
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "gpt-4o-2024-08-06".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

/// Supported oracle providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    OpenAI,
    Ollama,
    Azure,
}

impl std::str::FromStr for OracleProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "azure" => Ok(Self::Azure),
            _ => Err(ConfigError::InvalidValue {
                key: "ORACLE_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Bounded retry for transient oracle failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,

    /// First backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// Extraction pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Documents processed concurrently
    pub document_concurrency: usize,

    /// `is_a` values treated as imported base types rather than classes
    pub root_types: Vec<String>,

    /// System message sent with every oracle call
    pub system_prompt: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            document_concurrency: 4,
            root_types: vec![
                NAMED_ENTITY.to_string(),
                TRIPLE.to_string(),
                RELATIONSHIP_TYPE.to_string(),
            ],
            system_prompt: "You are an expert in entity and relation extraction from plain text."
                .to_string(),
        }
    }
}

/// How mentions are matched against source text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroundingPolicy {
    /// Each mention consumes the first unused occurrence
    #[default]
    FirstOccurrenceConsumed,
    /// Every literal match becomes an annotation
    AllOccurrences,
}

impl std::str::FromStr for GroundingPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "first-occurrence-consumed" | "first" => Ok(Self::FirstOccurrenceConsumed),
            "all-occurrences" | "all" => Ok(Self::AllOccurrences),
            _ => Err(ConfigError::InvalidValue {
                key: "GROUNDING_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for GroundingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstOccurrenceConsumed => write!(f, "first-occurrence-consumed"),
            Self::AllOccurrences => write!(f, "all-occurrences"),
        }
    }
}

/// Span grounding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundingConfig {
    /// Occurrence policy, fixed for a whole run
    pub policy: GroundingPolicy,

    /// Segment markers in priority order (`title` matches `title:`)
    pub segments: Vec<String>,

    /// Class name to output label
    pub labels: BTreeMap<String, String>,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            policy: GroundingPolicy::default(),
            segments: vec!["title".to_string(), "abstract".to_string()],
            labels: default_labels(),
        }
    }
}

/// Label table for the biomedical annotation task
pub fn default_labels() -> BTreeMap<String, String> {
    [
        ("AnatomicalLocation", "anatomical location"),
        ("Animal", "animal"),
        ("BiomedicalTechnique", "biomedical technique"),
        ("Bacteria", "bacteria"),
        ("Chemical", "chemical"),
        ("DietarySupplement", "dietary supplement"),
        ("DiseaseDisorderOrFinding", "DDF"),
        ("Metabolites", "chemical"),
        ("Drug", "drug"),
        ("Food", "food"),
        ("Gene", "gene"),
        ("Human", "human"),
        ("Microbiome", "microbiome"),
        ("StatisticalTechnique", "statistical technique"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.grounding.segments, vec!["title", "abstract"]);
        assert_eq!(
            config.grounding.policy,
            GroundingPolicy::FirstOccurrenceConsumed
        );
        assert_eq!(
            config.grounding.labels.get("DiseaseDisorderOrFinding").map(String::as_str),
            Some("DDF")
        );
        assert!(config
            .extraction
            .root_types
            .contains(&"NamedEntity".to_string()));
    }

    #[test]
    fn test_oracle_provider_parse() {
        assert_eq!(
            "openai".parse::<OracleProvider>().unwrap(),
            OracleProvider::OpenAI
        );
        assert_eq!(
            "Ollama".parse::<OracleProvider>().unwrap(),
            OracleProvider::Ollama
        );
        assert!("invalid".parse::<OracleProvider>().is_err());
    }

    #[test]
    fn test_grounding_policy_parse() {
        assert_eq!(
            "all-occurrences".parse::<GroundingPolicy>().unwrap(),
            GroundingPolicy::AllOccurrences
        );
        assert_eq!(
            "first_occurrence_consumed".parse::<GroundingPolicy>().unwrap(),
            GroundingPolicy::FirstOccurrenceConsumed
        );
        assert!("sometimes".parse::<GroundingPolicy>().is_err());
        assert_eq!(
            GroundingPolicy::AllOccurrences.to_string(),
            "all-occurrences"
        );
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[oracle]
provider = "ollama"
model = "llama3"

[retry]
max_retries = 5

[grounding]
policy = "all-occurrences"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.oracle.provider, OracleProvider::Ollama);
        assert_eq!(config.oracle.model, "llama3");
        assert_eq!(config.oracle.timeout_secs, 120);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.grounding.policy, GroundingPolicy::AllOccurrences);
        assert_eq!(config.grounding.segments.len(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file("/nonexistent/schemex.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
