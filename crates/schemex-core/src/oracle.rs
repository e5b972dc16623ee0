//! Oracle and output-contract seams
//!
//! The extraction oracle is an external text-understanding service. The
//! engine hands it an instruction plus an [`OutputContract`] and reads the
//! answer back strictly through the field names that contract declares.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Failure of a single oracle call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleFailure {
    #[error("Oracle request timed out")]
    Timeout,

    #[error("Oracle rate limited: {0}")]
    RateLimited(String),

    #[error("Oracle transport error: {0}")]
    Transport(String),

    #[error("Oracle rejected request: {0}")]
    Rejected(String),

    #[error("Malformed oracle output: {0}")]
    Malformed(String),

    #[error("Contract violation: {0}")]
    ContractViolation(String),

    #[error("No output contract for class '{0}'")]
    MissingContract(String),
}

impl OracleFailure {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited(_) | Self::Transport(_)
        )
    }
}

// ============================================================================
// Output contracts
// ============================================================================

/// Shape of the answer a contract asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// `{root: [string, ...]}`
    Mentions,
    /// `{root: [{field: ...}, ...]}` for entity attributes
    AttributeRecords,
    /// `{root: [{subject, predicate, object, ...}, ...]}`
    RelationRecords,
}

/// Structured output contract passed to the oracle.
///
/// `schema` is opaque to the engine; only `root_field` and
/// `required_fields` are used to read the answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    /// Contract name, e.g. `Gene_instances`
    pub name: String,

    pub kind: ContractKind,

    /// Top-level field holding the answer list
    pub root_field: String,

    /// Fields every record must carry (records only)
    #[serde(default)]
    pub required_fields: Vec<String>,

    /// JSON schema forwarded to the oracle
    pub schema: Value,
}

impl OutputContract {
    fn root_array<'a>(&self, value: &'a Value) -> Result<&'a Vec<Value>, OracleFailure> {
        let object = value.as_object().ok_or_else(|| {
            OracleFailure::ContractViolation(format!("{}: expected a JSON object", self.name))
        })?;
        let root = object.get(&self.root_field).ok_or_else(|| {
            OracleFailure::ContractViolation(format!(
                "{}: missing field '{}'",
                self.name, self.root_field
            ))
        })?;
        root.as_array().ok_or_else(|| {
            OracleFailure::ContractViolation(format!(
                "{}: field '{}' is not an array",
                self.name, self.root_field
            ))
        })
    }

    /// Read a mention list
    pub fn parse_mentions(&self, value: &Value) -> Result<Vec<String>, OracleFailure> {
        self.root_array(value)?
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    OracleFailure::ContractViolation(format!(
                        "{}: mention {item} is not a string",
                        self.name
                    ))
                })
            })
            .collect()
    }

    /// Read a record list, checking the declared required fields
    pub fn parse_records(&self, value: &Value) -> Result<Vec<Map<String, Value>>, OracleFailure> {
        self.root_array(value)?
            .iter()
            .map(|item| {
                let record = item.as_object().ok_or_else(|| {
                    OracleFailure::ContractViolation(format!(
                        "{}: record {item} is not an object",
                        self.name
                    ))
                })?;
                if let Some(missing) = self
                    .required_fields
                    .iter()
                    .find(|f| !record.contains_key(f.as_str()))
                {
                    return Err(OracleFailure::ContractViolation(format!(
                        "{}: record missing field '{missing}'",
                        self.name
                    )));
                }
                Ok(record.clone())
            })
            .collect()
    }
}

/// Contracts available for one class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassContracts {
    #[serde(default)]
    pub mentions: Option<OutputContract>,

    #[serde(default)]
    pub attributes: Option<OutputContract>,

    #[serde(default)]
    pub relations: Option<OutputContract>,
}

/// Source of output contracts, keyed by class name
pub trait ContractProvider: Send + Sync {
    fn contracts_for(&self, class_name: &str) -> Option<ClassContracts>;
}

// ============================================================================
// Oracle
// ============================================================================

/// One oracle call
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    /// Class being extracted
    pub class_name: String,

    /// System / identity message
    pub system: String,

    /// Task instruction
    pub instruction: String,

    /// Source text
    pub text: String,

    /// Contract the answer must follow
    pub contract: OutputContract,
}

/// Trait for extraction oracles
#[async_trait]
pub trait ExtractionOracle: Send + Sync {
    /// Run one structured extraction
    async fn extract(&self, request: &OracleRequest) -> Result<Value, OracleFailure>;

    /// Oracle name for logging
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract(kind: ContractKind, root: &str, required: &[&str]) -> OutputContract {
        OutputContract {
            name: "Test_instances".to_string(),
            kind,
            root_field: root.to_string(),
            required_fields: required.iter().map(|s| s.to_string()).collect(),
            schema: json!({}),
        }
    }

    #[test]
    fn test_parse_mentions() {
        let c = contract(ContractKind::Mentions, "mentions", &[]);
        let mentions = c.parse_mentions(&json!({"mentions": ["TNF", "IL-6"]})).unwrap();
        assert_eq!(mentions, vec!["TNF", "IL-6"]);
    }

    #[test]
    fn test_parse_mentions_wrong_root() {
        let c = contract(ContractKind::Mentions, "mentions", &[]);
        let err = c.parse_mentions(&json!({"label": ["TNF"]})).unwrap_err();
        assert!(matches!(err, OracleFailure::ContractViolation(_)));

        let err = c.parse_mentions(&json!(["TNF"])).unwrap_err();
        assert!(matches!(err, OracleFailure::ContractViolation(_)));

        let err = c.parse_mentions(&json!({"mentions": [1]})).unwrap_err();
        assert!(matches!(err, OracleFailure::ContractViolation(_)));
    }

    #[test]
    fn test_parse_records_required_fields() {
        let c = contract(
            ContractKind::RelationRecords,
            "RegulatesRelationships",
            &["subject", "predicate", "object"],
        );
        let ok = json!({"RegulatesRelationships": [
            {"subject": "p53", "predicate": "regulates", "object": "MDM2"}
        ]});
        assert_eq!(c.parse_records(&ok).unwrap().len(), 1);

        let missing = json!({"RegulatesRelationships": [{"subject": "p53"}]});
        assert!(matches!(
            c.parse_records(&missing),
            Err(OracleFailure::ContractViolation(_))
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(OracleFailure::Timeout.is_transient());
        assert!(OracleFailure::RateLimited("429".into()).is_transient());
        assert!(OracleFailure::Transport("503".into()).is_transient());
        assert!(!OracleFailure::Malformed("x".into()).is_transient());
        assert!(!OracleFailure::ContractViolation("x".into()).is_transient());
        assert!(!OracleFailure::Rejected("400".into()).is_transient());
    }
}
