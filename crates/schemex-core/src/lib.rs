//! Schemex Core - Schema model, result types, errors, and shared traits
//!
//! This crate defines the abstractions shared by the extraction engine:
//! - Class schema model (classes, attributes, enums)
//! - Extraction results, relation triples and span annotations
//! - Error taxonomy
//! - Oracle and output-contract traits
//! - Configuration management

pub mod config;
pub mod oracle;
pub mod schema;

pub use config::{
    AppConfig, ConfigError, ExtractionConfig, GroundingConfig, GroundingPolicy, LoggingConfig,
    OracleConfig, OracleProvider, RetryConfig,
};
pub use oracle::{
    ClassContracts, ContractKind, ContractProvider, ExtractionOracle, OracleFailure,
    OracleRequest, OutputContract,
};
pub use schema::{AttributeDefinition, ClassDefinition, ClassKind, EnumDefinition, Schema};

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error type for schemex operations
#[derive(Error, Debug)]
pub enum SchemexError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Oracle failure: {0}")]
    Oracle(#[from] OracleFailure),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SchemexError>;

/// Malformed schema. Fatal for the whole run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("class '{class}' references unknown class '{reference}'")]
    UnknownClass { class: String, reference: String },

    #[error("relationship class '{class}' resolves endpoint '{resolved}' but not '{missing}'")]
    UnresolvedEndpoint {
        class: String,
        resolved: String,
        missing: String,
    },

    #[error("relationship class '{class}' has no '{attribute}' range")]
    MissingEndpoint { class: String, attribute: String },

    #[error("class '{class}' declares both a parent and relationship endpoints")]
    ConflictingDependencies { class: String },

    #[error("dependency cycle through class '{class}'")]
    Cycle { class: String },
}

// ============================================================================
// Extraction Results
// ============================================================================

/// Processing tier of a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Independent,
    Specialization,
    Relationship,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Independent => write!(f, "independent"),
            Self::Specialization => write!(f, "specialization"),
            Self::Relationship => write!(f, "relationship"),
        }
    }
}

/// A relationship record returned by the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub subject: String,

    /// Possibly pipe-delimited alternatives
    pub predicate: String,

    pub object: String,

    /// Any further relationship attributes
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl RelationRecord {
    /// Build from a contract-checked record; fails if an endpoint is not a string
    pub fn from_record(mut record: Map<String, Value>) -> Option<Self> {
        let mut take = |key: &str| match record.remove(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let subject = take(schema::SUBJECT)?;
        let predicate = take(schema::PREDICATE)?;
        let object = take(schema::OBJECT)?;
        Some(Self {
            subject,
            predicate,
            object,
            attributes: record,
        })
    }

    /// Normalized triples, one per predicate alternative
    pub fn triples(&self) -> Vec<RelationTriple> {
        RelationTriple::explode(&self.subject, &self.predicate, &self.object)
    }
}

/// A normalized (subject, predicate, object) triple
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl RelationTriple {
    pub fn new(subject: &str, predicate: &str, object: &str) -> Self {
        Self {
            subject: normalize(subject),
            predicate: normalize(predicate),
            object: normalize(object),
        }
    }

    /// One normalized triple per `|`-separated predicate alternative
    pub fn explode(subject: &str, predicate: &str, object: &str) -> Vec<Self> {
        predicate
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| Self::new(subject, p, object))
            .collect()
    }
}

/// Lower-case and trim for comparison
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Result of extracting one class from one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub class_name: String,

    pub tier: TierKind,

    /// Identifier field the instances were read from
    #[serde(default)]
    pub identifier: Option<String>,

    /// Ordered, de-duplicated instance identifiers
    #[serde(default)]
    pub instances: Vec<String>,

    /// Per-instance attribute records (specializations)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Map<String, Value>>,

    /// Relationship records (relationships)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<RelationRecord>,
}

impl ExtractionResult {
    /// Empty result, recorded for failed calls
    pub fn empty(class_name: impl Into<String>, tier: TierKind) -> Self {
        Self {
            class_name: class_name.into(),
            tier,
            identifier: None,
            instances: Vec::new(),
            attributes: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Set the identifier field
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Add instances, keeping first-seen order and dropping duplicates
    pub fn extend_instances<I, S>(&mut self, instances: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for instance in instances {
            let instance = instance.into();
            if !instance.trim().is_empty() && !self.instances.contains(&instance) {
                self.instances.push(instance);
            }
        }
    }

    /// Whether this class yielded any evidence
    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty() || !self.relations.is_empty()
    }

    /// Identifier labels found inside attribute records
    pub fn attribute_labels(&self) -> Vec<&str> {
        let Some(field) = self.identifier.as_deref() else {
            return Vec::new();
        };
        self.attributes
            .iter()
            .filter_map(|record| record.get(field).and_then(Value::as_str))
            .collect()
    }
}

/// Per-document results keyed by class name
pub type ResultMap = BTreeMap<String, ExtractionResult>;

// ============================================================================
// Span Annotations
// ============================================================================

/// A mention grounded to a character span of one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanAnnotation {
    /// First character index within the segment
    pub start_idx: usize,

    /// Last character index (inclusive)
    pub end_idx: usize,

    /// Segment id, e.g. `title` or `abstract`
    pub location: String,

    pub text_span: String,

    pub label: String,
}

/// A mention that could not be found in any segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedSpan {
    pub class_name: String,
    pub mention: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_explosion() {
        let triples = RelationTriple::explode("X", "treats|prevents", "Y");
        assert_eq!(
            triples,
            vec![
                RelationTriple::new("x", "treats", "y"),
                RelationTriple::new("x", "prevents", "y"),
            ]
        );
        assert_eq!(triples[0].subject, "x");
        assert_eq!(triples[1].predicate, "prevents");
    }

    #[test]
    fn test_predicate_explosion_skips_empty() {
        let triples = RelationTriple::explode(" A ", " causes | ", "B");
        assert_eq!(triples, vec![RelationTriple::new("a", "causes", "b")]);
    }

    #[test]
    fn test_relation_record_from_record() {
        let record = json!({"subject": "TNF", "predicate": "increases", "object": "IL-6", "evidence": "strong"});
        let rec = RelationRecord::from_record(record.as_object().unwrap().clone()).unwrap();
        assert_eq!(rec.subject, "TNF");
        assert_eq!(rec.attributes.get("evidence"), Some(&json!("strong")));

        let bad = json!({"subject": 1, "predicate": "x", "object": "y"});
        assert!(RelationRecord::from_record(bad.as_object().unwrap().clone()).is_none());
    }

    #[test]
    fn test_extend_instances_dedup() {
        let mut result = ExtractionResult::empty("Gene", TierKind::Independent);
        result.extend_instances(["TP53", "MDM2", "TP53", " "]);
        assert_eq!(result.instances, vec!["TP53", "MDM2"]);
        assert!(result.has_instances());
        assert!(!ExtractionResult::empty("Gene", TierKind::Independent).has_instances());
    }

    #[test]
    fn test_attribute_labels() {
        let mut result =
            ExtractionResult::empty("Enzyme", TierKind::Specialization).with_identifier("label");
        result
            .attributes
            .push(json!({"label": "MDM2", "activity": "high"}).as_object().unwrap().clone());
        result
            .attributes
            .push(json!({"activity": "low"}).as_object().unwrap().clone());
        assert_eq!(result.attribute_labels(), vec!["MDM2"]);
    }

    #[test]
    fn test_schema_error_display() {
        let err = SchemexError::from(SchemaError::Cycle {
            class: "A".to_string(),
        });
        assert!(err.to_string().contains("cycle"));
    }
}
