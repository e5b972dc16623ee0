//! Schema model
//!
//! In-memory representation of a class schema: classes with attributes,
//! inheritance (`is_a`), relationship endpoints and enums. Loads LinkML
//! schemas as YAML or as their JSON conversion.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Result, SchemexError};

/// `is_a` marker for predicate vocabularies, never extracted
pub const RELATIONSHIP_TYPE: &str = "RelationshipType";

/// `is_a` marker for relationship-shaped classes
pub const TRIPLE: &str = "Triple";

/// `is_a` marker for plain named-entity classes
pub const NAMED_ENTITY: &str = "NamedEntity";

/// Attribute names carrying relationship endpoints and predicate
pub const SUBJECT: &str = "subject";
pub const OBJECT: &str = "object";
pub const PREDICATE: &str = "predicate";

// ============================================================================
// Schema
// ============================================================================

/// A complete class schema
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// Schema title
    #[serde(default)]
    pub title: Option<String>,

    /// Schema description
    #[serde(default)]
    pub description: Option<String>,

    /// Classes keyed by name
    #[serde(default, deserialize_with = "deserialize_entries")]
    pub classes: BTreeMap<String, ClassDefinition>,

    /// Enums keyed by name
    #[serde(default, deserialize_with = "deserialize_entries")]
    pub enums: BTreeMap<String, EnumDefinition>,
}

impl Schema {
    /// Parse a schema from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a LinkML YAML schema
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a schema file; `.yaml`/`.yml` are read as YAML, anything else as JSON
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Look up a class by name
    pub fn class(&self, name: &str) -> Option<&ClassDefinition> {
        self.classes.get(name)
    }

    /// Enum values for a range, if the range names an enum
    pub fn enum_values(&self, range: &str) -> Option<Vec<String>> {
        self.enums.get(range).map(EnumDefinition::values)
    }

    /// Kind of a class, following `is_a` so that subtypes of a predicate
    /// vocabulary are excluded as well.
    pub fn kind_of(&self, class_name: &str) -> Option<ClassKind> {
        let mut visited = HashSet::new();
        let mut current = class_name;
        let mut class = self.classes.get(current)?;

        loop {
            if class.kind() == ClassKind::RelationshipType {
                return Some(ClassKind::RelationshipType);
            }
            if !visited.insert(current.to_string()) {
                return Some(ClassKind::Concept);
            }
            let Some(parent) = class.is_a.as_deref() else {
                return Some(ClassKind::Concept);
            };
            match self.classes.get(parent) {
                Some(next) => {
                    current = parent;
                    class = next;
                }
                None => return Some(ClassKind::Concept),
            }
        }
    }

    /// Identifier attribute of a class, inherited through `is_a` when the
    /// class does not declare its own.
    pub fn identifier_of(&self, class_name: &str) -> Option<String> {
        let mut visited = HashSet::new();
        let mut current = class_name;

        while visited.insert(current.to_string()) {
            let class = self.classes.get(current)?;
            if let Some((name, _)) = class.identifier() {
                return Some(name.to_string());
            }
            current = class.is_a.as_deref()?;
        }

        None
    }

    /// Attributes of a class merged over its ancestors (child wins)
    pub fn effective_attributes(&self, class_name: &str) -> BTreeMap<String, AttributeDefinition> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(class_name);

        while let Some(name) = current {
            if !visited.insert(name.to_string()) {
                break;
            }
            match self.classes.get(name) {
                Some(class) => {
                    chain.push(class);
                    current = class.is_a.as_deref();
                }
                None => break,
            }
        }

        let mut merged = BTreeMap::new();
        for class in chain.into_iter().rev() {
            for (name, attr) in &class.attributes {
                merged.insert(name.clone(), attr.clone());
            }
        }
        merged
    }

    /// Legal predicate values for a relationship class.
    ///
    /// Read from the identifier pattern of the class named by the
    /// `predicate` attribute's range, split on `|`, with regex anchors removed.
    pub fn predicate_values(&self, class_name: &str) -> Vec<String> {
        let Some(predicate_class) = self
            .classes
            .get(class_name)
            .and_then(|c| c.attributes.get(PREDICATE))
            .and_then(|a| a.range.as_deref())
            .and_then(|range| self.classes.get(range))
        else {
            return Vec::new();
        };

        let pattern = predicate_class
            .identifier()
            .and_then(|(_, attr)| attr.pattern.as_deref())
            .or_else(|| {
                predicate_class
                    .attributes
                    .get("id")
                    .and_then(|a| a.pattern.as_deref())
            });

        pattern
            .map(|p| {
                p.split('|')
                    .map(|v| v.trim().trim_start_matches('^').trim_end_matches('$'))
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Introductory sentence built from the schema title and description
    pub fn intro(&self) -> Option<String> {
        match (self.title.as_deref(), self.description.as_deref()) {
            (Some(title), Some(desc)) => Some(format!(
                "The schema is titled '{title}' and described as follows: {desc}."
            )),
            (None, Some(desc)) => Some(format!("The schema is described as follows: {desc}.")),
            (Some(title), None) => Some(format!("The schema is titled '{title}'.")),
            (None, None) => None,
        }
    }
}

// ============================================================================
// Classes
// ============================================================================

/// Kind of a schema class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    /// Predicate vocabulary, excluded from the dependency graph
    RelationshipType,
    /// Anything extractable
    Concept,
}

/// Class definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassDefinition {
    /// Parent class or root marker
    #[serde(default)]
    pub is_a: Option<String>,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Attributes keyed by name
    #[serde(default, deserialize_with = "deserialize_entries")]
    pub attributes: BTreeMap<String, AttributeDefinition>,

    /// Free-form annotations (prompt examples, annotation rules)
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
}

impl ClassDefinition {
    pub fn kind(&self) -> ClassKind {
        if self.is_a.as_deref() == Some(RELATIONSHIP_TYPE) {
            ClassKind::RelationshipType
        } else {
            ClassKind::Concept
        }
    }

    /// First attribute flagged as identifier
    pub fn identifier(&self) -> Option<(&str, &AttributeDefinition)> {
        self.attributes
            .iter()
            .find(|(_, a)| a.identifier)
            .map(|(n, a)| (n.as_str(), a))
    }

    /// Whether the class models a binary relationship
    pub fn is_relationship_shaped(&self) -> bool {
        self.is_a.as_deref() == Some(TRIPLE)
            || (self.attributes.contains_key(SUBJECT) && self.attributes.contains_key(OBJECT))
    }

    /// Range of the `subject` attribute
    pub fn subject_range(&self) -> Option<&str> {
        self.attributes.get(SUBJECT).and_then(|a| a.range.as_deref())
    }

    /// Range of the `object` attribute
    pub fn object_range(&self) -> Option<&str> {
        self.attributes.get(OBJECT).and_then(|a| a.range.as_deref())
    }

    /// Annotation value as text.
    ///
    /// LinkML annotations are either bare values or `{tag, value}` objects.
    pub fn annotation(&self, key: &str) -> Option<String> {
        let value = self.annotations.get(key)?;
        let value = match value {
            Value::Object(map) => map.get("value")?,
            other => other,
        };
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Attribute definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Value range: a primitive type, a class or an enum
    #[serde(default)]
    pub range: Option<String>,

    #[serde(default)]
    pub identifier: bool,

    #[serde(default)]
    pub multivalued: bool,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub minimum_cardinality: Option<u32>,

    #[serde(default)]
    pub maximum_cardinality: Option<u32>,

    /// Regex pattern; on predicate classes this lists the legal values
    #[serde(default)]
    pub pattern: Option<String>,

    #[serde(default)]
    pub description: Option<String>,
}

impl AttributeDefinition {
    /// Cardinality bounds, only when both ends are declared
    pub fn cardinality(&self) -> Option<CardinalityBounds> {
        match (self.minimum_cardinality, self.maximum_cardinality) {
            (Some(min), Some(max)) => Some(CardinalityBounds { min, max }),
            _ => None,
        }
    }
}

/// Inclusive cardinality bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityBounds {
    pub min: u32,
    pub max: u32,
}

/// Map whose entries may be bare keys (`label:` in YAML, `null` in JSON)
fn deserialize_entries<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let entries = Option::<BTreeMap<String, Option<T>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|(name, entry)| (name, entry.unwrap_or_default()))
        .collect())
}

// ============================================================================
// Enums
// ============================================================================

/// Enum definition, either LinkML `permissible_values` or a plain `enum` list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnumDefinition {
    #[serde(default)]
    pub permissible_values: BTreeMap<String, Value>,

    #[serde(default, rename = "enum")]
    pub values: Vec<String>,
}

impl EnumDefinition {
    pub fn values(&self) -> Vec<String> {
        if self.values.is_empty() {
            self.permissible_values.keys().cloned().collect()
        } else {
            self.values.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "title": "Gut-brain axis",
        "description": "Microbiome interactions",
        "classes": {
            "Gene": {
                "is_a": "NamedEntity",
                "description": "A gene or gene product",
                "attributes": {"label": {"identifier": true, "range": "string"}},
                "annotations": {"annotation_rules": {"tag": "annotation_rules", "value": "Annotate symbols."}}
            },
            "Enzyme": {"is_a": "Gene", "attributes": {"activity": {"range": "ActivityEnum"}}},
            "RegulatesPredicate": {
                "is_a": "RelationshipType",
                "attributes": {"id": {"identifier": true, "pattern": "^regulates$|^inhibits$"}}
            },
            "Regulates": {
                "is_a": "Triple",
                "attributes": {
                    "subject": {"range": "Gene", "minimum_cardinality": 1, "maximum_cardinality": 3},
                    "predicate": {"range": "RegulatesPredicate"},
                    "object": {"range": "Enzyme"}
                }
            }
        },
        "enums": {
            "ActivityEnum": {"permissible_values": {"high": {}, "low": {}}},
            "Plain": {"enum": ["a", "b"]}
        }
    }"#;

    #[test]
    fn test_parse_schema() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        assert_eq!(schema.classes.len(), 4);
        assert_eq!(
            schema.class("RegulatesPredicate").unwrap().kind(),
            ClassKind::RelationshipType
        );
        assert!(schema.class("Regulates").unwrap().is_relationship_shaped());
        assert!(!schema.class("Enzyme").unwrap().is_relationship_shaped());
    }

    #[test]
    fn test_kind_of_follows_parents() {
        let mut schema = Schema::from_json_str(SCHEMA).unwrap();
        schema.classes.insert(
            "StrongRegulation".to_string(),
            ClassDefinition {
                is_a: Some("RegulatesPredicate".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(
            schema.kind_of("StrongRegulation"),
            Some(ClassKind::RelationshipType)
        );
        assert_eq!(schema.kind_of("Enzyme"), Some(ClassKind::Concept));
        assert_eq!(schema.kind_of("Missing"), None);
    }

    #[test]
    fn test_identifier_inherited() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        assert_eq!(schema.identifier_of("Gene").as_deref(), Some("label"));
        assert_eq!(schema.identifier_of("Enzyme").as_deref(), Some("label"));
        assert_eq!(schema.identifier_of("Missing"), None);
    }

    #[test]
    fn test_effective_attributes_merge_parent() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let attrs = schema.effective_attributes("Enzyme");
        assert!(attrs.contains_key("label"));
        assert!(attrs.contains_key("activity"));
    }

    #[test]
    fn test_predicate_values_strip_anchors() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        assert_eq!(
            schema.predicate_values("Regulates"),
            vec!["regulates".to_string(), "inhibits".to_string()]
        );
        assert!(schema.predicate_values("Gene").is_empty());
    }

    #[test]
    fn test_enum_values_both_forms() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        assert_eq!(
            schema.enum_values("ActivityEnum").unwrap(),
            vec!["high".to_string(), "low".to_string()]
        );
        assert_eq!(schema.enum_values("Plain").unwrap(), vec!["a", "b"]);
        assert!(schema.enum_values("string").is_none());
    }

    #[test]
    fn test_annotation_and_cardinality() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        let gene = schema.class("Gene").unwrap();
        assert_eq!(
            gene.annotation("annotation_rules").as_deref(),
            Some("Annotate symbols.")
        );

        let subject = &schema.class("Regulates").unwrap().attributes[SUBJECT];
        assert_eq!(
            subject.cardinality(),
            Some(CardinalityBounds { min: 1, max: 3 })
        );
        let object = &schema.class("Regulates").unwrap().attributes[OBJECT];
        assert_eq!(object.cardinality(), None);
    }

    const YAML_SCHEMA: &str = r#"
id: https://example.org/gut-brain
title: Gut-brain axis
classes:
  Gene:
    is_a: NamedEntity
    attributes:
      label:
        identifier: true
  Enzyme:
    is_a: Gene
    attributes:
      activity:
        range: ActivityEnum
      notes:
  Regulates:
    is_a: Triple
    attributes:
      subject:
        range: Gene
      object:
        range: Enzyme
enums:
  ActivityEnum:
    permissible_values:
      high:
      low:
        description: Barely detectable
"#;

    #[test]
    fn test_parse_yaml_schema() {
        let schema = Schema::from_yaml_str(YAML_SCHEMA).unwrap();
        assert_eq!(schema.title.as_deref(), Some("Gut-brain axis"));
        assert_eq!(schema.classes.len(), 3);
        assert_eq!(schema.identifier_of("Enzyme").as_deref(), Some("label"));
        assert!(schema.class("Enzyme").unwrap().attributes.contains_key("notes"));
        assert!(schema.class("Regulates").unwrap().is_relationship_shaped());
        assert_eq!(
            schema.enum_values("ActivityEnum").unwrap(),
            vec!["high".to_string(), "low".to_string()]
        );
    }

    #[test]
    fn test_yaml_and_json_agree() {
        let from_yaml = Schema::from_yaml_str(YAML_SCHEMA).unwrap();
        let json = serde_json::to_string(&from_yaml).unwrap();
        let from_json = Schema::from_json_str(&json).unwrap();

        assert_eq!(
            from_json.classes.keys().collect::<Vec<_>>(),
            from_yaml.classes.keys().collect::<Vec<_>>()
        );
        assert_eq!(
            from_json.enum_values("ActivityEnum"),
            from_yaml.enum_values("ActivityEnum")
        );
        assert_eq!(
            from_json.class("Regulates").unwrap().object_range(),
            Some("Enzyme")
        );
    }

    #[test]
    fn test_from_path_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("schema.yaml");
        std::fs::write(&yaml_path, YAML_SCHEMA).unwrap();
        let json_path = dir.path().join("schema.json");
        std::fs::write(&json_path, SCHEMA).unwrap();

        assert_eq!(Schema::from_path(&yaml_path).unwrap().classes.len(), 3);
        assert_eq!(Schema::from_path(&json_path).unwrap().classes.len(), 4);
        assert!(matches!(
            Schema::from_json_str(YAML_SCHEMA),
            Err(SchemexError::Json(_))
        ));
    }

    #[test]
    fn test_intro() {
        let schema = Schema::from_json_str(SCHEMA).unwrap();
        assert!(schema.intro().unwrap().contains("Gut-brain axis"));
        assert_eq!(Schema::default().intro(), None);
    }
}
