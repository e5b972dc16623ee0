//! Output contract providers
//!
//! [`SchemaContracts`] derives strict JSON-schema contracts from the class
//! schema and the tier plan. [`StaticContracts`] serves contracts prepared
//! ahead of time and loaded from a JSON file.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Map, Value};

use schemex_core::schema::{OBJECT, PREDICATE, SUBJECT};
use schemex_core::{
    AttributeDefinition, ClassContracts, ContractKind, ContractProvider, OutputContract, Schema,
    SchemexError,
};

use crate::tiers::TierPlan;

/// Root field of entity mention contracts
pub const MENTIONS_FIELD: &str = "mentions";

/// Contracts generated from the schema
#[derive(Debug, Clone, Default)]
pub struct SchemaContracts {
    contracts: BTreeMap<String, ClassContracts>,
}

impl SchemaContracts {
    /// Generate contracts for every extractable class in the plan.
    ///
    /// Entity classes without an identifier attribute get no contract.
    pub fn generate(schema: &Schema, plan: &TierPlan) -> Self {
        let mut contracts = BTreeMap::new();

        for class in &plan.independent {
            if schema.identifier_of(class).is_none() {
                tracing::warn!(class = %class, "No identifier attribute, skipping contract");
                continue;
            }
            contracts.insert(
                class.clone(),
                ClassContracts {
                    mentions: Some(mentions_contract(class, MENTIONS_FIELD)),
                    ..Default::default()
                },
            );
        }

        for class in plan.specializations.keys() {
            let Some(identifier) = schema.identifier_of(class) else {
                tracing::warn!(class = %class, "No identifier attribute, skipping contract");
                continue;
            };
            contracts.insert(
                class.clone(),
                ClassContracts {
                    mentions: Some(mentions_contract(class, &identifier)),
                    attributes: Some(attributes_contract(schema, class)),
                    relations: None,
                },
            );
        }

        for class in plan.relationships.keys() {
            contracts.insert(
                class.clone(),
                ClassContracts {
                    relations: Some(relations_contract(schema, class)),
                    ..Default::default()
                },
            );
        }

        Self { contracts }
    }

    /// Contracts keyed by class, for export
    pub fn contracts(&self) -> &BTreeMap<String, ClassContracts> {
        &self.contracts
    }
}

impl ContractProvider for SchemaContracts {
    fn contracts_for(&self, class_name: &str) -> Option<ClassContracts> {
        self.contracts.get(class_name).cloned()
    }
}

/// Contracts loaded from a JSON file of `{class: ClassContracts}`
#[derive(Debug, Clone, Default)]
pub struct StaticContracts {
    contracts: BTreeMap<String, ClassContracts>,
}

impl StaticContracts {
    pub fn new(contracts: BTreeMap<String, ClassContracts>) -> Self {
        Self { contracts }
    }

    pub fn from_json_str(json: &str) -> schemex_core::Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> schemex_core::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SchemexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

impl ContractProvider for StaticContracts {
    fn contracts_for(&self, class_name: &str) -> Option<ClassContracts> {
        self.contracts.get(class_name).cloned()
    }
}

/// Wrap an object schema with a single required array field
fn envelope(root: &str, items: Value) -> Value {
    json!({
        "type": "object",
        "properties": {
            root: {"type": "array", "items": items}
        },
        "required": [root],
        "additionalProperties": false
    })
}

fn mentions_contract(class: &str, root: &str) -> OutputContract {
    OutputContract {
        name: format!("{class}_instances"),
        kind: ContractKind::Mentions,
        root_field: root.to_string(),
        required_fields: Vec::new(),
        schema: envelope(root, json!({"type": "string"})),
    }
}

/// JSON type of an attribute value inside a record
fn field_type(schema: &Schema, attr: &AttributeDefinition) -> Value {
    let range = attr.range.as_deref().unwrap_or("string");
    let mut field = Map::new();

    match (schema.enum_values(range), attr.multivalued) {
        (Some(values), true) => {
            field.insert("type".into(), json!("array"));
            field.insert("items".into(), json!({"type": "string", "enum": values}));
        }
        (Some(values), false) => {
            field.insert("type".into(), json!("string"));
            field.insert("enum".into(), json!(values));
        }
        (None, true) => {
            field.insert("type".into(), json!("array"));
            field.insert("items".into(), json!({"type": "string"}));
        }
        (None, false) => {
            let ty = match range.to_lowercase().as_str() {
                "integer" | "float" | "double" | "decimal" => "number",
                _ => "string",
            };
            field.insert("type".into(), json!(ty));
        }
    }

    if let Some(description) = &attr.description {
        field.insert("description".into(), json!(description));
    }

    Value::Object(field)
}

fn record_contract(
    class: &str,
    name: String,
    kind: ContractKind,
    root: String,
    properties: Map<String, Value>,
) -> OutputContract {
    let required: Vec<String> = properties.keys().cloned().collect();
    let items = json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    });
    tracing::trace!(class, root = %root, "Generated record contract");
    OutputContract {
        name,
        kind,
        schema: envelope(&root, items),
        root_field: root,
        required_fields: required,
    }
}

/// `<Class>Attributes` contract over the inherited attribute set
fn attributes_contract(schema: &Schema, class: &str) -> OutputContract {
    let properties: Map<String, Value> = schema
        .effective_attributes(class)
        .iter()
        .map(|(name, attr)| (name.clone(), field_type(schema, attr)))
        .collect();

    record_contract(
        class,
        format!("{class}_attributes"),
        ContractKind::AttributeRecords,
        format!("{class}Attributes"),
        properties,
    )
}

/// `<Class>Relationships` contract; the predicate is constrained to the
/// legal predicate values when the schema declares any
fn relations_contract(schema: &Schema, class: &str) -> OutputContract {
    let predicates = schema.predicate_values(class);
    let mut properties = Map::new();

    for (name, attr) in schema.effective_attributes(class) {
        let field = if name == PREDICATE && !predicates.is_empty() {
            json!({"type": "string", "enum": predicates})
        } else if name == SUBJECT || name == OBJECT || name == PREDICATE {
            json!({"type": "string"})
        } else {
            field_type(schema, &AttributeDefinition {
                multivalued: false,
                ..attr
            })
        };
        properties.insert(name, field);
    }

    for endpoint in [SUBJECT, PREDICATE, OBJECT] {
        properties
            .entry(endpoint.to_string())
            .or_insert_with(|| json!({"type": "string"}));
    }

    record_contract(
        class,
        format!("{class}_instances"),
        ContractKind::RelationRecords,
        format!("{class}Relationships"),
        properties,
    )
}
